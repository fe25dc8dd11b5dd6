use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;

use super::{feed_key, split_feed_key, CandleStream, Feeder};
use crate::models::Candle;

/// Callback invoked for every candle delivered to a subscription
pub type CandleConsumer = Arc<dyn Fn(Candle) + Send + Sync>;

#[derive(Clone)]
struct Subscription {
    on_candle_close: bool,
    consumer: CandleConsumer,
}

impl Subscription {
    fn deliver(&self, candle: &Candle) {
        if self.on_candle_close && !candle.complete {
            return;
        }
        (self.consumer)(candle.clone());
    }
}

/// Fan-out of upstream candle streams to subscribers
///
/// One task per (pair, timeframe). Delivery is ordered within a key and consumers run
/// inline on that key's task, so a slow consumer only holds back its own feed.
pub struct DataFeed {
    exchange: Arc<dyn Feeder>,
    feeds: Vec<String>,
    subscriptions: HashMap<String, Vec<Subscription>>,
    streams: HashMap<String, CandleStream>,
    handles: Vec<JoinHandle<()>>,
}

impl DataFeed {
    pub fn new(exchange: Arc<dyn Feeder>) -> Self {
        Self {
            exchange,
            feeds: Vec::new(),
            subscriptions: HashMap::new(),
            streams: HashMap::new(),
            handles: Vec::new(),
        }
    }

    /// Register a consumer for a (pair, timeframe)
    pub fn subscribe(
        &mut self,
        pair: &str,
        timeframe: &str,
        consumer: CandleConsumer,
        on_candle_close: bool,
    ) {
        let key = feed_key(pair, timeframe);
        if !self.feeds.contains(&key) {
            self.feeds.push(key.clone());
        }
        self.subscriptions.entry(key).or_default().push(Subscription {
            on_candle_close,
            consumer,
        });
    }

    /// Push historical candles through the matching consumers, skipping incomplete bars
    pub fn preload(&self, pair: &str, timeframe: &str, candles: &[Candle]) {
        let key = feed_key(pair, timeframe);
        let Some(subscriptions) = self.subscriptions.get(&key) else {
            return;
        };

        tracing::info!(pair, timeframe, "Preloading {} candles", candles.len());
        for candle in candles.iter().filter(|c| c.complete) {
            for subscription in subscriptions {
                (subscription.consumer)(candle.clone());
            }
        }
    }

    /// Open one upstream stream per subscribed key
    pub fn connect(&mut self) {
        tracing::info!("Connecting to the exchange");
        for key in &self.feeds {
            if self.streams.contains_key(key) {
                continue;
            }
            if let Some((pair, timeframe)) = split_feed_key(key) {
                let stream = self.exchange.candles_subscription(pair, timeframe);
                self.streams.insert(key.clone(), stream);
            }
        }
    }

    /// Spawn the per-key forwarding tasks
    ///
    /// With `load_sync` the call returns once every upstream stream has ended.
    pub async fn start(&mut self, load_sync: bool) {
        self.connect();

        for (key, stream) in self.streams.drain() {
            let subscriptions = self.subscriptions.get(&key).cloned().unwrap_or_default();
            self.handles.push(tokio::spawn(forward(key, stream, subscriptions)));
        }

        tracing::info!("Data feed connected");
        if load_sync {
            self.wait().await;
        }
    }

    /// Wait for every running feed task to finish
    pub async fn wait(&mut self) {
        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                tracing::error!("Feed task failed: {}", e);
            }
        }
    }

    /// Subscribed keys in registration order
    pub fn keys(&self) -> &[String] {
        &self.feeds
    }
}

async fn forward(key: String, mut stream: CandleStream, subscriptions: Vec<Subscription>) {
    let mut errors_open = true;

    loop {
        tokio::select! {
            biased;
            candle = stream.data.recv() => match candle {
                Some(candle) => {
                    for subscription in &subscriptions {
                        subscription.deliver(&candle);
                    }
                }
                None => break,
            },
            err = stream.errors.recv(), if errors_open => match err {
                Some(err) => tracing::error!(feed = %key, "Upstream feed error: {}", err),
                None => errors_open = false,
            },
        }
    }

    tracing::debug!(feed = %key, "Feed closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::feed::CsvFeed;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use std::sync::Mutex;

    fn start_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap()
    }

    fn candles(pair: &str, count: usize) -> Vec<Candle> {
        (0..count)
            .map(|i| {
                let close = 100.0 + i as f64;
                Candle::new(pair, start_time() + Duration::hours(i as i64), close, close, close, close, 1.0)
            })
            .collect()
    }

    fn recorder() -> (CandleConsumer, Arc<Mutex<Vec<Candle>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (Arc::new(move |c: Candle| sink.lock().unwrap().push(c)), seen)
    }

    /// Feeder that emits a scripted mix of errors and candles
    struct ScriptedFeeder {
        candles: Vec<Candle>,
    }

    impl Feeder for ScriptedFeeder {
        fn last_quote(&self, pair: &str) -> crate::Result<f64> {
            Err(Error::InsufficientData(pair.to_string()))
        }

        fn candles_by_period(
            &self,
            _pair: &str,
            _timeframe: &str,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> crate::Result<Vec<Candle>> {
            Ok(Vec::new())
        }

        fn candles_by_limit(&self, _pair: &str, _timeframe: &str, _limit: usize) -> crate::Result<Vec<Candle>> {
            Ok(Vec::new())
        }

        fn candles_subscription(&self, _pair: &str, _timeframe: &str) -> CandleStream {
            let (data_tx, err_tx, stream) = CandleStream::channel(16);
            let candles = self.candles.clone();
            tokio::spawn(async move {
                for candle in candles {
                    let _ = err_tx.send(Error::Feed("connection reset".to_string())).await;
                    let _ = data_tx.send(candle).await;
                }
            });
            stream
        }
    }

    #[test]
    fn test_preload_skips_incomplete_and_unsubscribed() {
        let feeder = CsvFeed::from_candles("BTCUSDT", "1h", Vec::new(), "1h").unwrap();
        let mut feed = DataFeed::new(Arc::new(feeder));
        let (consumer, seen) = recorder();
        feed.subscribe("BTCUSDT", "1h", consumer, false);

        let mut history = candles("BTCUSDT", 3);
        history[1].complete = false;
        feed.preload("BTCUSDT", "1h", &history);
        feed.preload("ETHUSDT", "1h", &candles("ETHUSDT", 2));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().all(|c| c.pair == "BTCUSDT" && c.complete));
    }

    #[tokio::test]
    async fn test_start_delivers_in_order_and_respects_close_only() {
        let mut history = candles("BTCUSDT", 4);
        history[2].complete = false;
        let feeder = CsvFeed::from_candles("BTCUSDT", "1h", history, "1h").unwrap();

        let mut feed = DataFeed::new(Arc::new(feeder));
        let (all, seen_all) = recorder();
        let (closed, seen_closed) = recorder();
        feed.subscribe("BTCUSDT", "1h", all, false);
        feed.subscribe("BTCUSDT", "1h", closed, true);

        feed.start(true).await;

        let closes: Vec<f64> = seen_all.lock().unwrap().iter().map(|c| c.close).collect();
        assert_eq!(closes, vec![100.0, 101.0, 102.0, 103.0]);
        // same-timeframe resampling marks everything complete
        assert_eq!(seen_closed.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_upstream_errors_do_not_stop_the_feed() {
        let feeder = ScriptedFeeder {
            candles: candles("BTCUSDT", 5),
        };
        let mut feed = DataFeed::new(Arc::new(feeder));
        let (consumer, seen) = recorder();
        feed.subscribe("BTCUSDT", "1h", consumer, false);

        feed.start(true).await;

        assert_eq!(seen.lock().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_one_task_per_key() {
        let feeder = ScriptedFeeder {
            candles: candles("BTCUSDT", 2),
        };
        let mut feed = DataFeed::new(Arc::new(feeder));
        let (a, seen_a) = recorder();
        let (b, seen_b) = recorder();
        feed.subscribe("BTCUSDT", "1h", a, false);
        feed.subscribe("ETHUSDT", "4h", b, false);
        assert_eq!(feed.keys().len(), 2);

        feed.start(false).await;
        feed.wait().await;

        assert_eq!(seen_a.lock().unwrap().len(), 2);
        assert_eq!(seen_b.lock().unwrap().len(), 2);
    }
}
