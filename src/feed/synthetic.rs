use chrono::{DateTime, DurationRound, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use super::{parse_timeframe, CandleStream, Feeder};
use crate::error::Error;
use crate::models::Candle;
use crate::Result;

/// Market scenario types for synthetic data generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketScenario {
    /// Steady uptrend with noise (+2% daily average)
    Uptrend,
    /// Steady downtrend with noise (-2% daily average)
    Downtrend,
    /// Mean-reverting chop (±1% around the base price)
    Sideways,
    /// Large swings (±5% per bar)
    Volatile,
    /// Missing bars every 50 intervals
    WithGaps,
    /// Slow climb followed by a 25% slide
    DrawdownTest,
}

impl MarketScenario {
    pub const ALL: [MarketScenario; 6] = [
        MarketScenario::Uptrend,
        MarketScenario::Downtrend,
        MarketScenario::Sideways,
        MarketScenario::Volatile,
        MarketScenario::WithGaps,
        MarketScenario::DrawdownTest,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            MarketScenario::Uptrend => "uptrend",
            MarketScenario::Downtrend => "downtrend",
            MarketScenario::Sideways => "sideways",
            MarketScenario::Volatile => "volatile",
            MarketScenario::WithGaps => "with-gaps",
            MarketScenario::DrawdownTest => "drawdown",
        }
    }
}

impl std::str::FromStr for MarketScenario {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        MarketScenario::ALL
            .into_iter()
            .find(|scenario| scenario.name() == s.to_lowercase())
            .ok_or_else(|| Error::Parse(format!("unknown market scenario '{}'", s)))
    }
}

/// Seeded generator of synthetic OHLCV bars
pub struct SyntheticDataGenerator {
    rng: StdRng,
    pair: String,
    start: Option<DateTime<Utc>>,
    base_price: f64,
    base_volume: f64,
}

impl SyntheticDataGenerator {
    /// Create a new generator with a seed for reproducibility
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            pair: "BTCUSDT".to_string(),
            start: None,
            base_price: 150.0,
            base_volume: 1_000_000.0,
        }
    }

    pub fn for_pair(mut self, pair: &str) -> Self {
        self.pair = pair.to_string();
        self
    }

    /// Fixed open time of the first bar (defaults to `now - span`, aligned to the interval)
    pub fn starting_at(mut self, start: DateTime<Utc>) -> Self {
        self.start = Some(start);
        self
    }

    pub fn with_base_price(mut self, price: f64) -> Self {
        self.base_price = price;
        self
    }

    pub fn base_price(&self) -> f64 {
        self.base_price
    }

    /// Generate `num_candles` complete bars spaced `interval_minutes` apart
    pub fn generate(
        &mut self,
        scenario: MarketScenario,
        num_candles: usize,
        interval_minutes: i64,
    ) -> Vec<Candle> {
        let interval = Duration::minutes(interval_minutes);
        let start = self.start.unwrap_or_else(|| {
            let start = Utc::now() - interval * num_candles as i32;
            start.duration_trunc(interval).unwrap_or(start)
        });

        let mut candles = Vec::with_capacity(num_candles);
        let mut price = self.base_price;
        let mut slot: i64 = 0;

        for i in 0..num_candles {
            // every 50th bar is missing
            if scenario == MarketScenario::WithGaps && i % 50 == 49 {
                slot += 2;
                continue;
            }

            price = self.next_price(scenario, price, i, num_candles, interval_minutes);
            let candle = self.create_candle(price, start + interval * slot as i32);
            candles.push(candle);
            slot += 1;
        }

        candles
    }

    fn next_price(
        &mut self,
        scenario: MarketScenario,
        price: f64,
        index: usize,
        num_candles: usize,
        interval_minutes: i64,
    ) -> f64 {
        let bars_per_day = 24.0 * 60.0 / interval_minutes as f64;

        match scenario {
            MarketScenario::Uptrend => {
                price + price * 0.02 / bars_per_day + price * self.rng.gen_range(-0.001..0.001)
            }
            MarketScenario::Downtrend => {
                price - price * 0.02 / bars_per_day + price * self.rng.gen_range(-0.001..0.001)
            }
            MarketScenario::Sideways => {
                let reversion = (self.base_price - price) * 0.1;
                price + reversion + price * self.rng.gen_range(-0.01..0.01)
            }
            MarketScenario::Volatile => {
                let next = price + price * self.rng.gen_range(-0.05..0.05);
                next.max(self.base_price * 0.5)
            }
            MarketScenario::WithGaps => price + price * self.rng.gen_range(-0.01..0.01),
            MarketScenario::DrawdownTest => {
                if index < num_candles / 2 {
                    price + price * self.rng.gen_range(-0.005..0.01)
                } else {
                    let drop_rate = -0.25 / (num_candles as f64 / 2.0);
                    price + price * drop_rate + price * self.rng.gen_range(-0.005..0.005)
                }
            }
        }
    }

    fn create_candle(&mut self, price: f64, time: DateTime<Utc>) -> Candle {
        // ±0.2% intrabar movement
        let noise_pct = 0.002;

        let high = price * (1.0 + self.rng.gen_range(0.0..noise_pct));
        let low = price * (1.0 - self.rng.gen_range(0.0..noise_pct));
        let open = (price * (1.0 + self.rng.gen_range(-noise_pct..noise_pct))).clamp(low, high);
        let volume = self.base_volume * self.rng.gen_range(0.7..1.3);

        Candle::new(&self.pair, time, open, high, low, price, volume)
    }
}

struct PairSeries {
    history: Vec<Candle>,
    live: Vec<Candle>,
}

/// Generated market that behaves like a live venue
///
/// History is served to warmup reads; a subscription replays the live bars on a timer,
/// each bar as one partial update followed by its closing update.
pub struct SyntheticFeed {
    timeframe: String,
    tick: std::time::Duration,
    series: RwLock<HashMap<String, PairSeries>>,
    last_prices: Arc<RwLock<HashMap<String, f64>>>,
}

impl SyntheticFeed {
    /// Feed producing `timeframe` bars, one every `tick` of wall time
    pub fn new(timeframe: &str, tick: std::time::Duration) -> Result<Self> {
        parse_timeframe(timeframe)?;
        Ok(Self {
            timeframe: timeframe.to_string(),
            tick,
            series: RwLock::new(HashMap::new()),
            last_prices: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Generate `history` bars ending now and `live` bars after them
    pub fn add_pair(
        &self,
        pair: &str,
        scenario: MarketScenario,
        seed: u64,
        history: usize,
        live: usize,
    ) -> Result<()> {
        let interval = parse_timeframe(&self.timeframe)?;
        let mut generator = SyntheticDataGenerator::new(seed).for_pair(pair);
        let mut candles = generator.generate(scenario, history + live, interval.num_minutes().max(1));
        let live = candles.split_off(history.min(candles.len()));

        if let Some(last) = candles.last() {
            self.last_prices
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(pair.to_string(), last.close);
        }

        tracing::info!(pair, scenario = scenario.name(), "Generated {} history / {} live bars", candles.len(), live.len());
        self.series
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(pair.to_string(), PairSeries { history: candles, live });
        Ok(())
    }

    fn check_timeframe(&self, timeframe: &str) -> Result<()> {
        if timeframe != self.timeframe {
            return Err(Error::InvalidTimeframe(timeframe.to_string()));
        }
        Ok(())
    }
}

impl Feeder for SyntheticFeed {
    fn last_quote(&self, pair: &str) -> Result<f64> {
        self.last_prices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(pair)
            .copied()
            .ok_or_else(|| Error::InsufficientData(pair.to_string()))
    }

    fn candles_by_period(
        &self,
        pair: &str,
        timeframe: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        self.check_timeframe(timeframe)?;
        let series = self.series.read().unwrap_or_else(PoisonError::into_inner);
        Ok(series
            .get(pair)
            .map(|s| {
                s.history
                    .iter()
                    .filter(|c| c.time >= start && c.time <= end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn candles_by_limit(&self, pair: &str, timeframe: &str, limit: usize) -> Result<Vec<Candle>> {
        self.check_timeframe(timeframe)?;
        let series = self.series.read().unwrap_or_else(PoisonError::into_inner);
        let history = series.get(pair).map(|s| s.history.as_slice()).unwrap_or(&[]);

        if history.len() < limit {
            return Err(Error::InsufficientData(format!(
                "{} {}: need {}, have {}",
                pair,
                timeframe,
                limit,
                history.len()
            )));
        }
        Ok(history[history.len() - limit..].to_vec())
    }

    fn candles_subscription(&self, pair: &str, timeframe: &str) -> CandleStream {
        let (data_tx, err_tx, stream) = CandleStream::channel(64);

        let live = if timeframe == self.timeframe {
            let series = self.series.read().unwrap_or_else(PoisonError::into_inner);
            series.get(pair).map(|s| s.live.clone())
        } else {
            None
        };
        let interval = parse_timeframe(timeframe).unwrap_or_else(|_| Duration::zero());
        let (tick, pair, last_prices) = (self.tick, pair.to_string(), self.last_prices.clone());

        tokio::spawn(async move {
            let Some(bars) = live else {
                let _ = err_tx
                    .send(Error::Feed(format!("no synthetic market for {}", pair)))
                    .await;
                return;
            };

            let mut ticker = tokio::time::interval((tick / 2).max(std::time::Duration::from_millis(1)));
            for bar in bars {
                let mut partial = bar.clone();
                partial.complete = false;
                partial.close = (bar.open + bar.close) / 2.0;
                partial.high = bar.open.max(partial.close);
                partial.low = bar.open.min(partial.close);
                partial.volume = bar.volume / 2.0;
                partial.updated_at = bar.time + interval / 2;

                let mut closing = bar;
                closing.updated_at = closing.time + interval;

                for candle in [partial, closing] {
                    ticker.tick().await;
                    last_prices
                        .write()
                        .unwrap_or_else(PoisonError::into_inner)
                        .insert(pair.clone(), candle.close);
                    if data_tx.send(candle).await.is_err() {
                        return;
                    }
                }
            }
        });

        stream
    }
}
