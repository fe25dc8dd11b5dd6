use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::exchange::{PaperWallet, WalletSummary};
use crate::feed::{CandleConsumer, DataFeed, Feeder};
use crate::models::{Candle, Dataframe, Order};
use crate::notification::Notifier;
use crate::order::{Controller, OrderFeed, Summary};
use crate::pairs::PairTable;
use crate::storage::{MemoryStorage, Storage};
use crate::strategy::{Strategy, StrategyController};
use crate::Result;

/// Candle ordered for replay: oldest first, ties by update time then pair
struct QueuedCandle(Candle);

impl PartialEq for QueuedCandle {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueuedCandle {}

impl PartialOrd for QueuedCandle {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedCandle {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.chronological_cmp(&other.0)
    }
}

/// Per-candle pipeline shared with the feed tasks
struct Engine {
    wallet: Arc<PaperWallet>,
    controller: Arc<Controller>,
    strategies: HashMap<String, Arc<StrategyController>>,
    queue: Mutex<BinaryHeap<Reverse<QueuedCandle>>>,
}

impl Engine {
    fn queue(&self) -> MutexGuard<'_, BinaryHeap<Reverse<QueuedCandle>>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn process_candle(&self, candle: &Candle) {
        self.wallet.on_candle(candle);

        let Some(strategy) = self.strategies.get(&candle.pair) else {
            tracing::warn!(pair = %candle.pair, "Candle for unregistered pair");
            return;
        };
        strategy.on_partial_candle(candle);
        if candle.complete {
            strategy.on_candle(candle);
            self.controller.on_candle(candle);
        }
    }

    fn enqueue(&self, candle: Candle) {
        self.queue().push(Reverse(QueuedCandle(candle)));
    }

    /// Replay queued candles in chronological order
    fn drain(&self) -> usize {
        let mut processed = 0;
        loop {
            let next = self.queue().pop();
            let Some(Reverse(QueuedCandle(candle))) = next else {
                break;
            };
            self.process_candle(&candle);
            processed += 1;
        }
        processed
    }
}

/// Runs one strategy over a set of pairs against the paper wallet
///
/// In backtest mode every candle is buffered and replayed in time order across pairs once
/// the historical feed is exhausted. Otherwise candles are processed as they arrive and
/// strategies are warmed up from the feed's history first.
pub struct Bot {
    pairs: Vec<String>,
    strategy: Arc<dyn Strategy>,
    backtest: bool,
    notifier: Option<Arc<dyn Notifier>>,
    order_feed: Arc<OrderFeed>,
    engine: Arc<Engine>,
}

pub struct BotBuilder {
    pairs: Vec<String>,
    strategy: Arc<dyn Strategy>,
    wallet: Arc<PaperWallet>,
    pair_table: Arc<PairTable>,
    storage: Option<Arc<dyn Storage>>,
    notifier: Option<Arc<dyn Notifier>>,
    poll_interval: Option<Duration>,
    backtest: bool,
}

impl BotBuilder {
    pub fn storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    pub fn backtest(mut self, backtest: bool) -> Self {
        self.backtest = backtest;
        self
    }

    pub fn build(self) -> Bot {
        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(MemoryStorage::new()) as Arc<dyn Storage>);
        let order_feed = Arc::new(OrderFeed::new());

        let mut controller = Controller::new(
            self.wallet.clone(),
            storage,
            order_feed.clone(),
            self.pair_table,
        );
        if let Some(notifier) = &self.notifier {
            controller = controller.with_notifier(notifier.clone());
        }
        if let Some(interval) = self.poll_interval {
            controller = controller.with_poll_interval(interval);
        }
        let controller = Arc::new(controller);

        let strategies = self
            .pairs
            .iter()
            .map(|pair| {
                let strategy =
                    StrategyController::new(pair, self.strategy.clone(), controller.clone());
                (pair.clone(), Arc::new(strategy))
            })
            .collect();

        Bot {
            pairs: self.pairs,
            strategy: self.strategy,
            backtest: self.backtest,
            notifier: self.notifier,
            order_feed,
            engine: Arc::new(Engine {
                wallet: self.wallet,
                controller,
                strategies,
                queue: Mutex::new(BinaryHeap::new()),
            }),
        }
    }
}

impl Bot {
    /// Start building a bot; the wallet must already carry its market data feeder
    pub fn builder(
        pairs: &[String],
        strategy: Arc<dyn Strategy>,
        wallet: Arc<PaperWallet>,
        pair_table: Arc<PairTable>,
    ) -> BotBuilder {
        BotBuilder {
            pairs: pairs.to_vec(),
            strategy,
            wallet,
            pair_table,
            storage: None,
            notifier: None,
            poll_interval: None,
            backtest: false,
        }
    }

    pub fn wallet(&self) -> &Arc<PaperWallet> {
        &self.engine.wallet
    }

    pub fn controller(&self) -> &Arc<Controller> {
        &self.engine.controller
    }

    pub fn is_backtest(&self) -> bool {
        self.backtest
    }

    /// Candles the strategy has seen for a pair
    pub fn dataframe(&self, pair: &str) -> Option<Dataframe> {
        self.engine.strategies.get(pair).map(|s| s.dataframe())
    }

    fn preload(&self, data_feed: &DataFeed, pair: &str) -> Result<()> {
        if self.backtest {
            return Ok(());
        }

        let timeframe = self.strategy.timeframe();
        let candles = self
            .engine
            .wallet
            .candles_by_limit(pair, timeframe, self.strategy.warmup_period())?;
        data_feed.preload(pair, timeframe, &candles);
        Ok(())
    }

    /// Run until the data feed ends
    ///
    /// Fails before any candle is processed when warmup history cannot be loaded.
    pub async fn run(&self) -> Result<()> {
        let timeframe = self.strategy.timeframe().to_string();
        let mut data_feed = DataFeed::new(self.engine.wallet.clone());

        for pair in &self.pairs {
            let engine = self.engine.clone();
            let consumer: CandleConsumer = if self.backtest {
                Arc::new(move |candle: Candle| engine.enqueue(candle))
            } else {
                Arc::new(move |candle: Candle| engine.process_candle(&candle))
            };
            data_feed.subscribe(pair, &timeframe, consumer, false);

            if let Some(notifier) = &self.notifier {
                let notifier = notifier.clone();
                self.order_feed
                    .subscribe(pair, Arc::new(move |order: Order| notifier.on_order(&order)), false);
            }
        }

        for pair in &self.pairs {
            self.preload(&data_feed, pair)?;
        }

        self.order_feed.start();
        self.engine.controller.start();
        for strategy in self.engine.strategies.values() {
            strategy.start();
        }

        tracing::info!(
            strategy = self.strategy.name(),
            timeframe = %timeframe,
            backtest = self.backtest,
            "Bot running on {} pairs",
            self.pairs.len()
        );
        data_feed.start(true).await;

        if self.backtest {
            let processed = self.engine.drain();
            tracing::info!("Backtest replayed {} candles", processed);
        }
        Ok(())
    }

    /// Flush pending orders and stop background tasks
    pub async fn stop(&self) {
        self.engine.controller.stop();
        self.order_feed.shutdown().await;
    }

    pub fn summaries(&self) -> Vec<Summary> {
        self.engine.controller.summaries()
    }

    pub fn wallet_summary(&self) -> WalletSummary {
        self.engine.wallet.summary()
    }

    /// Print per-pair results followed by the wallet report
    pub fn summary(&self) {
        let summaries = self.summaries();
        if summaries.is_empty() {
            println!("\nNo closed trades");
        }
        for summary in &summaries {
            println!("\n{}", summary);
        }

        let total: f64 = summaries.iter().map(Summary::profit).sum();
        let trades: usize = summaries.iter().map(Summary::trades).sum();
        println!("\n💰 Realized: {:.4} over {} trades", total, trades);

        self.wallet_summary().print_report();
    }
}
