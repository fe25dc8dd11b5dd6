use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::Strategy;
use crate::exchange::Broker;
use crate::models::{Candle, Dataframe};

struct DataState {
    dataframe: Dataframe,
    started: bool,
}

/// Feeds the candles of one pair to a strategy
pub struct StrategyController {
    strategy: Arc<dyn Strategy>,
    broker: Arc<dyn Broker>,
    partial_candles: bool,
    state: Mutex<DataState>,
}

impl StrategyController {
    pub fn new(pair: &str, strategy: Arc<dyn Strategy>, broker: Arc<dyn Broker>) -> Self {
        let partial_candles = strategy.handles_partial_candles();
        Self {
            strategy,
            broker,
            partial_candles,
            state: Mutex::new(DataState {
                dataframe: Dataframe::new(pair),
                started: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DataState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Let the strategy trade; candles before this only build history
    pub fn start(&self) {
        let mut state = self.lock();
        state.started = true;
        tracing::info!(
            pair = %state.dataframe.pair,
            strategy = self.strategy.name(),
            "Strategy started"
        );
    }

    pub fn is_started(&self) -> bool {
        self.lock().started
    }

    pub fn dataframe(&self) -> Dataframe {
        self.lock().dataframe.clone()
    }

    pub fn on_partial_candle(&self, candle: &Candle) {
        if !self.partial_candles || candle.complete {
            return;
        }

        let mut state = self.lock();
        if !state.started || state.dataframe.len() < self.strategy.warmup_period() {
            return;
        }

        state.dataframe.update(candle);
        self.strategy.indicators(&mut state.dataframe);
        self.strategy.on_partial_candle(&state.dataframe, self.broker.as_ref());
    }

    pub fn on_candle(&self, candle: &Candle) {
        let mut state = self.lock();
        state.dataframe.update(candle);

        if state.dataframe.len() >= self.strategy.warmup_period() {
            self.strategy.indicators(&mut state.dataframe);
            if state.started {
                self.strategy.on_candle(&state.dataframe, self.broker.as_ref());
            }
        }
    }
}
