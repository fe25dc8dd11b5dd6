// Trading strategy module
pub mod controller;
pub mod ema_cross;
pub mod trailing;

pub use controller::StrategyController;
pub use ema_cross::EmaCross;
pub use trailing::TrailingStopStrategy;

use crate::exchange::Broker;
use crate::models::Dataframe;

/// Base trait for all trading strategies
///
/// A strategy reads the dataframe of one pair and places orders through the broker.
/// It never sees the exchange directly.
pub trait Strategy: Send + Sync {
    /// Get strategy name
    fn name(&self) -> &str;

    /// Candle timeframe the strategy trades on, e.g. "4h"
    fn timeframe(&self) -> &str;

    /// Candles needed before indicators are meaningful
    fn warmup_period(&self) -> usize;

    /// Write indicator series into `dataframe.metadata`
    fn indicators(&self, dataframe: &mut Dataframe);

    /// Called on every closed candle once the run has started
    fn on_candle(&self, dataframe: &Dataframe, broker: &dyn Broker);

    /// Opt in to intra-bar updates; read once when the strategy is registered
    fn handles_partial_candles(&self) -> bool {
        false
    }

    fn on_partial_candle(&self, _dataframe: &Dataframe, _broker: &dyn Broker) {}
}
