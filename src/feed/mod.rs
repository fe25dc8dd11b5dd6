// Candle sources and fan-out
pub mod csv;
pub mod distributor;
pub mod resample;
pub mod synthetic;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::error::Error;
use crate::models::Candle;
use crate::Result;

pub use self::csv::{CsvFeed, PairFeed};
pub use distributor::{CandleConsumer, DataFeed};
pub use resample::{is_last_candle_period, parse_timeframe, resample};
pub use synthetic::{MarketScenario, SyntheticDataGenerator, SyntheticFeed};

/// Upstream candle stream for one (pair, timeframe)
///
/// The stream ends when `data` closes. Errors are informational and never end it.
pub struct CandleStream {
    pub data: mpsc::Receiver<Candle>,
    pub errors: mpsc::Receiver<Error>,
}

impl CandleStream {
    /// Stream plus the sending halves used by a producer task
    pub fn channel(buffer: usize) -> (mpsc::Sender<Candle>, mpsc::Sender<Error>, Self) {
        let (data_tx, data) = mpsc::channel(buffer);
        let (err_tx, errors) = mpsc::channel(buffer);
        (data_tx, err_tx, Self { data, errors })
    }
}

/// Market data access, historical or live
pub trait Feeder: Send + Sync {
    /// Close of the most recent known candle for a pair
    fn last_quote(&self, pair: &str) -> Result<f64>;

    /// Candles with `start <= time <= end`, non-destructive
    fn candles_by_period(
        &self,
        pair: &str,
        timeframe: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>>;

    /// Next `limit` candles (historical sources consume them)
    fn candles_by_limit(&self, pair: &str, timeframe: &str, limit: usize) -> Result<Vec<Candle>>;

    /// Open a stream of candles; must be called from inside a tokio runtime
    fn candles_subscription(&self, pair: &str, timeframe: &str) -> CandleStream;
}

/// Key used for one (pair, timeframe) feed
pub fn feed_key(pair: &str, timeframe: &str) -> String {
    format!("{}--{}", pair, timeframe)
}

/// Inverse of [`feed_key`]
pub fn split_feed_key(key: &str) -> Option<(&str, &str)> {
    key.split_once("--")
}
