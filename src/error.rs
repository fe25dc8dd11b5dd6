use thiserror::Error;

/// Errors returned by the trading engine
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid quantity")]
    InvalidQuantity,

    #[error("insufficient funds or locked: {quantity} {pair}")]
    InsufficientFunds { pair: String, quantity: f64 },

    #[error("invalid asset: {0}")]
    InvalidAsset(String),

    #[error("invalid timeframe: {0}")]
    InvalidTimeframe(String),

    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("invalid stop: {0}")]
    InvalidStop(String),

    #[error("order not found: {0}")]
    OrderNotFound(i64),

    #[error("no data feed configured")]
    NoDataFeed,

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("feed error: {0}")]
    Feed(String),
}

impl Error {
    /// Validation and funding errors only reject one operation; the run keeps going
    pub fn is_order_rejection(&self) -> bool {
        matches!(
            self,
            Error::InvalidQuantity | Error::InsufficientFunds { .. } | Error::InvalidAsset(_)
        )
    }
}
