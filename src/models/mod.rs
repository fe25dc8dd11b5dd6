use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

pub mod dataframe;
pub mod order;
pub mod position;

pub use dataframe::{Dataframe, Series};
pub use order::{Order, OrderStatus, OrderType, Side};
pub use position::{Position, TradeResult};

/// OHLCV bar for a pair over one timeframe bucket
///
/// A bar can be emitted several times with `complete == false` while it is still
/// forming; the last emission for a given `time` is authoritative.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candle {
    pub pair: String,
    pub time: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub open: f64,
    pub close: f64,
    pub low: f64,
    pub high: f64,
    pub volume: f64,
    pub trades: i64,
    pub complete: bool,
    /// Extra numeric columns from CSV inputs
    #[serde(default)]
    pub metadata: HashMap<String, f64>,
}

impl Candle {
    /// Closed candle with `updated_at == time`
    pub fn new(
        pair: &str,
        time: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            pair: pair.to_string(),
            time,
            updated_at: time,
            open,
            close,
            low,
            high,
            volume,
            trades: 0,
            complete: true,
            metadata: HashMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pair.is_empty() && self.close == 0.0 && self.open == 0.0 && self.volume == 0.0
    }

    /// Replay order: open time, then last update, then pair name
    pub fn chronological_cmp(&self, other: &Candle) -> Ordering {
        self.time
            .cmp(&other.time)
            .then_with(|| self.updated_at.cmp(&other.updated_at))
            .then_with(|| self.pair.cmp(&other.pair))
    }
}

/// Free and locked quantity of one asset
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub asset: String,
    pub free: f64,
    pub lock: f64,
}

impl Balance {
    pub fn total(&self) -> f64 {
        self.free + self.lock
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Account {
    pub balances: Vec<Balance>,
}

impl Account {
    /// Balances for the base asset and the quote asset of a pair; missing entries are zero
    pub fn balance(&self, asset: &str, quote: &str) -> (Balance, Balance) {
        let find = |tick: &str| {
            self.balances
                .iter()
                .find(|b| b.asset == tick)
                .cloned()
                .unwrap_or_else(|| Balance {
                    asset: tick.to_string(),
                    ..Default::default()
                })
        };
        (find(asset), find(quote))
    }
}

/// Trading rules for a pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetInfo {
    pub base_asset: String,
    pub quote_asset: String,
    pub min_price: f64,
    pub max_price: f64,
    pub min_quantity: f64,
    pub max_quantity: f64,
    pub step_size: f64,
    pub tick_size: f64,
    pub quote_precision: u32,
    pub base_asset_precision: u32,
}

/// Point of an equity or asset value curve
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AssetValue {
    pub time: DateTime<Utc>,
    pub value: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_candle_creation() {
        let candle = Candle::new("BTCUSDT", at(60), 100.0, 110.0, 90.0, 105.0, 12.0);

        assert!(candle.complete);
        assert_eq!(candle.updated_at, candle.time);
        assert!(!candle.is_empty());
    }

    #[test]
    fn test_chronological_order() {
        let a = Candle::new("BTCUSDT", at(60), 1.0, 1.0, 1.0, 1.0, 1.0);
        let mut b = a.clone();
        b.updated_at = at(90);
        let mut c = a.clone();
        c.pair = "ETHUSDT".to_string();
        let d = Candle::new("AAAUSDT", at(120), 1.0, 1.0, 1.0, 1.0, 1.0);

        assert_eq!(a.chronological_cmp(&b), Ordering::Less);
        assert_eq!(a.chronological_cmp(&c), Ordering::Less);
        assert_eq!(c.chronological_cmp(&d), Ordering::Less);
        assert_eq!(a.chronological_cmp(&a.clone()), Ordering::Equal);
    }

    #[test]
    fn test_account_balance_defaults_to_zero() {
        let account = Account {
            balances: vec![Balance {
                asset: "USDT".to_string(),
                free: 10.0,
                lock: 5.0,
            }],
        };

        let (btc, usdt) = account.balance("BTC", "USDT");
        assert_eq!(btc.total(), 0.0);
        assert_eq!(btc.asset, "BTC");
        assert_eq!(usdt.total(), 15.0);
    }
}
