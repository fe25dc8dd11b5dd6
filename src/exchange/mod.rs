// Order execution venues
pub mod ledger;
pub mod paper_wallet;

pub use ledger::{AssetBalance, Ledger};
pub use paper_wallet::{max_drawdown_of, Drawdown, PaperWallet, WalletSummary};

use crate::feed::Feeder;
use crate::models::{Account, Order, Side};
use crate::Result;

/// Order entry and account queries, as seen by strategies
pub trait Broker: Send + Sync {
    fn account(&self) -> Result<Account>;

    /// Total (free + locked) asset and quote holdings for a pair
    fn position(&self, pair: &str) -> Result<(f64, f64)>;

    /// Order by exchange id
    fn order(&self, pair: &str, id: i64) -> Result<Order>;

    /// Limit-maker leg at `price` plus a stop leg triggered at `stop`, one cancels the other
    fn create_order_oco(
        &self,
        side: Side,
        pair: &str,
        quantity: f64,
        price: f64,
        stop: f64,
        stop_limit: f64,
    ) -> Result<Vec<Order>>;

    fn create_order_limit(&self, side: Side, pair: &str, quantity: f64, limit: f64) -> Result<Order>;

    fn create_order_market(&self, side: Side, pair: &str, quantity: f64) -> Result<Order>;

    /// Market order sized in quote currency
    fn create_order_market_quote(&self, side: Side, pair: &str, quote: f64) -> Result<Order>;

    /// Protective sell stop
    fn create_order_stop(&self, pair: &str, quantity: f64, limit: f64) -> Result<Order>;

    fn cancel(&self, order: &Order) -> Result<()>;
}

/// A venue that both executes orders and serves market data
pub trait Exchange: Broker + Feeder {}

impl<T: Broker + Feeder> Exchange for T {}
