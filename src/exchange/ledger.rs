use std::collections::HashMap;

use crate::error::Error;
use crate::models::Side;
use crate::Result;

/// Free and reserved quantity of one asset; `free` goes negative for a short
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AssetBalance {
    pub free: f64,
    pub lock: f64,
}

impl AssetBalance {
    pub fn total(&self) -> f64 {
        self.free + self.lock
    }
}

/// Funds held back for a resting order (or an OCO group)
#[derive(Debug, Clone, PartialEq)]
struct Reservation {
    asset: String,
    asset_amount: f64,
    quote: String,
    quote_amount: f64,
}

/// Balances and running entry prices of a simulated account
///
/// Shorts are margined in the quote asset: opening a short moves `amount x price` of
/// quote out of `free`, and covering pays back `2 x avg_short x qty - price x qty`.
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    assets: HashMap<String, AssetBalance>,
    avg_long_price: HashMap<String, f64>,
    avg_short_price: HashMap<String, f64>,
    reservations: HashMap<i64, Reservation>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Credit free funds
    pub fn deposit(&mut self, asset: &str, amount: f64) {
        self.assets.entry(asset.to_string()).or_default().free += amount;
    }

    pub fn balance(&self, asset: &str) -> AssetBalance {
        self.assets.get(asset).copied().unwrap_or_default()
    }

    pub fn assets(&self) -> impl Iterator<Item = (&String, &AssetBalance)> {
        self.assets.iter()
    }

    pub fn avg_long_price(&self, pair: &str) -> f64 {
        self.avg_long_price.get(pair).copied().unwrap_or(0.0)
    }

    pub fn avg_short_price(&self, pair: &str) -> f64 {
        self.avg_short_price.get(pair).copied().unwrap_or(0.0)
    }

    /// Value of a short of `quantity` if covered at `price`
    pub fn short_value(&self, pair: &str, quantity: f64, price: f64) -> f64 {
        2.0 * self.avg_short_price(pair) * quantity - price * quantity
    }

    /// Check funds and move the required amounts from free to locked under `key`
    pub fn reserve(
        &mut self,
        key: i64,
        side: Side,
        pair: &str,
        (asset, quote): (&str, &str),
        amount: f64,
        price: f64,
    ) -> Result<()> {
        let (asset_amount, quote_amount) = self.required_locks(side, pair, asset, quote, amount, price)?;

        let base = self.assets.entry(asset.to_string()).or_default();
        base.free -= asset_amount;
        base.lock += asset_amount;
        let counter = self.assets.entry(quote.to_string()).or_default();
        counter.free -= quote_amount;
        counter.lock += quote_amount;

        self.reservations.insert(
            key,
            Reservation {
                asset: asset.to_string(),
                asset_amount,
                quote: quote.to_string(),
                quote_amount,
            },
        );
        Ok(())
    }

    /// Return locked funds of `key` to free; false when nothing was reserved
    pub fn release(&mut self, key: i64) -> bool {
        let Some(reservation) = self.reservations.remove(&key) else {
            return false;
        };

        let base = self.assets.entry(reservation.asset).or_default();
        base.lock -= reservation.asset_amount;
        base.free += reservation.asset_amount;
        let counter = self.assets.entry(reservation.quote).or_default();
        counter.lock -= reservation.quote_amount;
        counter.free += reservation.quote_amount;
        true
    }

    /// Check funds and settle immediately
    pub fn execute(
        &mut self,
        side: Side,
        pair: &str,
        assets: (&str, &str),
        amount: f64,
        price: f64,
    ) -> Result<()> {
        self.required_locks(side, pair, assets.0, assets.1, amount, price)?;
        self.settle(side, pair, assets, amount, price);
        Ok(())
    }

    /// Book a fill against free balances
    pub fn settle(&mut self, side: Side, pair: &str, (asset, quote): (&str, &str), amount: f64, price: f64) {
        let position = self.balance(asset).total();
        self.update_average_price(side, pair, position, amount, price);

        let free = self.balance(asset).free;
        let quote_delta = match side {
            Side::Sell => {
                let long = free.max(0.0).min(amount);
                long * price - (amount - long) * price
            }
            Side::Buy => {
                let cover = (-free).max(0.0).min(amount);
                self.short_value(pair, cover, price) - (amount - cover) * price
            }
        };

        self.assets.entry(asset.to_string()).or_default().free += side.sign() * amount;
        self.assets.entry(quote.to_string()).or_default().free += quote_delta;
    }

    /// Amounts of (asset, quote) an order of this size has to lock
    fn required_locks(
        &self,
        side: Side,
        pair: &str,
        asset: &str,
        quote: &str,
        amount: f64,
        price: f64,
    ) -> Result<(f64, f64)> {
        if amount <= 0.0 {
            return Err(Error::InvalidQuantity);
        }

        let base = self.balance(asset);
        let counter = self.balance(quote);
        let insufficient = || Error::InsufficientFunds {
            pair: pair.to_string(),
            quantity: amount,
        };

        match side {
            Side::Sell => {
                let long = base.free.max(0.0);
                let funds = counter.free + long * price;
                if funds < amount * price {
                    return Err(insufficient());
                }

                let locked_asset = long.min(amount);
                let locked_quote = (amount - locked_asset) * price;
                Ok((locked_asset, locked_quote))
            }
            Side::Buy => {
                let cover = (-base.free).max(0.0).min(amount);
                let liquid = self.short_value(pair, cover, price);
                let required = (amount - cover) * price;
                if counter.free + liquid < required {
                    return Err(insufficient());
                }

                Ok((0.0, (required - liquid).max(0.0)))
            }
        }
    }

    fn update_average_price(&mut self, side: Side, pair: &str, position: f64, amount: f64, price: f64) {
        match side {
            Side::Buy if position >= 0.0 => {
                let avg = self.avg_long_price(pair);
                self.avg_long_price
                    .insert(pair.to_string(), (avg * position + amount * price) / (position + amount));
            }
            Side::Buy => {
                let short = position.abs();
                if amount <= short {
                    let profit = (self.avg_short_price(pair) - price) * amount;
                    tracing::info!(pair, profit, "Short reduced");
                } else {
                    self.avg_long_price.insert(pair.to_string(), price);
                }
            }
            Side::Sell if position <= 0.0 => {
                let short = position.abs();
                let avg = self.avg_short_price(pair);
                self.avg_short_price
                    .insert(pair.to_string(), (avg * short + amount * price) / (short + amount));
            }
            Side::Sell => {
                if amount <= position {
                    let profit = (price - self.avg_long_price(pair)) * amount;
                    tracing::info!(pair, profit, "Long reduced");
                } else {
                    self.avg_short_price.insert(pair.to_string(), price);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const BTC: (&str, &str) = ("BTC", "USDT");

    fn ledger(usdt: f64) -> Ledger {
        let mut ledger = Ledger::new();
        ledger.deposit("USDT", usdt);
        ledger
    }

    #[test]
    fn test_reserve_and_release_round_trip() {
        let mut ledger = ledger(1000.0);
        ledger.deposit("BTC", 0.5);
        let before = (ledger.balance("BTC"), ledger.balance("USDT"));

        ledger.reserve(1, Side::Buy, "BTCUSDT", BTC, 2.0, 300.0).unwrap();
        assert_eq!(ledger.balance("USDT").lock, 600.0);
        assert_eq!(ledger.balance("USDT").free, 400.0);

        // sell more than held: base lock plus quote collateral for the short part
        ledger.reserve(2, Side::Sell, "BTCUSDT", BTC, 1.0, 400.0).unwrap();
        assert_eq!(ledger.balance("BTC").lock, 0.5);
        assert_eq!(ledger.balance("USDT").lock, 800.0);

        assert!(ledger.release(1));
        assert!(ledger.release(2));
        assert!(!ledger.release(2));
        assert_eq!((ledger.balance("BTC"), ledger.balance("USDT")), before);
    }

    #[test]
    fn test_insufficient_funds() {
        let mut ledger = ledger(100.0);

        let err = ledger
            .reserve(1, Side::Buy, "BTCUSDT", BTC, 1.0, 101.0)
            .unwrap_err();
        assert!(matches!(err, Error::InsufficientFunds { ref pair, quantity } if pair == "BTCUSDT" && quantity == 1.0));
        assert_eq!(ledger.balance("USDT"), AssetBalance { free: 100.0, lock: 0.0 });

        assert!(matches!(
            ledger.execute(Side::Sell, "BTCUSDT", BTC, 1.0, 200.0),
            Err(Error::InsufficientFunds { .. })
        ));
    }

    #[test]
    fn test_invalid_quantity() {
        let mut ledger = ledger(100.0);
        assert!(matches!(
            ledger.execute(Side::Buy, "BTCUSDT", BTC, 0.0, 10.0),
            Err(Error::InvalidQuantity)
        ));
    }

    #[test]
    fn test_average_long_price() {
        let mut ledger = ledger(1000.0);
        ledger.execute(Side::Buy, "BTCUSDT", BTC, 1.0, 100.0).unwrap();
        ledger.execute(Side::Buy, "BTCUSDT", BTC, 1.0, 50.0).unwrap();
        assert_relative_eq!(ledger.avg_long_price("BTCUSDT"), 75.0);

        ledger.execute(Side::Buy, "BTCUSDT", BTC, 2.0, 101.0).unwrap();
        assert_relative_eq!(ledger.avg_long_price("BTCUSDT"), 88.0);

        // partial close keeps the average
        ledger.execute(Side::Sell, "BTCUSDT", BTC, 1.0, 120.0).unwrap();
        assert_relative_eq!(ledger.avg_long_price("BTCUSDT"), 88.0);
        assert_relative_eq!(ledger.balance("BTC").free, 3.0);
    }

    #[test]
    fn test_short_round_trip() {
        let mut ledger = ledger(10_000.0);

        ledger.execute(Side::Sell, "BTCUSDT", BTC, 1.0, 1500.0).unwrap();
        assert_relative_eq!(ledger.balance("BTC").free, -1.0);
        assert_relative_eq!(ledger.avg_short_price("BTCUSDT"), 1500.0);
        assert_relative_eq!(ledger.balance("USDT").free, 8500.0);

        ledger.execute(Side::Buy, "BTCUSDT", BTC, 1.0, 1000.0).unwrap();
        assert_relative_eq!(ledger.balance("BTC").free, 0.0);
        assert_relative_eq!(ledger.balance("USDT").free, 10_500.0);
    }

    #[test]
    fn test_flip_long_to_short_sets_short_average() {
        let mut ledger = ledger(10_000.0);
        ledger.execute(Side::Buy, "BTCUSDT", BTC, 2.0, 1500.0).unwrap();
        ledger.execute(Side::Sell, "BTCUSDT", BTC, 3.0, 1600.0).unwrap();

        assert_relative_eq!(ledger.balance("BTC").free, -1.0);
        assert_relative_eq!(ledger.avg_short_price("BTCUSDT"), 1600.0);
        // 7000 after the buy, +3200 from the long, -1600 collateral
        assert_relative_eq!(ledger.balance("USDT").free, 8600.0);
    }

    #[test]
    fn test_cover_counts_short_value_as_funds() {
        let mut ledger = ledger(1500.0);
        ledger.execute(Side::Sell, "BTCUSDT", BTC, 1.0, 1500.0).unwrap();
        assert_relative_eq!(ledger.balance("USDT").free, 0.0);

        // no free quote left, the short itself pays for the cover
        ledger.execute(Side::Buy, "BTCUSDT", BTC, 1.0, 1200.0).unwrap();
        assert_relative_eq!(ledger.balance("USDT").free, 1800.0);
    }
}
