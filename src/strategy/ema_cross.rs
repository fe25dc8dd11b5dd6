use crate::exchange::Broker;
use crate::indicators::{ema, sma};
use crate::models::{Dataframe, Series, Side};
use crate::strategy::Strategy;

/// Trend following on a fast EMA crossing a slow SMA
///
/// Buys with half of the free quote balance when the EMA crosses above the SMA and
/// sells the whole asset position when it crosses back below.
#[derive(Debug, Clone)]
pub struct EmaCross {
    timeframe: String,
    fast_period: usize,
    slow_period: usize,
    /// Smallest quote balance worth trading
    min_quote: f64,
}

impl EmaCross {
    pub fn new(timeframe: &str) -> Self {
        Self {
            timeframe: timeframe.to_string(),
            fast_period: 8,
            slow_period: 21,
            min_quote: 10.0,
        }
    }

    pub fn with_periods(mut self, fast: usize, slow: usize) -> Self {
        self.fast_period = fast;
        self.slow_period = slow;
        self
    }
}

impl Default for EmaCross {
    fn default() -> Self {
        Self::new("4h")
    }
}

impl Strategy for EmaCross {
    fn name(&self) -> &str {
        "EmaCross"
    }

    fn timeframe(&self) -> &str {
        &self.timeframe
    }

    fn warmup_period(&self) -> usize {
        self.slow_period
    }

    fn indicators(&self, df: &mut Dataframe) {
        let fast = ema(&df.close, self.fast_period);
        let slow = sma(&df.close, self.slow_period);
        df.metadata.insert("ema_fast".to_string(), fast);
        df.metadata.insert("sma_slow".to_string(), slow);
    }

    fn on_candle(&self, df: &Dataframe, broker: &dyn Broker) {
        let close = df.close.lookback(0).unwrap_or_default();
        let (asset, quote) = match broker.position(&df.pair) {
            Ok(position) => position,
            Err(e) => {
                tracing::error!(pair = %df.pair, "Position lookup failed: {}", e);
                return;
            }
        };

        let (fast, slow) = (df.series("ema_fast"), df.series("sma_slow"));

        if quote > self.min_quote && fast.crossover(slow) {
            if let Err(e) = broker.create_order_market_quote(Side::Buy, &df.pair, quote / 2.0) {
                tracing::warn!(pair = %df.pair, side = %Side::Buy, close, asset, quote, "Entry rejected: {}", e);
            }
            return;
        }

        if asset > 0.0 && fast.crossunder(slow) {
            if let Err(e) = broker.create_order_market(Side::Sell, &df.pair, asset) {
                tracing::warn!(pair = %df.pair, side = %Side::Sell, close, asset, quote, "Exit rejected: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::PaperWallet;
    use crate::models::Candle;
    use crate::pairs::PairTable;
    use crate::strategy::StrategyController;
    use chrono::{Duration, TimeZone, Utc};
    use std::sync::Arc;

    /// Steady decline, sharp rally, sharp sell-off
    fn prices() -> Vec<f64> {
        let mut prices: Vec<f64> = (0..30).map(|i| 100.0 - i as f64).collect();
        let bottom = *prices.last().unwrap();
        prices.extend((1..=15).map(|i| bottom + 5.0 * i as f64));
        let top = *prices.last().unwrap();
        prices.extend((1..=15).map(|i| top - 8.0 * i as f64));
        prices
    }

    #[test]
    fn test_buys_on_crossover_and_sells_on_crossunder() {
        let wallet = Arc::new(
            PaperWallet::new("USDT", Arc::new(PairTable::with_quote_fallback()))
                .with_asset("USDT", 1000.0),
        );
        let controller =
            StrategyController::new("BTCUSDT", Arc::new(EmaCross::new("1h")), wallet.clone());
        controller.start();

        let start = Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap();
        for (i, close) in prices().into_iter().enumerate() {
            let candle = Candle::new("BTCUSDT", start + Duration::hours(i as i64), close, close, close, close, 10.0);
            wallet.on_candle(&candle);
            controller.on_candle(&candle);
        }

        let sides: Vec<Side> = wallet.orders().iter().map(|o| o.side).collect();
        assert_eq!(sides, vec![Side::Buy, Side::Sell]);

        let (asset, quote) = wallet.position("BTCUSDT").unwrap();
        assert_eq!(asset, 0.0);
        assert!(quote > 0.0);
    }

    #[test]
    fn test_indicator_columns() {
        let mut df = Dataframe::new("BTCUSDT");
        df.close = (1..=21).map(|v| v as f64).collect();

        EmaCross::default().indicators(&mut df);
        assert_eq!(df.series("sma_slow").lookback(0), Some(11.0));
        assert!(df.series("ema_fast")[6].is_nan());
        assert!(!df.series("ema_fast")[7].is_nan());
    }
}
