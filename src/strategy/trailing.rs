use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::exchange::Broker;
use crate::indicators::{ema, sma};
use crate::models::{Dataframe, Series, Side};
use crate::strategy::Strategy;
use crate::tools::TrailingStop;

/// Enters on an EMA/SMA crossover and exits intra-bar through a trailing stop
///
/// The stop starts at the low of the entry bar and is checked on every partial candle.
pub struct TrailingStopStrategy {
    timeframe: String,
    min_quote: f64,
    stops: Mutex<HashMap<String, TrailingStop>>,
}

impl TrailingStopStrategy {
    pub fn new(timeframe: &str) -> Self {
        Self {
            timeframe: timeframe.to_string(),
            min_quote: 10.0,
            stops: Mutex::new(HashMap::new()),
        }
    }

    fn stops(&self) -> MutexGuard<'_, HashMap<String, TrailingStop>> {
        self.stops.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether a trailing stop is armed for the pair
    pub fn is_trailing(&self, pair: &str) -> bool {
        self.stops().get(pair).map_or(false, TrailingStop::active)
    }
}

impl Strategy for TrailingStopStrategy {
    fn name(&self) -> &str {
        "TrailingStop"
    }

    fn timeframe(&self) -> &str {
        &self.timeframe
    }

    fn warmup_period(&self) -> usize {
        21
    }

    fn indicators(&self, df: &mut Dataframe) {
        let fast = ema(&df.close, 8);
        let slow = sma(&df.close, 21);
        df.metadata.insert("ema_fast".to_string(), fast);
        df.metadata.insert("sma_slow".to_string(), slow);
    }

    fn on_candle(&self, df: &Dataframe, broker: &dyn Broker) {
        let (Some(close), Some(low)) = (df.close.lookback(0), df.low.lookback(0)) else {
            return;
        };
        let (asset, quote) = match broker.position(&df.pair) {
            Ok(position) => position,
            Err(e) => {
                tracing::error!(pair = %df.pair, "Position lookup failed: {}", e);
                return;
            }
        };

        let flat = asset * close < self.min_quote;
        if quote > self.min_quote && flat && df.series("ema_fast").crossover(df.series("sma_slow")) {
            if let Err(e) = broker.create_order_market_quote(Side::Buy, &df.pair, quote) {
                tracing::warn!(pair = %df.pair, close, quote, "Entry rejected: {}", e);
                return;
            }

            let mut stops = self.stops();
            let stop = stops.entry(df.pair.clone()).or_default();
            if let Err(e) = stop.start(Side::Buy, close, low) {
                tracing::warn!(pair = %df.pair, "Trailing stop not armed: {}", e);
            }
        }
    }

    fn handles_partial_candles(&self) -> bool {
        true
    }

    fn on_partial_candle(&self, df: &Dataframe, broker: &dyn Broker) {
        let Some(close) = df.close.lookback(0) else {
            return;
        };

        let mut stops = self.stops();
        let Some(stop) = stops.get_mut(&df.pair) else {
            return;
        };
        if !stop.update(close) {
            return;
        }

        let asset = match broker.position(&df.pair) {
            Ok((asset, _)) => asset,
            Err(e) => {
                tracing::error!(pair = %df.pair, "Position lookup failed: {}", e);
                return;
            }
        };
        if asset > 0.0 {
            match broker.create_order_market(Side::Sell, &df.pair, asset) {
                Ok(_) => {
                    tracing::info!(pair = %df.pair, close, stop = stop.level(), "Trailing stop hit");
                    stop.stop();
                }
                Err(e) => tracing::warn!(pair = %df.pair, asset, "Exit rejected: {}", e),
            }
        }
    }
}
