use chrono::{DateTime, Utc};
use std::collections::HashMap;

use super::Candle;

/// Column store of the candles a strategy has seen for one pair
#[derive(Debug, Clone, Default)]
pub struct Dataframe {
    pub pair: String,

    pub close: Vec<f64>,
    pub open: Vec<f64>,
    pub high: Vec<f64>,
    pub low: Vec<f64>,
    pub volume: Vec<f64>,

    pub time: Vec<DateTime<Utc>>,
    pub last_update: Option<DateTime<Utc>>,

    /// Indicator output and CSV metadata, one series per name
    pub metadata: HashMap<String, Vec<f64>>,
}

impl Dataframe {
    pub fn new(pair: &str) -> Self {
        Self {
            pair: pair.to_string(),
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.close.len()
    }

    pub fn is_empty(&self) -> bool {
        self.close.is_empty()
    }

    /// Append a bar, or overwrite the last row when the bar is a re-emission of the same time
    pub fn update(&mut self, candle: &Candle) {
        let same_bar = self.time.last() == Some(&candle.time);

        if same_bar {
            let last = self.close.len() - 1;
            self.close[last] = candle.close;
            self.open[last] = candle.open;
            self.high[last] = candle.high;
            self.low[last] = candle.low;
            self.volume[last] = candle.volume;
            for (key, value) in &candle.metadata {
                if let Some(series) = self.metadata.get_mut(key) {
                    if let Some(slot) = series.last_mut() {
                        *slot = *value;
                    }
                }
            }
        } else {
            self.close.push(candle.close);
            self.open.push(candle.open);
            self.high.push(candle.high);
            self.low.push(candle.low);
            self.volume.push(candle.volume);
            self.time.push(candle.time);
            for (key, value) in &candle.metadata {
                self.metadata.entry(key.clone()).or_default().push(*value);
            }
        }

        self.last_update = Some(candle.time);
    }

    pub fn series(&self, name: &str) -> &[f64] {
        self.metadata.get(name).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Lookback helpers over a value series (oldest first)
pub trait Series {
    /// Value `position` steps back from the newest one
    fn lookback(&self, position: usize) -> Option<f64>;

    /// Newest `size` values
    fn last_values(&self, size: usize) -> &[f64];

    /// True when this series just moved above `reference`
    fn crossover(&self, reference: &[f64]) -> bool;

    /// True when this series just moved below `reference`
    fn crossunder(&self, reference: &[f64]) -> bool;

    fn cross(&self, reference: &[f64]) -> bool {
        self.crossover(reference) || self.crossunder(reference)
    }
}

impl Series for [f64] {
    fn lookback(&self, position: usize) -> Option<f64> {
        self.len()
            .checked_sub(position + 1)
            .and_then(|idx| self.get(idx).copied())
    }

    fn last_values(&self, size: usize) -> &[f64] {
        let start = self.len().saturating_sub(size);
        &self[start..]
    }

    fn crossover(&self, reference: &[f64]) -> bool {
        match (self.lookback(0), self.lookback(1), reference.lookback(0), reference.lookback(1)) {
            (Some(now), Some(prev), Some(ref_now), Some(ref_prev)) => {
                now > ref_now && prev <= ref_prev
            }
            _ => false,
        }
    }

    fn crossunder(&self, reference: &[f64]) -> bool {
        match (self.lookback(0), self.lookback(1), reference.lookback(0), reference.lookback(1)) {
            (Some(now), Some(prev), Some(ref_now), Some(ref_prev)) => {
                now <= ref_now && prev > ref_prev
            }
            _ => false,
        }
    }
}
