/// Simple Moving Average of the newest `period` prices
pub fn calculate_sma(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.len() < period {
        return None;
    }

    let sum: f64 = prices.iter().rev().take(period).sum();
    Some(sum / period as f64)
}

/// Exponential Moving Average at the newest price, seeded with the SMA of the first `period`
pub fn calculate_ema(prices: &[f64], period: usize) -> Option<f64> {
    ema(prices, period).last().copied().filter(|v| !v.is_nan())
}

/// SMA series aligned with `prices`; the first `period - 1` slots are NaN
pub fn sma(prices: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; prices.len()];
    if period == 0 || prices.len() < period {
        return out;
    }

    let mut sum: f64 = prices[..period].iter().sum();
    out[period - 1] = sum / period as f64;
    for i in period..prices.len() {
        sum += prices[i] - prices[i - period];
        out[i] = sum / period as f64;
    }
    out
}

/// EMA series aligned with `prices`; the first `period - 1` slots are NaN
pub fn ema(prices: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; prices.len()];
    if period == 0 || prices.len() < period {
        return out;
    }

    let multiplier = 2.0 / (period as f64 + 1.0);

    // Start with SMA
    let mut value = prices[..period].iter().sum::<f64>() / period as f64;
    out[period - 1] = value;
    for i in period..prices.len() {
        value = (prices[i] - value) * multiplier + value;
        out[i] = value;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_sma() {
        let prices = vec![100.0, 102.0, 104.0, 106.0, 108.0];
        assert_eq!(calculate_sma(&prices, 5), Some(104.0));
        assert_eq!(calculate_sma(&prices, 2), Some(107.0));
    }

    #[test]
    fn test_sma_insufficient_data() {
        let prices = vec![100.0, 102.0];
        assert!(calculate_sma(&prices, 5).is_none());
        assert!(calculate_ema(&prices, 5).is_none());
        assert!(sma(&prices, 5).iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_sma_series() {
        let series = sma(&[1.0, 2.0, 3.0, 4.0], 2);
        assert!(series[0].is_nan());
        assert_eq!(&series[1..], &[1.5, 2.5, 3.5]);
    }

    #[test]
    fn test_ema() {
        let prices = vec![100.0, 102.0, 104.0, 106.0, 108.0, 110.0];
        let ema_value = calculate_ema(&prices, 5).unwrap();
        // SMA seed 104, then (110 - 104) / 3 + 104
        assert_relative_eq!(ema_value, 106.0);

        let series = ema(&prices, 5);
        assert!(series[3].is_nan());
        assert_relative_eq!(series[4], 104.0);
        assert_relative_eq!(series[5], ema_value);
    }
}
