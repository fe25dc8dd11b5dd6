use chrono::{DateTime, Datelike, Duration, Timelike, Utc, Weekday};

use crate::error::Error;
use crate::models::Candle;
use crate::Result;

/// Parse a timeframe such as `30s`, `15m`, `4h`, `1d` or `1w`
pub fn parse_timeframe(timeframe: &str) -> Result<Duration> {
    let invalid = || Error::InvalidTimeframe(timeframe.to_string());

    let split = timeframe
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(invalid)?;
    let (amount, unit) = timeframe.split_at(split);
    let amount: i64 = amount.parse().map_err(|_| invalid())?;
    if amount <= 0 {
        return Err(invalid());
    }

    match unit {
        "s" => Ok(Duration::seconds(amount)),
        "m" => Ok(Duration::minutes(amount)),
        "h" => Ok(Duration::hours(amount)),
        "d" => Ok(Duration::days(amount)),
        "w" => Ok(Duration::weeks(amount)),
        _ => Err(invalid()),
    }
}

/// Whether the source bar opened at `time` is the last one of its target period
///
/// Decided on the time the source bar closes (`time + source duration`), so a 1h bar
/// opened at 03:00 closes a 4h period.
pub fn is_last_candle_period(
    time: DateTime<Utc>,
    from_timeframe: &str,
    target_timeframe: &str,
) -> Result<bool> {
    if from_timeframe == target_timeframe {
        return Ok(true);
    }

    let next = time + parse_timeframe(from_timeframe)?;
    let (minute, hour) = (next.minute(), next.hour());

    let last = match target_timeframe {
        "1m" => next.second() == 0,
        "3m" => next.second() == 0 && minute % 3 == 0,
        "5m" => next.second() == 0 && minute % 5 == 0,
        "10m" => next.second() == 0 && minute % 10 == 0,
        "15m" => next.second() == 0 && minute % 15 == 0,
        "30m" => next.second() == 0 && minute % 30 == 0,
        "1h" => minute == 0,
        "2h" => minute == 0 && hour % 2 == 0,
        "4h" => minute == 0 && hour % 4 == 0,
        "6h" => minute == 0 && hour % 6 == 0,
        "8h" => minute == 0 && hour % 8 == 0,
        "12h" => minute == 0 && hour % 12 == 0,
        "1d" => minute == 0 && hour % 24 == 0,
        "1w" => minute == 0 && hour % 24 == 0 && next.weekday() == Weekday::Sun,
        _ => return Err(Error::InvalidTimeframe(target_timeframe.to_string())),
    };

    Ok(last)
}

/// Whether the source bar opened at `time` starts a target period
pub fn is_first_candle_period(
    time: DateTime<Utc>,
    from_timeframe: &str,
    target_timeframe: &str,
) -> Result<bool> {
    let previous = time - parse_timeframe(from_timeframe)?;
    is_last_candle_period(previous, from_timeframe, target_timeframe)
}

/// Aggregate source bars into target-timeframe bars
///
/// Leading bars before the first period boundary are skipped. Every source bar produces
/// one emission of the target bar built so far; only the last bar of a period is
/// `complete`. A trailing period that never completes is dropped entirely.
pub fn resample(
    candles: &[Candle],
    from_timeframe: &str,
    target_timeframe: &str,
) -> Result<Vec<Candle>> {
    let mut start = candles.len();
    for (i, candle) in candles.iter().enumerate() {
        if is_first_candle_period(candle.time, from_timeframe, target_timeframe)? {
            start = i;
            break;
        }
    }

    let mut resampled: Vec<Candle> = Vec::with_capacity(candles.len() - start);
    for source in &candles[start..] {
        let mut candle = source.clone();
        candle.complete = is_last_candle_period(source.time, from_timeframe, target_timeframe)?;
        candle.updated_at = source.time;

        if let Some(previous) = resampled.last().filter(|c| !c.complete) {
            candle.time = previous.time;
            candle.open = previous.open;
            candle.high = previous.high.max(source.high);
            candle.low = previous.low.min(source.low);
            candle.volume += previous.volume;
            candle.trades += previous.trades;
        }

        resampled.push(candle);
    }

    while resampled.last().map_or(false, |c| !c.complete) {
        resampled.pop();
    }

    Ok(resampled)
}
