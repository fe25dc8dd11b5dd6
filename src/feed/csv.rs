use chrono::{DateTime, TimeZone, Utc};
use std::collections::{HashMap, VecDeque};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use super::{feed_key, resample, CandleStream, Feeder};
use crate::error::Error;
use crate::models::Candle;
use crate::Result;

/// Column order of headerless files
const DEFAULT_COLUMNS: [&str; 6] = ["time", "open", "close", "low", "high", "volume"];

/// One historical file for a pair
#[derive(Debug, Clone)]
pub struct PairFeed {
    pub pair: String,
    pub file: PathBuf,
    pub timeframe: String,
}

/// Historical candle source backed by CSV files
///
/// Keeps one queue per (pair, timeframe). `candles_by_limit` consumes from the front,
/// so a warmup read followed by a subscription replays each candle exactly once.
pub struct CsvFeed {
    feeds: HashMap<String, PairFeed>,
    candles: RwLock<HashMap<String, VecDeque<Candle>>>,
}

impl CsvFeed {
    /// Load every file and resample it to `target_timeframe`
    pub fn new(target_timeframe: &str, feeds: Vec<PairFeed>) -> Result<Self> {
        let mut feed = Self {
            feeds: HashMap::new(),
            candles: RwLock::new(HashMap::new()),
        };

        for pair_feed in feeds {
            let candles = load_file(&pair_feed.file, &pair_feed.pair)?;
            tracing::info!(
                pair = %pair_feed.pair,
                timeframe = %pair_feed.timeframe,
                "Loaded {} candles from {}",
                candles.len(),
                pair_feed.file.display()
            );
            feed.insert(&pair_feed.pair, &pair_feed.timeframe, candles);
            feed.resample(&pair_feed.pair, &pair_feed.timeframe, target_timeframe)?;
            feed.feeds.insert(pair_feed.pair.clone(), pair_feed);
        }

        Ok(feed)
    }

    /// Feed over candles already in memory
    pub fn from_candles(
        pair: &str,
        timeframe: &str,
        candles: Vec<Candle>,
        target_timeframe: &str,
    ) -> Result<Self> {
        let feed = Self {
            feeds: HashMap::new(),
            candles: RwLock::new(HashMap::new()),
        };
        feed.add_candles(pair, timeframe, candles, target_timeframe)?;
        Ok(feed)
    }

    /// Register in-memory candles of another pair
    pub fn add_candles(
        &self,
        pair: &str,
        timeframe: &str,
        candles: Vec<Candle>,
        target_timeframe: &str,
    ) -> Result<()> {
        self.insert(pair, timeframe, candles);
        self.resample(pair, timeframe, target_timeframe)
    }

    /// Source file registered for a pair
    pub fn pair_feed(&self, pair: &str) -> Option<&PairFeed> {
        self.feeds.get(pair)
    }

    fn insert(&self, pair: &str, timeframe: &str, candles: Vec<Candle>) {
        let mut data = self.candles.write().unwrap_or_else(PoisonError::into_inner);
        data.insert(feed_key(pair, timeframe), candles.into());
    }

    /// Derive the `target` series of a pair from its `source` series
    pub fn resample(&self, pair: &str, source: &str, target: &str) -> Result<()> {
        let mut data = self.candles.write().unwrap_or_else(PoisonError::into_inner);
        let source_candles: Vec<Candle> = data
            .get(&feed_key(pair, source))
            .map(|deque| deque.iter().cloned().collect())
            .unwrap_or_default();

        let resampled = resample::resample(&source_candles, source, target)?;
        tracing::debug!(
            pair,
            "Resampled {} {} candles into {} {} candles",
            source_candles.len(),
            source,
            resampled.len(),
            target
        );
        data.insert(feed_key(pair, target), resampled.into());
        Ok(())
    }

    /// Number of candles still queued for a feed
    pub fn len(&self, pair: &str, timeframe: &str) -> usize {
        let data = self.candles.read().unwrap_or_else(PoisonError::into_inner);
        data.get(&feed_key(pair, timeframe)).map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self, pair: &str, timeframe: &str) -> bool {
        self.len(pair, timeframe) == 0
    }
}

impl Feeder for CsvFeed {
    fn last_quote(&self, pair: &str) -> Result<f64> {
        let data = self.candles.read().unwrap_or_else(PoisonError::into_inner);
        let prefix = feed_key(pair, "");

        data.iter()
            .filter(|(key, _)| key.starts_with(&prefix))
            .filter_map(|(_, candles)| candles.back())
            .max_by(|a, b| a.chronological_cmp(b))
            .map(|candle| candle.close)
            .ok_or_else(|| Error::InsufficientData(pair.to_string()))
    }

    fn candles_by_period(
        &self,
        pair: &str,
        timeframe: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        let data = self.candles.read().unwrap_or_else(PoisonError::into_inner);

        Ok(data
            .get(&feed_key(pair, timeframe))
            .map(|deque| {
                deque
                    .iter()
                    .filter(|c| c.time >= start && c.time <= end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn candles_by_limit(&self, pair: &str, timeframe: &str, limit: usize) -> Result<Vec<Candle>> {
        let mut data = self.candles.write().unwrap_or_else(PoisonError::into_inner);
        let queue = data.entry(feed_key(pair, timeframe)).or_default();

        if queue.len() < limit {
            return Err(Error::InsufficientData(format!(
                "{} {}: need {}, have {}",
                pair,
                timeframe,
                limit,
                queue.len()
            )));
        }

        Ok(queue.drain(..limit).collect())
    }

    fn candles_subscription(&self, pair: &str, timeframe: &str) -> CandleStream {
        let key = feed_key(pair, timeframe);
        let candles: Option<Vec<Candle>> = {
            let data = self.candles.read().unwrap_or_else(PoisonError::into_inner);
            data.get(&key).map(|deque| deque.iter().cloned().collect())
        };

        let (data_tx, err_tx, stream) = CandleStream::channel(64);
        tokio::spawn(async move {
            let Some(candles) = candles else {
                let _ = err_tx.send(Error::InsufficientData(key)).await;
                return;
            };
            for candle in candles {
                if data_tx.send(candle).await.is_err() {
                    break;
                }
            }
        });

        stream
    }
}

/// Read a candle file from disk
pub fn load_file(path: &Path, pair: &str) -> Result<Vec<Candle>> {
    let file = std::fs::File::open(path)?;
    parse_candles(file, pair)
}

/// Parse candle rows
///
/// A first row whose first field is not an integer is a header: its names map columns,
/// and columns other than time/open/close/low/high/volume become candle metadata.
/// Without a header the layout is `time,open,close,low,high,volume` with unix seconds.
pub fn parse_candles<R: Read>(reader: R, pair: &str) -> Result<Vec<Candle>> {
    let mut reader = ::csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(::csv::Trim::All)
        .from_reader(reader);

    let mut columns: HashMap<String, usize> = DEFAULT_COLUMNS
        .iter()
        .enumerate()
        .map(|(i, name)| (name.to_string(), i))
        .collect();
    let mut extra: Vec<(String, usize)> = Vec::new();
    let mut candles = Vec::new();

    for (line, record) in reader.records().enumerate() {
        let record = record?;

        if line == 0 && record.get(0).map_or(false, |f| f.parse::<i64>().is_err()) {
            for (index, name) in record.iter().enumerate() {
                let name = name.to_lowercase();
                if !DEFAULT_COLUMNS.contains(&name.as_str()) {
                    extra.push((name.clone(), index));
                }
                columns.insert(name, index);
            }
            continue;
        }

        let line = line + 1;
        let raw_time = column(&record, &columns, "time", line)?;
        let timestamp: i64 = raw_time
            .parse()
            .map_err(|_| Error::Parse(format!("line {}: invalid time '{}'", line, raw_time)))?;
        let time = Utc
            .timestamp_opt(timestamp, 0)
            .single()
            .ok_or_else(|| Error::Parse(format!("line {}: time out of range", line)))?;

        let mut candle = Candle::new(
            pair,
            time,
            number(&record, &columns, "open", line)?,
            number(&record, &columns, "high", line)?,
            number(&record, &columns, "low", line)?,
            number(&record, &columns, "close", line)?,
            number(&record, &columns, "volume", line)?,
        );
        for (name, index) in &extra {
            if let Some(raw) = record.get(*index) {
                let value = raw.parse::<f64>().map_err(|_| {
                    Error::Parse(format!("line {}: invalid {} '{}'", line, name, raw))
                })?;
                candle.metadata.insert(name.clone(), value);
            }
        }

        candles.push(candle);
    }

    Ok(candles)
}

fn column<'a>(
    record: &'a ::csv::StringRecord,
    columns: &HashMap<String, usize>,
    name: &str,
    line: usize,
) -> Result<&'a str> {
    columns
        .get(name)
        .and_then(|index| record.get(*index))
        .ok_or_else(|| Error::Parse(format!("line {}: missing column {}", line, name)))
}

fn number(
    record: &::csv::StringRecord,
    columns: &HashMap<String, usize>,
    name: &str,
    line: usize,
) -> Result<f64> {
    let raw = column(record, columns, name, line)?;
    raw.parse::<f64>()
        .map_err(|_| Error::Parse(format!("line {}: invalid {} '{}'", line, name, raw)))
}
