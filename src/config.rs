//! Runtime settings and logging setup.
//!
//! Settings are layered: built-in defaults, then an optional TOML file, then
//! `CANDLEBOT_*` environment variables (`__` separates nested keys, e.g.
//! `CANDLEBOT_LOG__LEVEL=debug`). The CLI applies its own overrides on top.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::Error;
use crate::feed::PairFeed;
use crate::Result;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    pub pairs: Vec<String>,
    pub base_coin: String,
    pub initial_balance: f64,
    pub timeframe: String,
    pub fees: FeeSettings,
    pub controller: ControllerSettings,
    #[serde(default)]
    pub storage: StorageSettings,
    pub log: LogSettings,
    #[serde(default)]
    pub feeds: Vec<FeedSettings>,
}

/// Fee rates used for the cost estimate in reports
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FeeSettings {
    pub maker: f64,
    pub taker: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ControllerSettings {
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StorageSettings {
    /// JSON file for orders and positions; in memory when unset
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// One historical CSV file
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FeedSettings {
    pub pair: String,
    pub file: PathBuf,
    pub timeframe: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            _ => Err(format!("Unknown log format: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogSettings {
    /// Filter directive, e.g. "info" or "candlebot=debug"
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl Settings {
    /// Load defaults, the optional file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder()
            .set_default("pairs", vec!["BTCUSDT"])?
            .set_default("base_coin", "USDT")?
            .set_default("initial_balance", 10_000.0)?
            .set_default("timeframe", "1h")?
            .set_default("fees.maker", 0.001)?
            .set_default("fees.taker", 0.001)?
            .set_default("controller.poll_interval_ms", 1_000)?
            .set_default("log.level", "info")?
            .set_default("log.format", "pretty")?;

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }

        let settings: Settings = builder
            .add_source(
                config::Environment::with_prefix("CANDLEBOT")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("pairs"),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.pairs.is_empty() {
            return Err(config::ConfigError::Message("no pairs configured".to_string()).into());
        }
        if self.initial_balance < 0.0 {
            return Err(Error::InvalidQuantity);
        }
        crate::feed::parse_timeframe(&self.timeframe)?;
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.controller.poll_interval_ms.max(1))
    }

    /// Configured CSV files, restricted to the traded pairs
    pub fn pair_feeds(&self) -> Vec<PairFeed> {
        self.feeds
            .iter()
            .filter(|f| self.pairs.contains(&f.pair))
            .map(|f| PairFeed {
                pair: f.pair.clone(),
                file: f.file.clone(),
                timeframe: f.timeframe.clone(),
            })
            .collect()
    }
}

/// Install the global tracing subscriber
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_logging(settings: &LogSettings) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.level))
        .map_err(|e| config::ConfigError::Message(e.to_string()))?;

    let registry = tracing_subscriber::registry().with(env_filter);
    let installed = match settings.format {
        LogFormat::Pretty => registry.with(fmt::layer().pretty().with_target(true)).try_init(),
        LogFormat::Compact => registry.with(fmt::layer().compact().with_target(false)).try_init(),
    };
    installed.map_err(|e| config::ConfigError::Message(e.to_string()))?;

    tracing::info!(format = ?settings.format, level = %settings.level, "Logging initialized");
    Ok(())
}
