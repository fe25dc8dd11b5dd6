use anyhow::{bail, Context};
use candlebot::config::{init_logging, Settings};
use candlebot::feed::{parse_timeframe, CsvFeed, MarketScenario, PairFeed, SyntheticDataGenerator, SyntheticFeed};
use candlebot::notification::LogNotifier;
use candlebot::storage::{FileStorage, Storage};
use candlebot::strategy::{EmaCross, TrailingStopStrategy};
use candlebot::{Bot, PaperWallet, PairTable, Strategy};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "candlebot")]
#[command(about = "Candle-driven strategy runner with a paper exchange", long_about = None)]
struct Cli {
    /// Settings file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log filter, overrides the settings file
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Traded pairs, comma separated
    #[arg(long, global = true, value_delimiter = ',')]
    pairs: Vec<String>,

    /// Starting balance in the base coin
    #[arg(long, global = true)]
    balance: Option<f64>,

    /// Strategy timeframe
    #[arg(long, global = true)]
    timeframe: Option<String>,

    #[arg(long, global = true, value_enum, default_value = "ema-cross")]
    strategy: StrategyKind,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay historical candles from CSV files or a generated market
    Backtest {
        /// Historical file as PAIR=PATH, repeatable; adds to the configured feeds
        #[arg(long = "feed")]
        feeds: Vec<String>,

        /// Timeframe of the files given with --feed
        #[arg(long, default_value = "1h")]
        feed_timeframe: String,

        /// Generate the market instead of reading files
        #[arg(long)]
        scenario: Option<String>,

        /// Generated bars per pair
        #[arg(long, default_value_t = 500)]
        candles: usize,

        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
    /// Paper trade against a generated market in real time
    Paper {
        #[arg(long, default_value = "sideways")]
        scenario: String,

        /// Live bars per pair
        #[arg(long, default_value_t = 200)]
        bars: usize,

        /// Wall time per bar in milliseconds
        #[arg(long, default_value_t = 500)]
        tick_ms: u64,

        #[arg(long, default_value_t = 7)]
        seed: u64,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StrategyKind {
    EmaCross,
    Trailing,
}

fn build_strategy(kind: StrategyKind, timeframe: &str) -> Arc<dyn Strategy> {
    match kind {
        StrategyKind::EmaCross => Arc::new(EmaCross::new(timeframe)),
        StrategyKind::Trailing => Arc::new(TrailingStopStrategy::new(timeframe)),
    }
}

fn apply_overrides(settings: &mut Settings, cli: &Cli) {
    if let Some(level) = &cli.log_level {
        settings.log.level = level.clone();
    }
    if !cli.pairs.is_empty() {
        settings.pairs = cli.pairs.iter().map(|p| p.to_uppercase()).collect();
    }
    if let Some(balance) = cli.balance {
        settings.initial_balance = balance;
    }
    if let Some(timeframe) = &cli.timeframe {
        settings.timeframe = timeframe.clone();
    }
}

fn parse_feed(raw: &str, timeframe: &str) -> anyhow::Result<PairFeed> {
    let Some((pair, file)) = raw.split_once('=') else {
        bail!("feed '{}' must look like PAIR=PATH", raw);
    };
    Ok(PairFeed {
        pair: pair.to_uppercase(),
        file: PathBuf::from(file),
        timeframe: timeframe.to_string(),
    })
}

fn open_storage(settings: &Settings) -> anyhow::Result<Option<Arc<dyn Storage>>> {
    match &settings.storage.path {
        Some(path) => {
            let storage: Arc<dyn Storage> = Arc::new(
                FileStorage::open(path)
                    .with_context(|| format!("opening storage {}", path.display()))?,
            );
            Ok(Some(storage))
        }
        None => Ok(None),
    }
}

fn paper_wallet(settings: &Settings, pairs: &Arc<PairTable>) -> PaperWallet {
    PaperWallet::new(&settings.base_coin, pairs.clone())
        .with_asset(&settings.base_coin, settings.initial_balance)
        .with_fees(settings.fees.maker, settings.fees.taker)
}

async fn run_bot(settings: &Settings, bot: Bot) -> anyhow::Result<()> {
    tokio::select! {
        result = bot.run() => result.context("bot run failed")?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("⚠️  Received Ctrl+C, shutting down...");
        }
    }

    bot.stop().await;
    println!("\n📊 {} {} | {}", settings.base_coin, settings.timeframe, settings.pairs.join(", "));
    bot.summary();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut settings = Settings::load(cli.config.as_deref()).context("loading settings")?;
    apply_overrides(&mut settings, &cli);
    parse_timeframe(&settings.timeframe)?;
    init_logging(&settings.log)?;

    tracing::info!("🚀 candlebot starting");

    let pair_table = Arc::new(PairTable::with_quote_fallback());
    let strategy = build_strategy(cli.strategy, &settings.timeframe);
    let storage = open_storage(&settings)?;

    match &cli.command {
        Commands::Backtest {
            feeds,
            feed_timeframe,
            scenario,
            candles,
            seed,
        } => {
            let feed = match scenario {
                Some(scenario) => {
                    let scenario: MarketScenario = scenario.parse()?;
                    let minutes = parse_timeframe(&settings.timeframe)?.num_minutes().max(1);
                    let mut generated = settings.pairs.iter().enumerate().map(|(i, pair)| {
                        let bars = SyntheticDataGenerator::new(seed + i as u64)
                            .for_pair(pair)
                            .generate(scenario, *candles, minutes);
                        (pair, bars)
                    });

                    let (first, data) = generated.next().context("no pairs to generate")?;
                    let feed = CsvFeed::from_candles(first, &settings.timeframe, data, &settings.timeframe)?;
                    for (pair, data) in generated {
                        feed.add_candles(pair, &settings.timeframe, data, &settings.timeframe)?;
                    }
                    feed
                }
                None => {
                    let mut pair_feeds = settings.pair_feeds();
                    for raw in feeds {
                        pair_feeds.push(parse_feed(raw, feed_timeframe)?);
                    }
                    if pair_feeds.is_empty() {
                        bail!("no historical data: pass --feed PAIR=PATH or --scenario");
                    }
                    settings.pairs = pair_feeds.iter().map(|f| f.pair.clone()).collect();
                    settings.pairs.sort();
                    settings.pairs.dedup();
                    CsvFeed::new(&settings.timeframe, pair_feeds).context("loading historical candles")?
                }
            };

            let wallet = Arc::new(paper_wallet(&settings, &pair_table).with_feeder(Arc::new(feed)));
            let mut builder = Bot::builder(&settings.pairs, strategy, wallet, pair_table)
                .notifier(Arc::new(LogNotifier))
                .poll_interval(settings.poll_interval())
                .backtest(true);
            if let Some(storage) = storage {
                builder = builder.storage(storage);
            }
            run_bot(&settings, builder.build()).await
        }
        Commands::Paper {
            scenario,
            bars,
            tick_ms,
            seed,
        } => {
            let scenario: MarketScenario = scenario.parse()?;
            let feed = SyntheticFeed::new(&settings.timeframe, Duration::from_millis(*tick_ms))?;
            let history = strategy.warmup_period().max(1) * 2;
            for (i, pair) in settings.pairs.iter().enumerate() {
                feed.add_pair(pair, scenario, seed + i as u64, history, *bars)?;
            }

            let wallet = Arc::new(paper_wallet(&settings, &pair_table).with_feeder(Arc::new(feed)));
            let mut builder = Bot::builder(&settings.pairs, strategy, wallet, pair_table)
                .notifier(Arc::new(LogNotifier))
                .poll_interval(settings.poll_interval());
            if let Some(storage) = storage {
                builder = builder.storage(storage);
            }
            run_bot(&settings, builder.build()).await
        }
    }
}
