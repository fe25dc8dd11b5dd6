use candlebot::exchange::WalletSummary;
use candlebot::feed::{CsvFeed, MarketScenario, SyntheticDataGenerator};
use candlebot::strategy::EmaCross;
use candlebot::{Bot, PaperWallet, PairTable, Result};
use std::sync::Arc;

const PAIR: &str = "SYNTHUSDT";
const TIMEFRAME: &str = "1h";
const INITIAL_BALANCE: f64 = 10_000.0;

struct ScenarioResult {
    name: &'static str,
    wallet: WalletSummary,
    trades: usize,
    win_rate: f64,
}

async fn run_scenario(scenario: MarketScenario, label: &'static str) -> Result<ScenarioResult> {
    let candles = SyntheticDataGenerator::new(42).for_pair(PAIR).generate(scenario, 500, 60);
    let feed = CsvFeed::from_candles(PAIR, TIMEFRAME, candles, TIMEFRAME)?;

    let pairs = Arc::new(PairTable::with_quote_fallback());
    let wallet = Arc::new(
        PaperWallet::new("USDT", pairs.clone())
            .with_asset("USDT", INITIAL_BALANCE)
            .with_feeder(Arc::new(feed)),
    );

    let bot = Bot::builder(&[PAIR.to_string()], Arc::new(EmaCross::new(TIMEFRAME)), wallet, pairs)
        .backtest(true)
        .build();
    bot.run().await?;
    bot.stop().await;

    let summary = bot.controller().summary(PAIR);
    Ok(ScenarioResult {
        name: label,
        wallet: bot.wallet_summary(),
        trades: summary.as_ref().map_or(0, |s| s.trades()),
        win_rate: summary.as_ref().map_or(0.0, |s| s.win_percentage()),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("candlebot=warn")
        .init();

    println!("\n╔═══════════════════════════════════════════════════════╗");
    println!("║          CANDLEBOT SCENARIO SUITE                     ║");
    println!("╚═══════════════════════════════════════════════════════╝");

    let scenarios = [
        (MarketScenario::Uptrend, "📈 Uptrend (+2% daily)"),
        (MarketScenario::Downtrend, "📉 Downtrend (-2% daily)"),
        (MarketScenario::Sideways, "↔️  Sideways (mean-reverting)"),
        (MarketScenario::Volatile, "⚡ Volatile (±5% swings)"),
        (MarketScenario::WithGaps, "🕳️  With Time Gaps"),
        (MarketScenario::DrawdownTest, "💥 Drawdown Test (25% drop)"),
    ];

    let mut results = Vec::new();
    for (scenario, label) in scenarios {
        match run_scenario(scenario, label).await {
            Ok(result) => results.push(result),
            Err(e) => eprintln!("❌ Backtest failed for {}: {}", label, e),
        }
    }

    print_comparison(&results);
    Ok(())
}

fn print_comparison(results: &[ScenarioResult]) {
    println!("\n╔═══════════════════════════════════════════════════════╗");
    println!("║              SCENARIO COMPARISON                      ║");
    println!("╚═══════════════════════════════════════════════════════╝\n");

    println!(
        "{:<30} {:>10} {:>10} {:>10} {:>8} {:>8}",
        "Scenario", "P&L", "Return%", "Market%", "Trades", "Win%"
    );
    println!("{}", "─".repeat(82));

    for result in results {
        println!(
            "{:<30} {:>10.2} {:>10.2} {:>10.2} {:>8} {:>8.1}",
            result.name,
            result.wallet.gross_profit,
            result.wallet.return_pct(),
            result.wallet.market_change,
            result.trades,
            result.win_rate
        );
    }

    let by_return = |a: &&ScenarioResult, b: &&ScenarioResult| {
        a.wallet.return_pct().total_cmp(&b.wallet.return_pct())
    };
    if let Some(best) = results.iter().max_by(by_return) {
        println!("\n🏆 Best Scenario: {} ({:+.2}%)", best.name, best.wallet.return_pct());
    }
    if let Some(worst) = results.iter().min_by(by_return) {
        println!("⚠️  Worst Scenario: {} ({:+.2}%)", worst.name, worst.wallet.return_pct());
    }

    let total_trades: usize = results.iter().map(|r| r.trades).sum();
    println!("\n📊 Total trades across all scenarios: {}", total_trades);
    println!("\n═══════════════════════════════════════════════════════\n");
}
