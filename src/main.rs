//! Goal-Paced Trader
//!
//! Trades a single base/quote pair toward a rolling weekly return target,
//! accounting for fills with FIFO lots and reporting risk metrics.

mod bot;
mod db;
mod error;
mod intel;
mod ledger;
mod metrics;
mod models;
mod trading;

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::bot::{Bot, BotConfig, BotIo, CycleOutcome};
use crate::db::{Database, MemoryStore, TracingAuditSink};
use crate::intel::{
    HttpPriceFeed, HttpSignalSource, PriceFeed, SignalSource, StaticPriceFeed, StaticSignalSource,
};
use crate::ledger::PositionLedger;
use crate::metrics::per_period_risk_free;
use crate::models::SignalFactor;
use crate::trading::{GoalPacer, TradingConfig};

/// Goal-paced trading engine CLI.
#[derive(Parser)]
#[command(name = "pacetrader")]
#[command(about = "Trade one pair toward a weekly return goal", long_about = None)]
struct Cli {
    /// Database file path
    #[arg(short, long, env = "PACER_DATABASE_URL", default_value = "sqlite:./pacetrader.db?mode=rwc")]
    database: String,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the periodic decision loop
    Run {
        /// Decision interval in milliseconds
        #[arg(short, long)]
        interval_ms: Option<u64>,

        /// Static inputs and in-memory storage
        #[arg(long)]
        dry_run: bool,
    },

    /// Run exactly one decision cycle and print the decision
    Cycle {
        /// Static inputs and in-memory storage
        #[arg(long)]
        dry_run: bool,
    },

    /// Show balances, goal pacing and performance
    Status {
        /// Number of recent decisions to show
        #[arg(short, long, default_value = "5")]
        recent: i64,
    },

    /// Show current configuration
    Config,
}

const DEFAULT_STATIC_PRICE: Decimal = dec!(100);

/// Signal sources from `PACER_<FACTOR>_URL`; factors without a URL stay neutral.
fn http_sources() -> Result<Vec<Arc<dyn SignalSource>>> {
    let mut sources: Vec<Arc<dyn SignalSource>> = Vec::new();
    for factor in SignalFactor::ALL {
        let key = format!("PACER_{}_URL", factor.as_str().to_uppercase());
        match std::env::var(&key) {
            Ok(url) => sources.push(Arc::new(HttpSignalSource::new(factor.as_str(), factor, url)?)),
            Err(_) => warn!(factor = factor.as_str(), env = %key, "No source configured, factor stays neutral"),
        }
    }
    Ok(sources)
}

async fn build_io(database_url: &str, dry_run: bool) -> Result<BotIo> {
    if dry_run {
        let price = match std::env::var("PACER_STATIC_PRICE") {
            Ok(raw) => raw.trim().parse::<Decimal>().context("Invalid PACER_STATIC_PRICE")?,
            Err(_) => DEFAULT_STATIC_PRICE,
        };
        return Ok(BotIo {
            store: Arc::new(MemoryStore::new()),
            audit: Arc::new(TracingAuditSink),
            price_feed: Arc::new(StaticPriceFeed::new(price)),
            sources: StaticSignalSource::neutral_set(),
        });
    }

    let url = std::env::var("PACER_PRICE_URL")
        .context("PACER_PRICE_URL must be set outside of --dry-run")?;
    let price_feed: Arc<dyn PriceFeed> = Arc::new(HttpPriceFeed::new(url)?);
    let db = Arc::new(Database::new(database_url).await?);

    Ok(BotIo {
        store: db.clone(),
        audit: db,
        price_feed,
        sources: http_sources()?,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Setup logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level.to_lowercase()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = TradingConfig::from_env()?;

    match cli.command {
        Commands::Run { interval_ms, dry_run } => {
            if let Some(ms) = interval_ms {
                config.decision_interval_ms = ms;
            }
            config.validate()?;

            info!(
                interval_ms = config.decision_interval_ms,
                dry_run = dry_run,
                "Starting goal-paced trader"
            );

            let io = build_io(&cli.database, dry_run).await?;
            let bot = Bot::restore(BotConfig { trading: config.clone(), dry_run }, io, Utc::now()).await?;

            println!("\n=== Goal-Paced Trader ===");
            println!("Weekly target:  {:.2}%", config.weekly_target_return * 100.0);
            println!("Interval:       {}ms", config.decision_interval_ms);
            println!("Mode:           {}", if dry_run { "DRY RUN (static inputs, nothing saved)" } else { "LIVE" });
            println!("\nPress Ctrl+C to stop.\n");

            if let Err(e) = bot.run().await {
                tracing::error!(error = %e, "Bot error");
            }
        }

        Commands::Cycle { dry_run } => {
            config.validate()?;
            let io = build_io(&cli.database, dry_run).await?;
            let bot = Bot::restore(BotConfig { trading: config, dry_run }, io, Utc::now()).await?;

            match bot.run_cycle(Utc::now()).await? {
                CycleOutcome::Completed(report) => println!("\n{}", report),
                CycleOutcome::Skipped(reason) => println!("Cycle skipped: {}", reason),
            }
        }

        Commands::Status { recent } => {
            let db = Database::new(&cli.database).await?;
            let executions = db.get_executions().await?;
            let snapshots = db.get_snapshots().await?;

            let Some(latest) = snapshots.last().cloned() else {
                println!("No cycles recorded yet. Run 'pacetrader cycle' or 'pacetrader run' first.");
                return Ok(());
            };

            let ledger = PositionLedger::restore(config.starting_value, executions, snapshots)?;
            let view = ledger.report_view();
            let period_rf = per_period_risk_free(config.risk_free_rate, config.decision_interval());
            let report = view.report(latest.price(), period_rf);

            println!("\n=== Portfolio ===");
            println!("Value:            ${:.2}", latest.total_value());
            println!("Quote Balance:    ${:.2}", view.quote_balance);
            println!("Base Balance:     {:.8}", view.base_balance);
            println!("Exposure:         {:.1}%", latest.exposure() * dec!(100));
            println!("Last Price:       {}", latest.price());
            println!("Last Mark:        {}", latest.timestamp());

            if let Some(goal) = db.get_goal_state().await? {
                let pacing = GoalPacer::new(config.pacing.clone()).status(&goal, Utc::now(), latest.total_value());
                println!("\n=== Goal ===");
                println!("Week:             {} -> {}", goal.week_start, goal.week_end());
                println!("Starting Value:   ${:.2}", goal.starting_value);
                println!("Target Value:     ${:.2}", pacing.target_value);
                println!("Expected Now:     ${:.2}", pacing.expected_value);
                println!("Pacing:           {}", pacing.summary());
            }

            println!("\n{}", report);

            if !view.pairs.is_empty() {
                println!("=== Recent Closed Pairs ===");
                for p in view.pairs.iter().rev().take(recent.max(0) as usize) {
                    println!(
                        "  {} -> {} {:.8} @ {} -> {} net ${:.2} ({:.2}%)",
                        p.opened_at.format("%m-%d %H:%M"),
                        p.closed_at.format("%m-%d %H:%M"),
                        p.matched_quantity,
                        p.buy_price,
                        p.sell_price,
                        p.net_profit,
                        p.return_pct() * dec!(100)
                    );
                }
                println!();
            }

            let decisions = db.get_recent_decisions(recent).await?;
            if !decisions.is_empty() {
                println!("=== Recent Decisions ===");
                for d in &decisions {
                    println!(
                        "  {} {:<4} {:.8} @ {} [{}{}] {}",
                        d.timestamp.format("%Y-%m-%d %H:%M:%S"),
                        d.action,
                        d.quantity,
                        d.price,
                        d.urgency,
                        if d.executed { "" } else { ", not executed" },
                        truncate(&d.reasoning, 80)
                    );
                }
            }
        }

        Commands::Config => {
            println!("\n=== Trading Configuration ===\n");
            println!("Goal:");
            println!("  Weekly Target Return: {:.2}%", config.weekly_target_return * 100.0);
            println!("  Starting Value:       ${}", config.starting_value);
            println!("  High Urgency Within:  {} days", config.pacing.high_urgency_days);
            println!("  Medium Urgency Within:{} days", config.pacing.medium_urgency_days);

            println!("\nSizing:");
            println!("  Max Position:         {}%", config.max_position_fraction * dec!(100));
            println!("  Min Cash Reserve:     {}%", config.min_cash_reserve_fraction * dec!(100));
            println!("  Min Trade Notional:   ${}", config.minimum_trade_notional);
            println!("  Fee Rate:             {}%", config.fee_rate * dec!(100));

            println!("\nMarket Score Buckets:");
            println!("  Bearish Below:        {}", config.decision.bearish_below);
            println!("  Bullish Above:        {}", config.decision.bullish_above);

            println!("\nTiming:");
            println!("  Decision Interval:    {}ms", config.decision_interval_ms);
            println!("  Signal Cache TTL:     {}ms", config.cache_ttl_ms);
            println!("  Fetch Timeout:        {}ms", config.fetch_timeout_ms);
            println!("  Risk-Free Rate:       {:.2}% p.a.", config.risk_free_rate * 100.0);

            if let Err(e) = config.validate() {
                println!("\nWARNING: {}", e);
            }
        }
    }

    Ok(())
}

/// Truncate a string for display.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}
