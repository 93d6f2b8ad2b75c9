//! Bitget futures position monitor
//!
//! Polls open USDT-margined positions, tracks each position's peak profit and
//! closes it when a tiered trailing stop or the hard stop-loss is breached.

mod api;
mod config;
mod models;
mod monitor;
mod notify;
mod trading;

use std::path::Path;
use std::sync::atomic::Ordering;

use anyhow::Result;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{info, Level};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::{fmt, prelude::*};

use crate::api::{BitgetClient, ExchangeGateway};
use crate::config::AppConfig;
use crate::models::{ClosedTrade, Position, PositionSide};
use crate::monitor::Monitor;
use crate::notify::{FeishuNotifier, NotificationSink};
use crate::trading::{normalize_symbol, PolicyInput, Tier, TrailingStopPolicy};

const BITGET_FUTURES_URL: &str = "https://www.bitget.com/futures/usdt";

/// Daily log files kept on disk, today's included.
const LOG_FILES_KEPT: usize = 7;

/// Bitget trailing-stop position monitor CLI.
#[derive(Parser)]
#[command(name = "trailguard")]
#[command(about = "Protect Bitget futures positions with a tiered trailing stop", long_about = None)]
struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "config.json")]
    config: String,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Directory for the daily rotated log files
    #[arg(long, env = "LOG_DIR", default_value = "log")]
    log_dir: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start monitoring (default)
    Run,

    /// Show open positions with their current profit and tier
    Positions,

    /// Send a sample notice and a sample trade-closed card
    TestNotify,

    /// Validate the config file and print the effective settings
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(LevelFilter::from_level(log_level).into()));

    // Console and a daily rotated file; the guard flushes the file on exit
    let (file_writer, _log_guard) = tracing_appender::non_blocking(log_file(&cli.log_dir)?);
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(
            fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .try_init()?;

    let config = AppConfig::load(&cli.config)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let gateway = BitgetClient::new(
                &config.bitget.api_key,
                &config.bitget.secret,
                &config.bitget.password,
            )?;
            let notifier = FeishuNotifier::new(config.feishu_webhook.clone())?;
            let mut monitor = Monitor::new(
                gateway,
                notifier,
                config.trailing().clone(),
                config.interval(),
            );

            monitor.ensure_hedge_mode().await?;

            println!("\n=== Bitget Position Monitor ===");
            println!("Config:           {}", cli.config);
            println!("Polling interval: {}s", config.monitor_interval);
            println!("Blacklist:        {}", format_blacklist(&config));
            println!(
                "Notifications:    {}",
                if config.feishu_webhook.is_some() { "Feishu" } else { "disabled" }
            );
            println!("\nPress Ctrl+C to stop.\n");

            // Register shutdown handler
            let shutdown = monitor.shutdown_signal();
            tokio::spawn(async move {
                tokio::signal::ctrl_c().await.ok();
                info!("Shutdown signal received");
                shutdown.store(true, Ordering::SeqCst);
            });

            let result = monitor.run().await;

            // Show final stats
            println!("\n{}", monitor.stats());
            result?;
        }

        Commands::Positions => {
            let gateway = BitgetClient::new(
                &config.bitget.api_key,
                &config.bitget.secret,
                &config.bitget.password,
            )?;
            let policy = TrailingStopPolicy::new(config.trailing().clone());
            let positions = gateway.fetch_positions().await?;
            print_positions(&policy, &positions);
        }

        Commands::TestNotify => {
            let notifier = FeishuNotifier::new(config.feishu_webhook.clone())?
                .with_button("Open Bitget", BITGET_FUTURES_URL);
            if !notifier.is_enabled() {
                anyhow::bail!("No Feishu webhook configured (set feishu_webhook or FEISHU_WEBHOOK)");
            }

            let notice = notifier
                .send_notice("Test notice: the position monitor can reach this chat.")
                .await;

            let sample = Position {
                symbol: "BTCUSDT".to_string(),
                side: PositionSide::Long,
                contracts: dec!(0.01),
                entry_price: dec!(60000),
                mark_price: dec!(61800),
                margin_mode: "crossed".to_string(),
                leverage: Some(config.trailing().leverage),
            };
            let trade =
                ClosedTrade::from_snapshot(&sample, dec!(3), dec!(18), "test card", Vec::new());
            let card = notifier.send_trade_closed(&trade).await;

            println!("Notice delivered:     {}", if notice { "yes" } else { "no" });
            println!("Trade card delivered: {}", if card { "yes" } else { "no" });
        }

        Commands::CheckConfig => {
            let trailing = config.trailing();

            println!("\n=== Monitor Configuration ===\n");
            println!("Exchange:");
            println!("  API Key:              {}", mask(&config.bitget.api_key));
            println!("  Passphrase:           {}", if config.bitget.password.is_empty() { "not set" } else { "set" });
            println!("  Leverage:             {}x", trailing.leverage);

            println!("\nStops:");
            println!("  Hard Stop-Loss:       -{}%", trailing.stop_loss_pct);
            println!("  {:<22}armed at {}%, floor {}%", format!("{}:", Tier::LowProtect),
                trailing.low_trail_profit_threshold, trailing.low_trail_stop_loss_pct);
            println!("  {:<22}armed at {}%, gives back {}% of peak", format!("{}:", Tier::Tier1),
                trailing.first_trail_profit_threshold, trailing.trail_stop_loss_pct * dec!(100));
            println!("  {:<22}armed at {}%, gives back {}% of peak", format!("{}:", Tier::Tier2),
                trailing.second_trail_profit_threshold, trailing.higher_trail_stop_loss_pct * dec!(100));
            println!("  Evaluate First Sight: {}", trailing.evaluate_on_first_sight);

            println!("\nLoop:");
            println!("  Interval:             {}s", config.monitor_interval);
            println!("  Blacklist:            {}", format_blacklist(&config));
            println!("  Feishu Webhook:       {}", if config.feishu_webhook.is_some() { "set" } else { "not set" });
        }
    }

    Ok(())
}

fn print_positions(policy: &TrailingStopPolicy, positions: &[Position]) {
    let open: Vec<&Position> = positions.iter().filter(|p| !p.is_flat()).collect();
    if open.is_empty() {
        println!("No open positions.");
        return;
    }

    println!(
        "\n{:<14} {:<6} {:>12} {:>14} {:>14} {:>12} {:>9} {:>9} {:<12}",
        "SYMBOL", "SIDE", "SIZE", "ENTRY", "MARK", "NOTIONAL", "PROFIT%", "ROE%", "TIER"
    );
    println!("{}", "-".repeat(111));

    for position in open {
        let blacklisted = policy
            .config()
            .is_blacklisted(&normalize_symbol(&position.symbol));
        let input = PolicyInput {
            side: position.side,
            entry_price: position.entry_price,
            mark_price: position.mark_price,
            peak_profit_pct: Decimal::ZERO,
            blacklisted,
        };

        let (profit, roe, tier) = match policy.assess(&input) {
            Ok(assessment) => (
                format!("{:.2}", assessment.profit_pct),
                position
                    .leverage
                    .map(|leverage| format!("{:.2}", assessment.profit_pct * leverage))
                    .unwrap_or_else(|| "n/a".to_string()),
                if blacklisted {
                    "blacklisted".to_string()
                } else {
                    assessment.tier.to_string()
                },
            ),
            Err(e) => ("n/a".to_string(), "n/a".to_string(), e.to_string()),
        };

        println!(
            "{:<14} {:<6} {:>12} {:>14} {:>14} {:>12.2} {:>9} {:>9} {:<12}",
            position.symbol,
            position.side,
            position.contracts.normalize(),
            position.entry_price.normalize(),
            position.mark_price.normalize(),
            position.notional(),
            profit,
            roe,
            tier
        );
    }
}

/// `trailguard.YYYY-MM-DD.log` under `dir`, rotated at midnight UTC.
fn log_file(dir: impl AsRef<Path>) -> Result<RollingFileAppender> {
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("trailguard")
        .filename_suffix("log")
        .max_log_files(LOG_FILES_KEPT)
        .build(dir)?;
    Ok(appender)
}

fn format_blacklist(config: &AppConfig) -> String {
    let mut symbols: Vec<&str> = config
        .trailing()
        .blacklist
        .iter()
        .map(String::as_str)
        .collect();
    if symbols.is_empty() {
        return "none".to_string();
    }
    symbols.sort_unstable();
    symbols.join(", ")
}

fn mask(secret: &str) -> String {
    let shown: String = secret.chars().take(4).collect();
    format!("{}****", shown)
}
