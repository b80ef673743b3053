//! Fib Grid Bot - Main Entry Point
//!
//! Fibonacci-level grid trading on a single OKX perpetual swap, with a
//! paper-trading mode backed by an in-memory venue.

use anyhow::Result;
use clap::{Parser, Subcommand};
use fib_grid_bot::config::Config;
use fib_grid_bot::engine::Engine;
use fib_grid_bot::exchange::{Exchange, MockExchange, OkxClient};
use fib_grid_bot::grid::LevelTable;
use fib_grid_bot::notify::TelegramNotifier;
use fib_grid_bot::persistence::PersistenceManager;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

/// Fib Grid Bot CLI
#[derive(Parser)]
#[command(name = "fib-grid-bot")]
#[command(version, about = "Fibonacci grid trading on OKX perpetual swaps")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the trading loop
    Run {
        /// Trade against an in-memory venue instead of OKX
        #[arg(long)]
        paper: bool,
    },

    /// Show trade history and P&L from the persisted database
    Status {
        /// Path to SQLite database
        #[arg(short, long, default_value = "data/trading.db")]
        db: String,
    },

    /// Print the configured level table
    Levels,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging()?;

    let config = Config::load()?;
    config.validate()?;

    match cli.command {
        Some(Commands::Status { db }) => show_status(&db),
        Some(Commands::Levels) => show_levels(&config),
        Some(Commands::Run { paper }) => run(config, paper).await,
        None => run(config, false).await,
    }
}

async fn run(config: Config, paper: bool) -> Result<()> {
    info!(
        "fib-grid-bot v{} starting ({})",
        env!("CARGO_PKG_VERSION"),
        if paper { "paper trading" } else { "live" }
    );
    log_config(&config);

    let exchange: Arc<dyn Exchange> = if paper {
        // Paper venue starts flat in the middle of the range.
        let mid = (config.grid.price_min + config.grid.price_max) / Decimal::TWO;
        info!(price = %mid, "paper venue initialized");
        Arc::new(MockExchange::new(mid, 0))
    } else {
        if config.okx.api_key.is_empty() {
            warn!("no OKX API key configured; authenticated calls will fail");
        }
        if config.okx.simulated {
            info!("OKX simulated-trading (demo) environment selected");
        }
        Arc::new(OkxClient::new(&config.okx, &config.grid.symbol)?)
    };

    let persistence = PersistenceManager::new(&config.engine.db_path)?;
    let notifier = TelegramNotifier::new(config.telegram.clone());

    let mut engine = Engine::new(config, exchange, persistence, notifier)?;
    engine.run().await
}

fn init_logging() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("fib_grid_bot=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .init();
    Ok(())
}

/// Log configuration on startup.
fn log_config(config: &Config) {
    info!("Configuration:");
    info!("   Symbol:          {}", config.grid.symbol);
    info!(
        "   Range:           ${} - ${}",
        config.grid.price_min, config.grid.price_max
    );
    info!("   Max Position:    {} contracts", config.grid.max_position);
    info!("   Levels:          {}", config.grid.levels.len());
    info!("   Poll Interval:   {}s", config.engine.poll_interval_secs);
    info!("   Database:        {}", config.engine.db_path);
    info!(
        "   Telegram:        {}",
        if config.telegram.enabled {
            "enabled"
        } else {
            "disabled"
        }
    );
}

fn show_status(db_path: &str) -> Result<()> {
    use std::path::Path;

    if !Path::new(db_path).exists() {
        println!("Database not found: {db_path}");
        println!("The bot has not been started yet, or the database path is incorrect.");
        return Ok(());
    }

    let persistence = PersistenceManager::new(db_path)?;
    let stats = persistence.trade_stats()?;
    let lots = persistence.load_lots()?;
    let position: u32 = lots.iter().map(|lot| lot.qty).sum();

    println!("Trading Summary");
    println!("   Total Trades:   {}", stats.total_trades);
    println!("   Wins / Losses:  {} / {}", stats.win_count, stats.loss_count);
    println!("   Realized P&L:   ${}", stats.total_pnl);
    println!("   Position:       {position} contracts in {} lots", lots.len());

    if !lots.is_empty() {
        println!("\nOpen Lots (oldest first)");
        for lot in &lots {
            println!(
                "   {} @ ${}   opened {}",
                lot.qty,
                lot.entry_price,
                lot.created_at.format("%Y-%m-%d %H:%M:%S UTC")
            );
        }
    }

    let recent = persistence.recent_trades(10)?;
    if !recent.is_empty() {
        println!("\nRecent Trades");
        for trade in &recent {
            let pnl = trade
                .realized_pnl
                .map(|pnl| format!("  pnl ${pnl}"))
                .unwrap_or_default();
            println!(
                "   {}  {:>4} {:>3} @ ${}{}   ({})",
                trade.timestamp.format("%Y-%m-%d %H:%M:%S"),
                trade.side.to_string(),
                trade.qty,
                trade.price,
                pnl,
                trade.reason
            );
        }
    }

    println!();
    Ok(())
}

fn show_levels(config: &Config) -> Result<()> {
    let table = LevelTable::build(&config.grid)?;

    println!("Level Table ({})", config.grid.symbol);
    println!("   {:>7}  {:>10}  {:>6}", "ratio", "price", "target");
    for level in table.levels() {
        println!(
            "   {:>7}  {:>10}  {:>6}",
            level.ratio, level.price, level.target_qty
        );
    }
    Ok(())
}
