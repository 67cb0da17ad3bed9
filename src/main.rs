//! Trading-signal bot for USDⓈ-M futures.
//!
//! Ingests free-text chat signals, extracts structured trade intents,
//! executes them through a guarded order protocol, and keeps local trade
//! records reconciled with the exchange.

mod bot;
mod config;
mod db;
mod exchange;
mod models;
mod parser;
mod trading;

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::bot::{IncomingMessage, SignalIntake};
use crate::config::AppConfig;
use crate::db::Database;
use crate::exchange::BinanceFutures;
use crate::models::{MarginMode, TradeStatus};
use crate::trading::{ExecutionOutcome, TradeConfigUpdate, TradeService};

/// Single-operator deployment; all records belong to this user.
const DEFAULT_USER_ID: i64 = 1;

/// Signal-trading bot CLI.
#[derive(Parser)]
#[command(name = "sigtrader")]
#[command(about = "Execute chat trading signals on USDⓈ-M futures", long_about = None)]
struct Cli {
    /// Database URL (overrides DATABASE_URL)
    #[arg(short, long)]
    database: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the intake loop, reading messages from stdin
    ///
    /// Paste a message and finish it with a blank line. Each message is
    /// parsed and, if auto-execution is on, traded.
    Run,

    /// Parse a message without running the intake loop
    Parse {
        /// Message text
        text: String,

        /// Execute the extracted signal instead of just showing it
        #[arg(long)]
        execute: bool,
    },

    /// List recent signals
    Signals {
        #[arg(short, long, default_value = "20")]
        limit: i64,
    },

    /// Show one signal
    Signal {
        id: i64,
    },

    /// Execute a previously recorded signal
    Execute {
        /// Signal id
        id: i64,
    },

    /// Show live positions joined with local trade records
    Positions,

    /// Close an open trade at market
    Close {
        /// Trade id
        id: i64,
    },

    /// Show trade history
    History {
        /// Filter by status (PENDING, OPEN, CLOSED, CANCELLED)
        #[arg(short, long)]
        status: Option<String>,

        #[arg(short, long, default_value = "20")]
        limit: i64,
    },

    /// Show total realized P&L
    Pnl,

    /// Reconcile local records against the exchange
    Sync,

    /// Show available futures wallet balance
    Balance,

    /// Show or change trade settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current settings
    Show,

    /// Change settings; unspecified fields are left as they are
    Set {
        #[arg(long)]
        leverage: Option<u32>,

        /// Margin per trade in USDT
        #[arg(long)]
        size: Option<Decimal>,

        /// Stop-loss percentage
        #[arg(long)]
        sl: Option<Decimal>,

        /// Take-profit percentage
        #[arg(long)]
        tp: Option<Decimal>,

        /// CROSSED or ISOLATED
        #[arg(long)]
        margin_mode: Option<String>,

        /// Execute signals automatically as they arrive
        #[arg(long)]
        auto_execute: Option<bool>,
    },

    /// Reset settings to the environment defaults
    Reset,
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
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let app = AppConfig::from_env()?;
    let database_url = cli.database.unwrap_or_else(|| app.database_url.clone());

    let db = Arc::new(Database::new(&database_url).await?);
    let exchange = Arc::new(BinanceFutures::new(
        &app.api_key,
        &app.api_secret,
        app.testnet,
    )?);
    let service = Arc::new(TradeService::new(db, exchange, app.clone()));

    match cli.command {
        Commands::Run => {
            println!("=== Signal Intake ===");
            println!(
                "Network: {}",
                if app.testnet { "TESTNET" } else { "MAINNET" }
            );
            println!("Paste a message, finish with a blank line. Ctrl+C to stop.\n");

            let (tx, rx) = mpsc::channel::<IncomingMessage>(64);
            let reader = tokio::spawn(read_stdin_messages(tx));

            let intake = SignalIntake::new(Arc::clone(&service), DEFAULT_USER_ID, app.auto_execute);
            intake.run(rx).await?;
            reader.abort();
            info!("intake stopped");
        }

        Commands::Parse { text, execute } => {
            if execute {
                match service
                    .process_message(DEFAULT_USER_ID, "cli", &text, true)
                    .await?
                {
                    Some(outcome) => {
                        print_parsed(&outcome.parsed);
                        match outcome.execution {
                            ExecutionOutcome::Executed { trade_id } => {
                                println!("\nExecuted as trade {trade_id}");
                            }
                            ExecutionOutcome::Recorded => {
                                // Stored config has auto-execution off, but
                                // --execute is an explicit request.
                                let trade_id = service
                                    .execute_signal(outcome.signal_id, DEFAULT_USER_ID)
                                    .await?;
                                println!("\nExecuted as trade {trade_id}");
                            }
                            ExecutionOutcome::Failed { reason } => {
                                println!(
                                    "\nRecorded as signal {} but execution failed: {reason}",
                                    outcome.signal_id
                                );
                            }
                        }
                    }
                    None => println!("Message did not parse as a signal."),
                }
            } else {
                match service.parse_preview(DEFAULT_USER_ID, &text).await? {
                    Ok(parsed) => print_parsed(&parsed),
                    Err(e) => println!("Not a signal: {e}"),
                }
            }
        }

        Commands::Signals { limit } => {
            let signals = service.signals(limit).await?;
            if signals.is_empty() {
                println!("No signals recorded yet.");
                return Ok(());
            }
            println!(
                "\n{:>5} {:<12} {:<6} {:>14} {:>14} {:>14}  {}",
                "ID", "PAIR", "DIR", "ENTRY", "SL", "TP", "WHEN"
            );
            println!("{}", "-".repeat(90));
            for s in signals {
                println!(
                    "{:>5} {:<12} {:<6} {:>14} {:>14} {:>14}  {}",
                    s.id,
                    s.pair,
                    s.direction,
                    s.entry,
                    s.stop_loss,
                    s.take_profit,
                    s.created_at.format("%Y-%m-%d %H:%M")
                );
            }
        }

        Commands::Signal { id } => match service.signal(id).await? {
            Some(s) => {
                println!("\n=== Signal {} ===", s.id);
                println!("Pair:        {}", s.pair);
                println!("Direction:   {}", s.direction);
                println!("Entry:       {}", s.entry);
                println!("Stop Loss:   {}", s.stop_loss);
                println!("Take Profit: {}", s.take_profit);
                if let Some(sl) = s.stated_stop_loss {
                    println!("Stated SL:   {sl}");
                }
                if let Some(tp) = s.stated_take_profit {
                    println!("Stated TP:   {tp}");
                }
                println!("Channel:     {}", s.channel);
                println!("Received:    {}", s.created_at.format("%Y-%m-%d %H:%M:%S"));
                println!("\n--- Raw message ---\n{}", s.raw_message);
            }
            None => println!("Signal {id} not found."),
        },

        Commands::Execute { id } => {
            let trade_id = service.execute_signal(id, DEFAULT_USER_ID).await?;
            println!("Signal {id} executed as trade {trade_id}");
        }

        Commands::Positions => {
            let positions = service.active_positions(DEFAULT_USER_ID).await?;
            if positions.is_empty() {
                println!("No open positions.");
                return Ok(());
            }
            println!(
                "\n{:<12} {:<6} {:>12} {:>12} {:>12} {:>10} {:>9}",
                "PAIR", "DIR", "ENTRY", "MARK", "PNL", "ROI%", "TRADE"
            );
            println!("{}", "-".repeat(80));
            for p in positions {
                println!(
                    "{:<12} {:<6} {:>12} {:>12} {:>12} {:>9.2}% {:>9}",
                    p.position.symbol,
                    p.position.side,
                    p.position.entry_price,
                    p.position.mark_price,
                    p.position.unrealized_pnl,
                    p.roi_percent,
                    p.trade
                        .as_ref()
                        .map(|t| t.id.to_string())
                        .unwrap_or_else(|| "-".to_string())
                );
            }
        }

        Commands::Close { id } => {
            let trade = service.close_trade(id).await?;
            println!("Trade {} closed at {}", trade.id, trade.exit_price.unwrap_or_default());
            if let Some(pnl) = trade.pnl {
                println!("Realized P&L: {pnl}");
            }
        }

        Commands::History { status, limit } => {
            let status = match status.as_deref() {
                Some(s) => Some(
                    TradeStatus::parse(s)
                        .ok_or_else(|| anyhow::anyhow!("Unknown status: {s}"))?,
                ),
                None => None,
            };
            let trades = service.trades(DEFAULT_USER_ID, status, limit).await?;
            if trades.is_empty() {
                println!("No trades found.");
                return Ok(());
            }
            println!(
                "\n{:>5} {:<12} {:<6} {:>4} {:>12} {:>12} {:<10} {:>12} {}",
                "ID", "PAIR", "DIR", "LEV", "ENTRY", "EXIT", "STATUS", "PNL", "REASON"
            );
            println!("{}", "-".repeat(100));
            for t in trades {
                println!(
                    "{:>5} {:<12} {:<6} {:>3}x {:>12} {:>12} {:<10} {:>12} {}",
                    t.id,
                    t.pair,
                    t.direction,
                    t.leverage,
                    t.entry_price,
                    t.exit_price
                        .map(|p| p.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                    t.status,
                    t.pnl
                        .map(|p| p.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                    t.exit_reason.map(|r| r.as_str()).unwrap_or("-")
                );
            }
        }

        Commands::Pnl => {
            let realized = service.total_pnl(DEFAULT_USER_ID).await?;
            let unrealized: Decimal = service
                .active_positions(DEFAULT_USER_ID)
                .await?
                .iter()
                .map(|p| p.position.unrealized_pnl)
                .sum();
            println!("Realized P&L:   {realized} USDT");
            println!("Unrealized P&L: {unrealized} USDT");
        }

        Commands::Sync => {
            let closed = service.sync(DEFAULT_USER_ID).await?;
            if closed == 0 {
                println!("All trade records match the exchange.");
            } else {
                println!("Closed {closed} trade record(s) for vanished positions.");
            }
        }

        Commands::Balance => {
            let balance = service.balance().await?;
            println!("Available balance: {balance} USDT");
        }

        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let config = service.config(DEFAULT_USER_ID).await?;
                print_config(&config);
            }
            ConfigAction::Set {
                leverage,
                size,
                sl,
                tp,
                margin_mode,
                auto_execute,
            } => {
                let margin_mode = match margin_mode.as_deref() {
                    Some(m) => Some(
                        MarginMode::parse(m)
                            .ok_or_else(|| anyhow::anyhow!("Unknown margin mode: {m}"))?,
                    ),
                    None => None,
                };
                let update = TradeConfigUpdate {
                    margin_mode,
                    leverage,
                    position_size: size,
                    sl_percentage: sl,
                    tp_percentage: tp,
                    auto_execute,
                };
                let config = service.update_config(DEFAULT_USER_ID, &update).await?;
                println!("Settings updated.\n");
                print_config(&config);
            }
            ConfigAction::Reset => {
                let config = service.reset_config(DEFAULT_USER_ID).await?;
                println!("Settings reset to defaults.\n");
                print_config(&config);
            }
        },
    }

    Ok(())
}

/// Read newline-delimited messages from stdin. A blank line ends one
/// message; ids are assigned sequentially.
async fn read_stdin_messages(tx: mpsc::Sender<IncomingMessage>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut buffer: Vec<String> = Vec::new();
    let mut next_id: i64 = 1;

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    if !buffer.is_empty() {
                        let text = buffer.join("\n");
                        buffer.clear();
                        let msg = IncomingMessage {
                            id: next_id,
                            sender: "stdin".to_string(),
                            text,
                            timestamp: Utc::now(),
                        };
                        next_id += 1;
                        if tx.send(msg).await.is_err() {
                            return;
                        }
                    }
                } else {
                    buffer.push(line);
                }
            }
            Ok(None) => {
                if !buffer.is_empty() {
                    let msg = IncomingMessage {
                        id: next_id,
                        sender: "stdin".to_string(),
                        text: buffer.join("\n"),
                        timestamp: Utc::now(),
                    };
                    let _ = tx.send(msg).await;
                }
                return;
            }
            Err(_) => return,
        }
    }
}

fn print_parsed(parsed: &crate::models::ParsedSignal) {
    println!("\n=== Extracted Signal ===");
    println!("Pair:        {}", parsed.pair);
    println!("Direction:   {}", parsed.direction);
    println!("Entry:       {}", parsed.entry);
    println!("Stop Loss:   {}", parsed.stop_loss);
    println!("Take Profit: {}", parsed.take_profit);
    if let Some(sl) = parsed.stated_stop_loss {
        println!("Stated SL:   {sl} (informational)");
    }
    if let Some(tp) = parsed.stated_take_profit {
        println!("Stated TP:   {tp} (informational)");
    }
}

fn print_config(config: &crate::trading::TradeConfig) {
    println!("=== Trade Settings ===");
    println!("Leverage:      {}x", config.leverage);
    println!("Position Size: {} USDT", config.position_size);
    println!("Stop Loss:     {}%", config.sl_percentage);
    println!("Take Profit:   {}%", config.tp_percentage);
    println!("Margin Mode:   {}", config.margin_mode);
    println!("Auto Execute:  {}", config.auto_execute);
}
