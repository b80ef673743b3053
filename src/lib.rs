//! # Fib Grid Bot
//!
//! Automated position management for a single OKX perpetual swap. Price is
//! mapped to a target position size through a fibonacci level table, and a
//! small set of resting limit orders (primary/secondary tier, buy/sell)
//! moves the position toward that target as price crosses levels.
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `grid`: Level table, FIFO lot ledger, order planning and reconciliation
//! - `exchange`: OKX REST client plus a mock venue for tests/paper trading
//! - `engine`: The single-owner control loop (poll, plan, reconcile, fills)
//! - `notify`: Telegram notifications (best-effort)
//! - `persistence`: SQLite trade history and lot snapshots
//! - `utils`: Shared decimal arithmetic helpers

pub mod config;
pub mod engine;
pub mod exchange;
pub mod grid;
pub mod notify;
pub mod persistence;
pub mod utils;

pub use config::Config;
