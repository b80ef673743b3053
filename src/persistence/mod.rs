//! SQLite persistence for trading state.
//!
//! Persists what must survive restarts:
//! - Trade execution history with per-fill realized P&L
//! - The open lot queue, so FIFO accounting continues across restarts
//!
//! Decimals are stored as TEXT to avoid floating-point drift.

use crate::grid::{Lot, Side, TradeRecord};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

/// Aggregate trade statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeStats {
    pub total_trades: u64,
    pub win_count: u64,
    pub loss_count: u64,
    pub total_pnl: Decimal,
}

/// SQLite-based persistence manager.
pub struct PersistenceManager {
    conn: Connection,
}

impl PersistenceManager {
    /// Create a new persistence manager, initializing the database if needed.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create data directory {parent:?}"))?;
            }
        }
        let conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;

        let manager = Self { conn };
        manager.init_schema()?;

        info!("Persistence manager initialized at {:?}", db_path.as_ref());
        Ok(manager)
    }

    /// Open an in-memory database. Test-only convenience.
    pub fn in_memory() -> Result<Self> {
        Self::new(":memory:")
    }

    /// Initialize database schema.
    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            -- Trade history
            CREATE TABLE IF NOT EXISTS trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                price TEXT NOT NULL,
                quantity INTEGER NOT NULL,
                realized_pnl TEXT,
                reason TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_trades_timestamp ON trades(timestamp);

            -- Open lot queue snapshot (seq preserves FIFO order)
            CREATE TABLE IF NOT EXISTS lots (
                seq INTEGER PRIMARY KEY,
                quantity INTEGER NOT NULL,
                entry_price TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            "#,
        )?;

        debug!("Database schema initialized");
        Ok(())
    }

    /// Record an executed trade.
    pub fn record_trade(&self, symbol: &str, record: &TradeRecord) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO trades (timestamp, symbol, side, price, quantity, realized_pnl, reason)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                record.timestamp.to_rfc3339(),
                symbol,
                record.side.to_string(),
                record.price.to_string(),
                record.qty,
                record.realized_pnl.map(|pnl| pnl.to_string()),
                record.reason,
            ],
        )?;
        Ok(())
    }

    /// Replace the persisted lot queue with the current one.
    pub fn save_lots<'a>(&self, lots: impl Iterator<Item = &'a Lot>) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM lots", [])?;
        for (seq, lot) in lots.enumerate() {
            tx.execute(
                "INSERT INTO lots (seq, quantity, entry_price, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    seq as i64,
                    lot.qty,
                    lot.entry_price.to_string(),
                    lot.created_at.to_rfc3339(),
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Load the persisted lot queue, oldest first.
    pub fn load_lots(&self) -> Result<Vec<Lot>> {
        let mut stmt = self
            .conn
            .prepare("SELECT quantity, entry_price, created_at FROM lots ORDER BY seq ASC")?;

        let lots: Vec<Lot> = stmt
            .query_map([], |row| {
                Ok(Lot {
                    qty: row.get(0)?,
                    entry_price: Decimal::from_str(&row.get::<_, String>(1)?).unwrap_or_default(),
                    created_at: DateTime::parse_from_rfc3339(&row.get::<_, String>(2)?)
                        .map(|dt| dt.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        Ok(lots)
    }

    /// Aggregate statistics over all recorded trades. Wins and losses count
    /// only sells, since buys realize nothing.
    pub fn trade_stats(&self) -> Result<TradeStats> {
        let total_trades: u64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM trades", [], |row| row.get(0))?;

        let mut stmt = self
            .conn
            .prepare("SELECT realized_pnl FROM trades WHERE realized_pnl IS NOT NULL")?;
        let pnls: Vec<Decimal> = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .filter_map(|r| r.ok())
            .filter_map(|raw| Decimal::from_str(&raw).ok())
            .collect();

        Ok(TradeStats {
            total_trades,
            win_count: pnls.iter().filter(|pnl| **pnl > Decimal::ZERO).count() as u64,
            loss_count: pnls.iter().filter(|pnl| **pnl < Decimal::ZERO).count() as u64,
            total_pnl: pnls.iter().sum(),
        })
    }

    /// Most recent trades, newest first.
    pub fn recent_trades(&self, limit: usize) -> Result<Vec<TradeRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT timestamp, side, price, quantity, realized_pnl, reason
            FROM trades
            ORDER BY id DESC
            LIMIT ?1
            "#,
        )?;

        let trades: Vec<TradeRecord> = stmt
            .query_map([limit], |row| {
                let side: String = row.get(1)?;
                Ok(TradeRecord {
                    timestamp: DateTime::parse_from_rfc3339(&row.get::<_, String>(0)?)
                        .map(|dt| dt.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                    side: if side == "sell" { Side::Sell } else { Side::Buy },
                    price: Decimal::from_str(&row.get::<_, String>(2)?).unwrap_or_default(),
                    qty: row.get(3)?,
                    realized_pnl: row
                        .get::<_, Option<String>>(4)?
                        .and_then(|raw| Decimal::from_str(&raw).ok()),
                    reason: row.get(5)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        Ok(trades)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn trade(side: Side, pnl: Option<Decimal>) -> TradeRecord {
        TradeRecord {
            side,
            price: dec!(132.30),
            qty: 3,
            realized_pnl: pnl,
            reason: "fib 0.550 L1 buy limit fill".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_record_and_read_trades() {
        let manager = PersistenceManager::in_memory().unwrap();

        manager
            .record_trade("SOL-USDT-SWAP", &trade(Side::Buy, None))
            .unwrap();
        manager
            .record_trade("SOL-USDT-SWAP", &trade(Side::Sell, Some(dec!(50.60))))
            .unwrap();

        let recent = manager.recent_trades(10).unwrap();
        assert_eq!(recent.len(), 2);
        // Newest first
        assert_eq!(recent[0].side, Side::Sell);
        assert_eq!(recent[0].realized_pnl, Some(dec!(50.60)));
        assert_eq!(recent[1].realized_pnl, None);
    }

    #[test]
    fn test_trade_stats() {
        let manager = PersistenceManager::in_memory().unwrap();

        manager
            .record_trade("SOL-USDT-SWAP", &trade(Side::Buy, None))
            .unwrap();
        manager
            .record_trade("SOL-USDT-SWAP", &trade(Side::Sell, Some(dec!(50.60))))
            .unwrap();
        manager
            .record_trade("SOL-USDT-SWAP", &trade(Side::Sell, Some(dec!(-12.10))))
            .unwrap();

        let stats = manager.trade_stats().unwrap();
        assert_eq!(stats.total_trades, 3);
        assert_eq!(stats.win_count, 1);
        assert_eq!(stats.loss_count, 1);
        assert_eq!(stats.total_pnl, dec!(38.50));
    }

    #[test]
    fn test_lot_queue_round_trips_in_order() {
        let manager = PersistenceManager::in_memory().unwrap();

        let lots = vec![
            Lot {
                qty: 2,
                entry_price: dec!(125.50),
                created_at: Utc::now(),
            },
            Lot {
                qty: 18,
                entry_price: dec!(128.30),
                created_at: Utc::now(),
            },
        ];
        manager.save_lots(lots.iter()).unwrap();

        let loaded = manager.load_lots().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].qty, 2);
        assert_eq!(loaded[0].entry_price, dec!(125.50));
        assert_eq!(loaded[1].entry_price, dec!(128.30));

        // Saving again replaces rather than appends.
        manager.save_lots(loaded[1..].iter()).unwrap();
        assert_eq!(manager.load_lots().unwrap().len(), 1);
    }

    #[test]
    fn test_empty_database_stats() {
        let manager = PersistenceManager::in_memory().unwrap();
        let stats = manager.trade_stats().unwrap();
        assert_eq!(stats.total_trades, 0);
        assert_eq!(stats.total_pnl, Decimal::ZERO);
        assert!(manager.load_lots().unwrap().is_empty());
    }
}
