//! Fill handling.
//!
//! Applies confirmed fills to the lot ledger and enforces the replacement
//! policy: a primary fill clears its slot and cancels the same-side
//! secondary so the next planning pass rebuilds both around the new price; a
//! secondary fill clears only itself, leaving the primary resting. Every
//! fill is deduplicated on `(order_id, fill_id)` because polling can report
//! the same execution more than once.

use crate::exchange::Exchange;
use crate::grid::ledger::PositionLedger;
use crate::grid::planner::{Side, Slot, Tier};
use crate::grid::reconciler::OrderReconciler;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashSet;
use tracing::{debug, info};

/// A confirmed execution against one of the engine's orders.
#[derive(Debug, Clone)]
pub struct FillEvent {
    pub slot: Slot,
    pub order_id: String,
    /// Venue-assigned execution id, unique per (order, execution)
    pub fill_id: String,
    pub level_ratio: Decimal,
    pub price: Decimal,
    pub qty: u32,
    /// Whether the order is now completely filled
    pub full: bool,
    pub timestamp: DateTime<Utc>,
}

/// A completed trade, ready for persistence and notification.
#[derive(Debug, Clone)]
pub struct TradeRecord {
    pub side: Side,
    pub price: Decimal,
    pub qty: u32,
    /// Realized P&L for sells; buys open lots and realize nothing
    pub realized_pnl: Option<Decimal>,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

/// Applies fills to the ledger and drives post-fill order replacement.
pub struct FillHandler {
    ledger: PositionLedger,
    seen: HashSet<(String, String)>,
}

impl FillHandler {
    pub fn new(ledger: PositionLedger) -> Self {
        Self {
            ledger,
            seen: HashSet::new(),
        }
    }

    pub fn ledger(&self) -> &PositionLedger {
        &self.ledger
    }

    /// Apply one fill. Returns the trade to record, or `None` when the fill
    /// was already seen.
    pub async fn on_fill(
        &mut self,
        event: FillEvent,
        reconciler: &mut OrderReconciler,
        exchange: &dyn Exchange,
    ) -> Option<TradeRecord> {
        let key = (event.order_id.clone(), event.fill_id.clone());
        if !self.seen.insert(key) {
            debug!(
                order_id = %event.order_id,
                fill_id = %event.fill_id,
                "duplicate fill ignored"
            );
            return None;
        }

        let realized_pnl = match event.slot.side {
            Side::Buy => {
                self.ledger.push_lot(event.qty, event.price, event.timestamp);
                None
            }
            Side::Sell => Some(self.ledger.consume(event.qty, event.price).realized_pnl),
        };

        info!(
            slot = %event.slot,
            price = %event.price,
            qty = event.qty,
            full = event.full,
            position = self.ledger.position_qty(),
            pnl = ?realized_pnl,
            "fill applied"
        );

        if event.full {
            reconciler.clear_filled(event.slot);
            // A primary fill means price reached the level proper: the
            // same-side secondary is anchored to a now-wrong level and comes
            // down with it. A secondary fill leaves the primary resting.
            if event.slot.tier == Tier::Primary {
                reconciler.cancel_slot(event.slot.sibling(), exchange).await;
            }
        } else {
            reconciler.note_fill(event.slot, event.qty);
        }

        Some(TradeRecord {
            side: event.slot.side,
            price: event.price,
            qty: event.qty,
            realized_pnl,
            reason: format!(
                "fib {} {} {} limit fill",
                event.level_ratio,
                event.slot.tier.tag(),
                event.slot.side
            ),
            timestamp: event.timestamp,
        })
    }
}
