//! FIFO lot accounting.
//!
//! Every buy fill becomes a lot; sell fills consume lots oldest-first,
//! splitting the last lot touched when it is only partially consumed. This
//! reproduces exact per-fill realized P&L, which a running-average cost
//! basis cannot.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::VecDeque;
use tracing::warn;

/// One acquisition lot.
#[derive(Debug, Clone, PartialEq)]
pub struct Lot {
    /// Remaining contracts in the lot, always > 0
    pub qty: u32,
    /// Price the lot was acquired at
    pub entry_price: Decimal,
    pub created_at: DateTime<Utc>,
}

/// Outcome of consuming lots for a sell fill.
#[derive(Debug, Clone, PartialEq)]
pub struct SellResult {
    /// Contracts actually matched against lots
    pub consumed_qty: u32,
    /// Sum over consumed lots of `(sell_price - entry_price) * qty`
    pub realized_pnl: Decimal,
}

/// Ordered queue of open lots; the front is the oldest.
#[derive(Debug, Default)]
pub struct PositionLedger {
    lots: VecDeque<Lot>,
}

impl PositionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the ledger from persisted lots (oldest first).
    pub fn from_lots(lots: Vec<Lot>) -> Self {
        Self { lots: lots.into() }
    }

    /// Current position: the sum of all open lot quantities.
    pub fn position_qty(&self) -> u32 {
        self.lots.iter().map(|lot| lot.qty).sum()
    }

    pub fn lots(&self) -> impl Iterator<Item = &Lot> {
        self.lots.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.lots.is_empty()
    }

    /// Record a buy fill as a new lot.
    pub fn push_lot(&mut self, qty: u32, entry_price: Decimal, created_at: DateTime<Utc>) {
        debug_assert!(qty > 0, "lots must have positive quantity");
        self.lots.push_back(Lot {
            qty,
            entry_price,
            created_at,
        });
    }

    /// Consume up to `qty` contracts oldest-first for a sell fill at
    /// `sell_price`, splitting the lot whose remainder exceeds the amount
    /// still needed.
    ///
    /// A sell larger than the tracked position consumes what is available
    /// and reports the shortfall through `consumed_qty`.
    pub fn consume(&mut self, qty: u32, sell_price: Decimal) -> SellResult {
        let mut remaining = qty;
        let mut realized_pnl = Decimal::ZERO;

        while remaining > 0 {
            let Some(oldest) = self.lots.front_mut() else {
                warn!(
                    requested = qty,
                    short = remaining,
                    "sell fill exceeds tracked lots"
                );
                break;
            };

            let take = oldest.qty.min(remaining);
            realized_pnl += (sell_price - oldest.entry_price) * Decimal::from(take);
            remaining -= take;

            if take == oldest.qty {
                self.lots.pop_front();
            } else {
                oldest.qty -= take;
            }
        }

        SellResult {
            consumed_qty: qty - remaining,
            realized_pnl,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn ledger_with(entries: &[(u32, Decimal)]) -> PositionLedger {
        let mut ledger = PositionLedger::new();
        for (qty, price) in entries {
            ledger.push_lot(*qty, *price, Utc::now());
        }
        ledger
    }

    #[test]
    fn test_position_is_sum_of_lots() {
        let ledger = ledger_with(&[(2, dec!(125.50)), (18, dec!(128.30))]);
        assert_eq!(ledger.position_qty(), 20);
    }

    #[test]
    fn test_fifo_sell_splits_oldest_surviving_lot() {
        // Oldest lots: 2 @ 125.50, then 18 @ 128.30; sell 3 @ 143.30
        let mut ledger = ledger_with(&[(2, dec!(125.50)), (18, dec!(128.30))]);

        let result = ledger.consume(3, dec!(143.30));

        // 2 * (143.30 - 125.50) + 1 * (143.30 - 128.30) = 35.60 + 15.00
        assert_eq!(result.realized_pnl, dec!(50.60));
        assert_eq!(result.consumed_qty, 3);

        let remaining: Vec<_> = ledger.lots().cloned().collect();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].qty, 17);
        assert_eq!(remaining[0].entry_price, dec!(128.30));
        assert_eq!(ledger.position_qty(), 17);
    }

    #[test]
    fn test_conservation_across_fill_sequence() {
        let mut ledger = PositionLedger::new();
        let mut tracked: i64 = 0;

        for (buy_qty, sell_qty) in [(5u32, 0u32), (3, 2), (0, 4), (7, 1), (0, 8)] {
            if buy_qty > 0 {
                ledger.push_lot(buy_qty, dec!(120), Utc::now());
                tracked += buy_qty as i64;
            }
            if sell_qty > 0 {
                let result = ledger.consume(sell_qty, dec!(125));
                tracked -= result.consumed_qty as i64;
            }
            assert_eq!(ledger.position_qty() as i64, tracked);
        }
    }

    #[test]
    fn test_fifo_never_touches_newer_lots_first() {
        let mut ledger = ledger_with(&[(4, dec!(110)), (4, dec!(120))]);
        ledger.consume(3, dec!(130));

        let lots: Vec<_> = ledger.lots().cloned().collect();
        // Oldest lot shrank; the newer one is untouched.
        assert_eq!(lots[0].qty, 1);
        assert_eq!(lots[0].entry_price, dec!(110));
        assert_eq!(lots[1].qty, 4);
        assert_eq!(lots[1].entry_price, dec!(120));
    }

    #[test]
    fn test_oversell_consumes_what_exists() {
        let mut ledger = ledger_with(&[(2, dec!(100))]);
        let result = ledger.consume(5, dec!(110));
        assert_eq!(result.consumed_qty, 2);
        assert_eq!(result.realized_pnl, dec!(20));
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_loss_is_negative_pnl() {
        let mut ledger = ledger_with(&[(3, dec!(140))]);
        let result = ledger.consume(3, dec!(130));
        assert_eq!(result.realized_pnl, dec!(-30));
    }
}
