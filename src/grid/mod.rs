//! Price-to-position allocation engine.
//!
//! Contains the core logic for:
//! - The immutable level table mapping price to target position
//! - FIFO lot accounting and realized P&L
//! - Planning the desired set of resting orders around current price
//! - Reconciling desired orders against what actually rests on the venue
//! - Processing fills and applying the tier replacement policy

mod fills;
mod ledger;
mod levels;
mod planner;
mod reconciler;

pub use fills::{FillEvent, FillHandler, TradeRecord};
pub use ledger::{Lot, PositionLedger, SellResult};
pub use levels::{Level, LevelTable};
pub use planner::{DesiredOrder, Jitter, OrderPlanner, Side, Slot, Tier};
pub use reconciler::{OrderReconciler, RestingOrder, SlotState};
