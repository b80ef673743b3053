//! Order reconciliation.
//!
//! Owns the four slot state machines and aligns what actually rests on the
//! venue with what the planner wants, issuing the minimal set of place and
//! cancel requests. Reconciling an unchanged desired set must issue zero
//! exchange calls: the control loop polls continuously, so idempotence here
//! is a correctness requirement rather than an optimization.
//!
//! Slot lifecycle: `Empty -> PendingPlace -> Resting -> PendingCancel ->
//! Empty`. The pending states are only entered when a request outcome is
//! ambiguous (a timeout after the request may have reached the venue); they
//! are resolved against authoritative remote state before the slot accepts
//! another action. A timeout never marks a slot empty optimistically, and an
//! ambiguous place is never re-sent: the same request reaching the venue
//! twice would put two live orders in one slot.

use crate::exchange::{with_retry, CancelOutcome, Exchange, ExchangeError, RemoteOrderState};
use crate::grid::planner::{DesiredOrder, Side, Slot, Tier};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use tracing::{debug, error, info, warn};

/// An order this engine believes is resting on the venue.
#[derive(Debug, Clone, PartialEq)]
pub struct RestingOrder {
    pub slot: Slot,
    pub order_id: String,
    pub client_order_id: String,
    /// Level the order is anchored to (staleness is judged against this,
    /// never against the jittered limit price)
    pub level_price: Decimal,
    pub level_ratio: Decimal,
    /// Actual limit price on the venue
    pub price: Decimal,
    /// Quantity originally placed
    pub qty: u32,
    /// Filled quantity observed so far
    pub filled_qty: u32,
}

impl RestingOrder {
    /// Quantity still resting after partial fills.
    pub fn remaining_qty(&self) -> u32 {
        self.qty.saturating_sub(self.filled_qty)
    }
}

/// Per-slot state machine.
#[derive(Debug, Clone)]
pub enum SlotState {
    Empty,
    /// A place request timed out without a definite answer; the order may or
    /// may not exist on the venue.
    PendingPlace {
        desired: DesiredOrder,
        client_order_id: String,
    },
    Resting(RestingOrder),
    /// A cancel request timed out without a definite answer.
    PendingCancel(RestingOrder),
}

/// Diffs desired orders against slot state and drives the venue toward the
/// desired set.
pub struct OrderReconciler {
    slots: BTreeMap<Slot, SlotState>,
    price_tolerance: Decimal,
    max_retries: u32,
    seq: u64,
}

impl OrderReconciler {
    pub fn new(price_tolerance: Decimal, max_retries: u32) -> Self {
        let slots = Slot::ALL
            .iter()
            .map(|slot| (*slot, SlotState::Empty))
            .collect();
        Self {
            slots,
            price_tolerance,
            max_retries,
            seq: 0,
        }
    }

    pub fn state(&self, slot: Slot) -> &SlotState {
        &self.slots[&slot]
    }

    /// The order resting in a slot, if the slot is in a confirmed resting
    /// state.
    pub fn resting(&self, slot: Slot) -> Option<&RestingOrder> {
        match &self.slots[&slot] {
            SlotState::Resting(order) => Some(order),
            _ => None,
        }
    }

    /// Orders the venue may still fill: confirmed resting plus those with an
    /// unresolved cancel. Fill polling covers both.
    pub fn live_orders(&self) -> Vec<RestingOrder> {
        self.slots
            .values()
            .filter_map(|state| match state {
                SlotState::Resting(order) | SlotState::PendingCancel(order) => Some(order.clone()),
                _ => None,
            })
            .collect()
    }

    /// Record additional filled quantity observed for a slot's order.
    pub fn note_fill(&mut self, slot: Slot, filled_delta: u32) {
        if let Some(SlotState::Resting(order) | SlotState::PendingCancel(order)) =
            self.slots.get_mut(&slot)
        {
            order.filled_qty = (order.filled_qty + filled_delta).min(order.qty);
        }
    }

    /// The slot's order is fully filled and gone from the venue.
    pub fn clear_filled(&mut self, slot: Slot) {
        debug!(%slot, "slot order fully filled");
        self.slots.insert(slot, SlotState::Empty);
    }

    /// Cancel whatever rests in a slot, leaving it empty once confirmed.
    /// Used by the fill replacement policy.
    pub async fn cancel_slot(&mut self, slot: Slot, exchange: &dyn Exchange) {
        self.resolve_pending(slot, exchange).await;

        let state = self.slots.get(&slot).cloned().unwrap_or(SlotState::Empty);
        if let SlotState::Resting(order) = state {
            let next = self.cancel_resting(order, exchange).await;
            self.slots.insert(slot, next);
        }
    }

    /// Resolve every slot's ambiguous in-flight request against remote
    /// state. The control loop runs this before fill polling so an order
    /// that filled while its slot was pending is picked up in the same
    /// cycle.
    pub async fn resolve_all_pending(&mut self, exchange: &dyn Exchange) {
        for slot in Slot::ALL {
            self.resolve_pending(slot, exchange).await;
        }
    }

    /// Align the venue with the desired order set.
    ///
    /// Calling this repeatedly with an unchanged desired set issues no
    /// further exchange requests.
    pub async fn reconcile(
        &mut self,
        desired: &BTreeMap<Slot, DesiredOrder>,
        exchange: &dyn Exchange,
    ) {
        for slot in Slot::ALL {
            self.resolve_pending(slot, exchange).await;
            self.reconcile_slot(slot, desired.get(&slot), exchange).await;
        }
    }

    /// Whether a resting order still satisfies a desired one. Jitter makes
    /// every planned price slightly different, so comparison anchors on the
    /// level price and the remaining quantity.
    fn satisfies(&self, order: &RestingOrder, desired: &DesiredOrder) -> bool {
        let level_diff = (order.level_price - desired.level_price).abs();
        level_diff <= self.price_tolerance && order.remaining_qty() == desired.qty
    }

    async fn reconcile_slot(
        &mut self,
        slot: Slot,
        desired: Option<&DesiredOrder>,
        exchange: &dyn Exchange,
    ) {
        let state = self.slots.get(&slot).cloned().unwrap_or(SlotState::Empty);

        let next = match (state, desired) {
            (SlotState::Empty, Some(want)) => self.place(want.clone(), exchange).await,
            (SlotState::Empty, None) => SlotState::Empty,

            (SlotState::Resting(order), Some(want)) if self.satisfies(&order, want) => {
                SlotState::Resting(order)
            }
            (SlotState::Resting(order), Some(want)) => {
                info!(
                    %slot,
                    old_level = %order.level_price,
                    new_level = %want.level_price,
                    old_qty = order.remaining_qty(),
                    new_qty = want.qty,
                    "replacing stale order"
                );
                match self.cancel_resting(order, exchange).await {
                    // Cancel confirmed: the slot may accept the new order now.
                    SlotState::Empty => self.place(want.clone(), exchange).await,
                    other => other,
                }
            }
            (SlotState::Resting(order), None) => self.cancel_resting(order, exchange).await,

            // Pending states were resolved above; if still pending the
            // request outcome is unknown and the slot accepts no new action.
            (pending, _) => pending,
        };

        self.slots.insert(slot, next);
    }

    /// Resolve an ambiguous in-flight request against authoritative remote
    /// state before the slot accepts another action.
    async fn resolve_pending(&mut self, slot: Slot, exchange: &dyn Exchange) {
        let state = self.slots.get(&slot).cloned().unwrap_or(SlotState::Empty);

        let next = match state {
            SlotState::PendingPlace {
                desired,
                client_order_id,
            } => match exchange.locate_order(&client_order_id).await {
                // Found, whatever its remote state. Anything it filled while
                // pending is discovered by the fill poll against this
                // tracked order; only a confirmed-absent order empties the
                // slot.
                Ok(found) => {
                    info!(%slot, order_id = %found.order_id, "ambiguous place reached the venue");
                    SlotState::Resting(RestingOrder {
                        slot,
                        order_id: found.order_id,
                        client_order_id,
                        level_price: desired.level_price,
                        level_ratio: desired.level_ratio,
                        price: found.price,
                        qty: found.qty,
                        filled_qty: 0,
                    })
                }
                Err(ExchangeError::NotFound) => {
                    debug!(%slot, "ambiguous place never reached the venue");
                    SlotState::Empty
                }
                Err(e) => {
                    warn!(%slot, error = %e, "could not resolve pending place; keeping slot locked");
                    SlotState::PendingPlace {
                        desired,
                        client_order_id,
                    }
                }
            },

            SlotState::PendingCancel(order) => {
                match exchange.order_status(&order.order_id).await {
                    Ok(snapshot) => match snapshot.state {
                        RemoteOrderState::Cancelled | RemoteOrderState::Filled => {
                            // A fill while the cancel was in flight is picked
                            // up by the fill poll, which scans pending-cancel
                            // orders too.
                            SlotState::Empty
                        }
                        RemoteOrderState::Resting | RemoteOrderState::PartiallyFilled => {
                            self.cancel_resting(order, exchange).await
                        }
                        RemoteOrderState::Unknown => {
                            warn!(%slot, "remote order state unknown; keeping slot locked");
                            SlotState::PendingCancel(order)
                        }
                    },
                    Err(ExchangeError::NotFound) => SlotState::Empty,
                    Err(e) => {
                        warn!(%slot, error = %e, "could not resolve pending cancel; keeping slot locked");
                        SlotState::PendingCancel(order)
                    }
                }
            }

            other => other,
        };

        self.slots.insert(slot, next);
    }

    async fn place(&mut self, desired: DesiredOrder, exchange: &dyn Exchange) -> SlotState {
        let slot = desired.slot;
        let client_order_id = self.next_client_order_id(slot);

        // Never retried: a lost response may still have reached the venue,
        // and re-sending the same request can leave two live orders in one
        // slot. An ambiguous outcome locks the slot until remote state
        // settles it.
        let result = exchange
            .place_limit_order(desired.slot.side, desired.price, desired.qty, &client_order_id)
            .await;

        match result {
            Ok(order_id) => {
                info!(
                    %slot,
                    %order_id,
                    price = %desired.price,
                    qty = desired.qty,
                    level = %desired.level_price,
                    "order placed"
                );
                SlotState::Resting(RestingOrder {
                    slot,
                    order_id,
                    client_order_id,
                    level_price: desired.level_price,
                    level_ratio: desired.level_ratio,
                    price: desired.price,
                    qty: desired.qty,
                    filled_qty: 0,
                })
            }
            Err(e) if e.is_transient() => {
                // The request may have reached the venue. Lock the slot until
                // remote state settles the question.
                warn!(%slot, error = %e, "place outcome ambiguous; slot pending");
                SlotState::PendingPlace {
                    desired,
                    client_order_id,
                }
            }
            Err(e) => {
                error!(%slot, error = %e, "place rejected");
                SlotState::Empty
            }
        }
    }

    async fn cancel_resting(&self, order: RestingOrder, exchange: &dyn Exchange) -> SlotState {
        let slot = order.slot;

        let result = with_retry(self.max_retries, "cancel_order", || {
            exchange.cancel_order(&order.order_id)
        })
        .await;

        match result {
            Ok(CancelOutcome::Cancelled) => {
                info!(%slot, order_id = %order.order_id, "order cancelled");
                SlotState::Empty
            }
            Ok(CancelOutcome::NotFound) | Err(ExchangeError::NotFound) => {
                // Already gone: filled or cancelled elsewhere.
                debug!(%slot, order_id = %order.order_id, "cancel target already gone");
                SlotState::Empty
            }
            Err(e) if e.is_transient() => {
                warn!(%slot, error = %e, "cancel outcome ambiguous; slot pending");
                SlotState::PendingCancel(order)
            }
            Err(e) => {
                // Rejected cancel: assume the order still rests.
                error!(%slot, error = %e, "cancel rejected; order left resting");
                SlotState::Resting(order)
            }
        }
    }

    fn next_client_order_id(&mut self, slot: Slot) -> String {
        self.seq += 1;
        let tier = match slot.tier {
            Tier::Primary => "1",
            Tier::Secondary => "2",
        };
        let side = match slot.side {
            Side::Buy => "b",
            Side::Sell => "s",
        };
        format!("fgb{}{}{}", side, tier, self.seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::MockExchange;
    use rust_decimal_macros::dec;

    fn desired(slot: Slot, level: Decimal, price: Decimal, qty: u32) -> DesiredOrder {
        DesiredOrder {
            slot,
            level_price: level,
            level_ratio: dec!(0.5),
            price,
            qty,
        }
    }

    fn desired_map(orders: &[DesiredOrder]) -> BTreeMap<Slot, DesiredOrder> {
        orders.iter().map(|d| (d.slot, d.clone())).collect()
    }

    #[tokio::test]
    async fn test_places_desired_orders_once() {
        let exchange = MockExchange::new(dec!(135), 15);
        let mut reconciler = OrderReconciler::new(Decimal::ZERO, 3);

        let want = desired_map(&[
            desired(Slot::PRIMARY_BUY, dec!(133), dec!(132.3), 3),
            desired(Slot::SECONDARY_BUY, dec!(130), dec!(128.3), 5),
        ]);

        reconciler.reconcile(&want, &exchange).await;
        assert_eq!(exchange.place_count(), 2);
        assert_eq!(exchange.cancel_count(), 0);
        assert!(reconciler.resting(Slot::PRIMARY_BUY).is_some());
        assert!(reconciler.resting(Slot::SECONDARY_BUY).is_some());
    }

    #[tokio::test]
    async fn test_reconcile_is_idempotent() {
        let exchange = MockExchange::new(dec!(135), 15);
        let mut reconciler = OrderReconciler::new(Decimal::ZERO, 3);

        let want = desired_map(&[
            desired(Slot::PRIMARY_BUY, dec!(133), dec!(132.3), 3),
            desired(Slot::SECONDARY_SELL, dec!(142), dec!(143.3), 3),
        ]);

        reconciler.reconcile(&want, &exchange).await;
        let places = exchange.place_count();
        let cancels = exchange.cancel_count();

        // Same desired set, fresh jitter on the limit price: still no calls.
        let mut rejittered = want.clone();
        rejittered.get_mut(&Slot::PRIMARY_BUY).unwrap().price = dec!(132.7);
        reconciler.reconcile(&rejittered, &exchange).await;

        assert_eq!(exchange.place_count(), places);
        assert_eq!(exchange.cancel_count(), cancels);
    }

    #[tokio::test]
    async fn test_changed_level_cancels_then_places() {
        let exchange = MockExchange::new(dec!(135), 15);
        let mut reconciler = OrderReconciler::new(Decimal::ZERO, 3);

        let first = desired_map(&[desired(Slot::PRIMARY_BUY, dec!(133), dec!(132.3), 3)]);
        reconciler.reconcile(&first, &exchange).await;

        let moved = desired_map(&[desired(Slot::PRIMARY_BUY, dec!(130), dec!(129.2), 5)]);
        reconciler.reconcile(&moved, &exchange).await;

        assert_eq!(exchange.place_count(), 2);
        assert_eq!(exchange.cancel_count(), 1);
        let order = reconciler.resting(Slot::PRIMARY_BUY).unwrap();
        assert_eq!(order.level_price, dec!(130));
        assert_eq!(order.qty, 5);
    }

    #[tokio::test]
    async fn test_undesired_slot_is_cancelled() {
        let exchange = MockExchange::new(dec!(135), 15);
        let mut reconciler = OrderReconciler::new(Decimal::ZERO, 3);

        let want = desired_map(&[desired(Slot::PRIMARY_SELL, dec!(137.08), dec!(137.3), 2)]);
        reconciler.reconcile(&want, &exchange).await;

        reconciler.reconcile(&BTreeMap::new(), &exchange).await;
        assert_eq!(exchange.cancel_count(), 1);
        assert!(matches!(
            reconciler.state(Slot::PRIMARY_SELL),
            SlotState::Empty
        ));
        assert!(exchange.open_orders().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_partial_fill_does_not_trigger_replacement() {
        let exchange = MockExchange::new(dec!(135), 15);
        let mut reconciler = OrderReconciler::new(Decimal::ZERO, 3);

        let want = desired_map(&[desired(Slot::PRIMARY_BUY, dec!(133), dec!(132.3), 5)]);
        reconciler.reconcile(&want, &exchange).await;
        let places = exchange.place_count();

        // 2 contracts fill; the planner now wants 3 at the same level, which
        // is exactly what still rests.
        reconciler.note_fill(Slot::PRIMARY_BUY, 2);
        let shrunk = desired_map(&[desired(Slot::PRIMARY_BUY, dec!(133), dec!(132.6), 3)]);
        reconciler.reconcile(&shrunk, &exchange).await;

        assert_eq!(exchange.place_count(), places);
        assert_eq!(exchange.cancel_count(), 0);
    }

    #[tokio::test]
    async fn test_ambiguous_cancel_locks_slot_until_resolved() {
        let exchange = MockExchange::new(dec!(135), 15);
        let mut reconciler = OrderReconciler::new(Decimal::ZERO, 1);

        let want = desired_map(&[desired(Slot::PRIMARY_BUY, dec!(133), dec!(132.3), 3)]);
        reconciler.reconcile(&want, &exchange).await;

        // Cancel times out: the slot must not accept the replacement order.
        exchange.fail_cancels();
        let moved = desired_map(&[desired(Slot::PRIMARY_BUY, dec!(130), dec!(129.2), 5)]);
        reconciler.reconcile(&moved, &exchange).await;
        assert!(matches!(
            reconciler.state(Slot::PRIMARY_BUY),
            SlotState::PendingCancel(_)
        ));
        assert_eq!(exchange.place_count(), 1);

        // Venue recovers: the pending cancel resolves, then the new order is
        // placed into the now-confirmed-empty slot.
        exchange.heal();
        reconciler.reconcile(&moved, &exchange).await;
        assert_eq!(exchange.place_count(), 2);
        let order = reconciler.resting(Slot::PRIMARY_BUY).unwrap();
        assert_eq!(order.level_price, dec!(130));
    }

    #[tokio::test]
    async fn test_ambiguous_place_resolves_by_client_id() {
        let exchange = MockExchange::new(dec!(135), 15);
        let mut reconciler = OrderReconciler::new(Decimal::ZERO, 1);

        // Place succeeds on the venue but the response is lost.
        exchange.drop_place_responses();
        let want = desired_map(&[desired(Slot::PRIMARY_BUY, dec!(133), dec!(132.3), 3)]);
        reconciler.reconcile(&want, &exchange).await;
        assert!(matches!(
            reconciler.state(Slot::PRIMARY_BUY),
            SlotState::PendingPlace { .. }
        ));

        exchange.heal();
        reconciler.reconcile(&want, &exchange).await;

        // The order is found by client id; no duplicate is placed.
        let order = reconciler.resting(Slot::PRIMARY_BUY).unwrap();
        assert_eq!(order.qty, 3);
        assert_eq!(exchange.place_count(), 1);
        assert_eq!(exchange.open_orders().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_lost_place_response_is_never_resent() {
        let exchange = MockExchange::new(dec!(135), 15);
        // A generous retry budget must not apply to placements.
        let mut reconciler = OrderReconciler::new(Decimal::ZERO, 3);

        exchange.drop_place_responses();
        let want = desired_map(&[desired(Slot::PRIMARY_BUY, dec!(133), dec!(132.3), 3)]);
        reconciler.reconcile(&want, &exchange).await;

        // Exactly one request went out; the slot is locked, not retried.
        assert_eq!(exchange.place_count(), 1);
        assert!(matches!(
            reconciler.state(Slot::PRIMARY_BUY),
            SlotState::PendingPlace { .. }
        ));

        exchange.heal();
        reconciler.reconcile(&want, &exchange).await;

        // One live order in the slot, on the venue and in the tracker.
        assert_eq!(exchange.place_count(), 1);
        assert_eq!(exchange.open_orders().await.unwrap().len(), 1);
        assert_eq!(reconciler.live_orders().len(), 1);
    }

    #[tokio::test]
    async fn test_fill_during_ambiguous_place_keeps_order_tracked() {
        let exchange = MockExchange::new(dec!(135), 15);
        let mut reconciler = OrderReconciler::new(Decimal::ZERO, 1);

        exchange.drop_place_responses();
        let want = desired_map(&[desired(Slot::PRIMARY_BUY, dec!(133), dec!(132.3), 3)]);
        reconciler.reconcile(&want, &exchange).await;

        // The order fills completely while the slot is still pending.
        let order_id = exchange.open_orders().await.unwrap()[0].order_id.clone();
        exchange.fill_order(&order_id, 3);

        exchange.heal();
        reconciler.resolve_all_pending(&exchange).await;

        // The filled order is tracked, not declared absent, so the fill
        // poll can discover its executions.
        let live = reconciler.live_orders();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].order_id, order_id);
        assert_eq!(live[0].filled_qty, 0);
        assert_eq!(exchange.place_count(), 1);
    }

    #[tokio::test]
    async fn test_cancel_slot_empties_the_slot() {
        let exchange = MockExchange::new(dec!(135), 15);
        let mut reconciler = OrderReconciler::new(Decimal::ZERO, 3);

        let want = desired_map(&[desired(Slot::SECONDARY_BUY, dec!(130), dec!(128.3), 5)]);
        reconciler.reconcile(&want, &exchange).await;

        reconciler.cancel_slot(Slot::SECONDARY_BUY, &exchange).await;
        assert!(matches!(
            reconciler.state(Slot::SECONDARY_BUY),
            SlotState::Empty
        ));
        assert_eq!(exchange.cancel_count(), 1);
    }
}
