//! Trading engine.
//!
//! Single owner of all mutable trading state. Each poll cycle runs the same
//! pipeline: fetch price, detect fills on the orders we believe are live,
//! apply them, then plan and reconcile the desired order set. A failed price
//! fetch skips the whole cycle and leaves resting orders untouched; stale
//! orders at a known-good price beat no orders at an unknown price.

use crate::config::Config;
use crate::exchange::{Exchange, ExchangeError, RemoteOrderState};
use crate::grid::{
    FillEvent, FillHandler, Jitter, LevelTable, OrderPlanner, OrderReconciler, PositionLedger,
    RestingOrder,
};
use crate::notify::TelegramNotifier;
use crate::persistence::PersistenceManager;
use anyhow::{Context, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub struct Engine {
    config: Config,
    exchange: Arc<dyn Exchange>,
    planner: OrderPlanner,
    reconciler: OrderReconciler,
    fills: FillHandler,
    persistence: PersistenceManager,
    notifier: TelegramNotifier,
    total_pnl: Decimal,
    cycle_count: u64,
}

impl Engine {
    pub fn new(
        config: Config,
        exchange: Arc<dyn Exchange>,
        persistence: PersistenceManager,
        notifier: TelegramNotifier,
    ) -> Result<Self> {
        let table = LevelTable::build(&config.grid)?;
        let planner = OrderPlanner::new(
            table,
            Jitter::new(config.grid.jitter_offsets.clone()),
            config.grid.secondary_offset,
            config.grid.price_tick,
        );
        let reconciler = OrderReconciler::new(
            config.grid.price_tolerance,
            config.engine.max_retries,
        );

        // FIFO accounting continues where the last run left off.
        let lots = persistence.load_lots()?;
        if !lots.is_empty() {
            info!(
                lots = lots.len(),
                position = lots.iter().map(|lot| lot.qty).sum::<u32>(),
                "restored lot queue from database"
            );
        }
        let fills = FillHandler::new(PositionLedger::from_lots(lots));

        let total_pnl = persistence.trade_stats()?.total_pnl;

        Ok(Self {
            config,
            exchange,
            planner,
            reconciler,
            fills,
            persistence,
            notifier,
            total_pnl,
            cycle_count: 0,
        })
    }

    pub fn position_qty(&self) -> u32 {
        self.fills.ledger().position_qty()
    }

    pub fn total_pnl(&self) -> Decimal {
        self.total_pnl
    }

    /// Orders currently believed live, for status reporting and tests.
    pub fn live_orders(&self) -> Vec<RestingOrder> {
        self.reconciler.live_orders()
    }

    /// Cancel any orders resting on the venue from a previous run. This
    /// engine only trusts orders it placed itself; stray ones would double
    /// up against the four slots.
    pub async fn startup_sync(&mut self) -> Result<()> {
        let open = self
            .exchange
            .open_orders()
            .await
            .context("Failed to list open orders during startup")?;

        for order in &open {
            info!(
                order_id = %order.order_id,
                side = %order.side,
                price = %order.price,
                "cancelling order left over from a previous run"
            );
            match self.exchange.cancel_order(&order.order_id).await {
                Ok(_) => {}
                Err(ExchangeError::NotFound) => {}
                Err(e) => warn!(order_id = %order.order_id, error = %e, "startup cancel failed"),
            }
        }

        let position = self
            .exchange
            .position()
            .await
            .context("Failed to fetch position during startup")?;
        let tracked = self.fills.ledger().position_qty();
        if position != tracked {
            warn!(
                exchange = position,
                tracked,
                "exchange position differs from tracked lots; lot accounting may be incomplete"
            );
        }

        if let Ok(price) = self.exchange.price().await {
            self.notifier
                .notify_started(&self.config.grid.symbol, price, tracked)
                .await;
        }
        Ok(())
    }

    /// Run the poll loop until ctrl-c.
    pub async fn run(&mut self) -> Result<()> {
        self.startup_sync().await?;

        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.engine.poll_interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(
            symbol = %self.config.grid.symbol,
            poll_interval_secs = self.config.engine.poll_interval_secs,
            "starting trading loop"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.cycle().await {
                        error!(error = %e, "cycle failed");
                        self.notifier.notify_error(&e.to_string()).await;
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("shutdown signal received");
                    break;
                }
            }
        }

        self.notifier
            .notify_stopped(&self.config.grid.symbol, self.position_qty())
            .await;
        Ok(())
    }

    /// One poll cycle: price, fills, plan, reconcile.
    pub async fn cycle(&mut self) -> Result<()> {
        self.cycle_count += 1;

        let price = match self.exchange.price().await {
            Ok(price) => price,
            Err(e) => {
                // No feed, no decisions. Resting orders stay exactly where
                // they are.
                warn!(error = %e, "price fetch failed; skipping cycle");
                return Ok(());
            }
        };

        // Settle ambiguous in-flight requests first so an order that filled
        // while its slot was pending is already tracked when fills are
        // polled.
        self.reconciler
            .resolve_all_pending(self.exchange.as_ref())
            .await;
        self.poll_fills().await?;
        self.check_position_drift().await;

        let position = self.fills.ledger().position_qty();
        let desired = self.planner.compute_desired(price, position);
        debug!(
            cycle = self.cycle_count,
            %price,
            position,
            desired = desired.len(),
            "reconciling"
        );
        self.reconciler
            .reconcile(&desired, self.exchange.as_ref())
            .await;

        Ok(())
    }

    /// Poll remote state for every order we believe the venue can still
    /// fill, and apply any new executions.
    async fn poll_fills(&mut self) -> Result<()> {
        for order in self.reconciler.live_orders() {
            let snapshot = match self.exchange.order_status(&order.order_id).await {
                Ok(snapshot) => snapshot,
                Err(ExchangeError::NotFound) => {
                    // Gone without a trace; let reconciliation resolve the
                    // slot against remote state.
                    warn!(order_id = %order.order_id, "live order vanished from venue");
                    self.reconciler
                        .cancel_slot(order.slot, self.exchange.as_ref())
                        .await;
                    continue;
                }
                Err(e) => {
                    warn!(order_id = %order.order_id, error = %e, "order status fetch failed");
                    continue;
                }
            };

            let delta = snapshot.filled_qty.saturating_sub(order.filled_qty);
            if delta > 0 {
                let event = FillEvent {
                    slot: order.slot,
                    order_id: order.order_id.clone(),
                    // Synthesized from the cumulative filled quantity, which
                    // only grows, so re-polling the same state dedupes.
                    fill_id: format!("{}-{}", order.order_id, snapshot.filled_qty),
                    level_ratio: order.level_ratio,
                    price: snapshot.avg_fill_price.unwrap_or(order.price),
                    qty: delta,
                    full: snapshot.state == RemoteOrderState::Filled,
                    timestamp: Utc::now(),
                };
                self.apply_fill(event).await?;
            } else if snapshot.state == RemoteOrderState::Cancelled {
                // Cancelled out from under us (manually, or by the venue).
                warn!(order_id = %order.order_id, slot = %order.slot, "order cancelled externally");
                self.reconciler
                    .cancel_slot(order.slot, self.exchange.as_ref())
                    .await;
            }
        }
        Ok(())
    }

    async fn apply_fill(&mut self, event: FillEvent) -> Result<()> {
        let Some(record) = self
            .fills
            .on_fill(event.clone(), &mut self.reconciler, self.exchange.as_ref())
            .await
        else {
            return Ok(());
        };

        if let Some(pnl) = record.realized_pnl {
            self.total_pnl += pnl;
        }

        self.persistence
            .record_trade(&self.config.grid.symbol, &record)
            .context("Failed to record trade")?;
        self.persistence
            .save_lots(self.fills.ledger().lots())
            .context("Failed to persist lot queue")?;

        self.notifier
            .notify_fill(
                &self.config.grid.symbol,
                &record,
                &event,
                self.fills.ledger().position_qty(),
                self.total_pnl,
            )
            .await;
        Ok(())
    }

    /// Exchange position is authoritative for contracts held; the ledger is
    /// authoritative for cost basis. Drift between them means fills were
    /// missed (or happened outside this bot) and deserves a loud warning.
    async fn check_position_drift(&self) {
        if let Ok(position) = self.exchange.position().await {
            let tracked = self.fills.ledger().position_qty();
            if position != tracked {
                warn!(
                    exchange = position,
                    tracked, "position drift between exchange and lot ledger"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TelegramConfig;
    use crate::exchange::MockExchange;
    use crate::grid::Slot;
    use rust_decimal_macros::dec;

    fn engine_with(exchange: Arc<MockExchange>) -> Engine {
        let config = Config::default();
        Engine::new(
            config,
            exchange,
            PersistenceManager::in_memory().unwrap(),
            TelegramNotifier::new(TelegramConfig::default()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_cycle_places_grid_orders() {
        let exchange = Arc::new(MockExchange::new(dec!(135.00), 0));
        let mut engine = engine_with(exchange.clone());

        engine.cycle().await.unwrap();

        // Flat book at 135: primary buy at 133 (target 18), secondary buy at
        // 130, primary sell absent (nothing to sell), secondary sell absent.
        let live = engine.live_orders();
        assert_eq!(live.len(), 2);
        assert!(live.iter().all(|o| o.slot.side == crate::grid::Side::Buy));
        assert_eq!(exchange.open_orders().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_repeated_cycles_are_idempotent() {
        let exchange = Arc::new(MockExchange::new(dec!(135.00), 0));
        let mut engine = engine_with(exchange.clone());

        engine.cycle().await.unwrap();
        let places = exchange.place_count();

        for _ in 0..5 {
            engine.cycle().await.unwrap();
        }
        assert_eq!(exchange.place_count(), places);
        assert_eq!(exchange.cancel_count(), 0);
    }

    #[tokio::test]
    async fn test_price_failure_leaves_orders_untouched() {
        let exchange = Arc::new(MockExchange::new(dec!(135.00), 0));
        let mut engine = engine_with(exchange.clone());

        engine.cycle().await.unwrap();
        let live_before = engine.live_orders().len();

        exchange.fail_prices();
        engine.cycle().await.unwrap();

        assert_eq!(engine.live_orders().len(), live_before);
        assert_eq!(exchange.cancel_count(), 0);
    }

    #[tokio::test]
    async fn test_buy_fill_is_applied_and_replanned() {
        let exchange = Arc::new(MockExchange::new(dec!(135.00), 0));
        let mut engine = engine_with(exchange.clone());

        engine.cycle().await.unwrap();
        let primary = engine
            .live_orders()
            .into_iter()
            .find(|o| o.slot == Slot::PRIMARY_BUY)
            .unwrap();

        // Price drops through 133 and the primary buy fills completely.
        exchange.fill_order(&primary.order_id, primary.qty);
        exchange.set_price(dec!(132.00));
        engine.cycle().await.unwrap();

        assert_eq!(engine.position_qty(), primary.qty);
        // The fill cancelled the sibling secondary and the planner rebuilt
        // the buy side around 132.
        let live = engine.live_orders();
        assert!(live
            .iter()
            .any(|o| o.slot == Slot::PRIMARY_BUY && o.level_price == dec!(130.00)));
    }

    #[tokio::test]
    async fn test_sell_fill_realizes_pnl() {
        let exchange = Arc::new(MockExchange::new(dec!(135.00), 0));
        let mut engine = engine_with(exchange.clone());

        // Build a position by filling a buy first.
        engine.cycle().await.unwrap();
        let buy = engine
            .live_orders()
            .into_iter()
            .find(|o| o.slot == Slot::PRIMARY_BUY)
            .unwrap();
        exchange.fill_order(&buy.order_id, buy.qty);
        engine.cycle().await.unwrap();
        assert!(engine.position_qty() > 0);

        // Price runs up; a sell slot appears and fills.
        exchange.set_price(dec!(139.00));
        engine.cycle().await.unwrap();
        let sell = engine
            .live_orders()
            .into_iter()
            .find(|o| o.slot.side == crate::grid::Side::Sell)
            .expect("a sell order should rest after the run-up");
        exchange.fill_order(&sell.order_id, sell.qty);
        engine.cycle().await.unwrap();

        assert!(engine.total_pnl() > Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_partial_fill_keeps_remainder_resting() {
        let exchange = Arc::new(MockExchange::new(dec!(135.00), 0));
        let mut engine = engine_with(exchange.clone());

        engine.cycle().await.unwrap();
        let primary = engine
            .live_orders()
            .into_iter()
            .find(|o| o.slot == Slot::PRIMARY_BUY)
            .unwrap();
        assert!(primary.qty >= 2);

        exchange.fill_order(&primary.order_id, 1);
        engine.cycle().await.unwrap();

        assert_eq!(engine.position_qty(), 1);
        // The partially filled order itself is never replaced; its remainder
        // matches the shrunken desired quantity exactly.
        let live = engine.live_orders();
        let still = live.iter().find(|o| o.slot == Slot::PRIMARY_BUY).unwrap();
        assert_eq!(still.order_id, primary.order_id);
        assert_eq!(still.remaining_qty(), primary.qty - 1);
    }

    #[tokio::test]
    async fn test_fill_during_ambiguous_place_reaches_ledger() {
        let exchange = Arc::new(MockExchange::new(dec!(135.00), 0));
        let mut engine = engine_with(exchange.clone());

        // Both buy placements reach the venue but the responses are lost.
        exchange.drop_place_responses();
        engine.cycle().await.unwrap();
        assert!(engine.live_orders().is_empty());

        // The primary buy (18 contracts at level 133) fills completely
        // while its slot is still pending.
        let open = exchange.open_orders().await.unwrap();
        let primary = open.iter().find(|o| o.qty == 18).unwrap();
        exchange.fill_order(&primary.order_id, primary.qty);

        exchange.heal();
        engine.cycle().await.unwrap();

        // The fill reached the ledger; venue and tracked positions agree.
        assert_eq!(engine.position_qty(), 18);
        assert_eq!(exchange.position().await.unwrap(), engine.position_qty());
        assert_eq!(engine.total_pnl(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_startup_sync_cancels_stray_orders() {
        let exchange = Arc::new(MockExchange::new(dec!(135.00), 0));
        exchange
            .place_limit_order(crate::grid::Side::Buy, dec!(120.0), 4, "stale-run")
            .await
            .unwrap();

        let mut engine = engine_with(exchange.clone());
        engine.startup_sync().await.unwrap();

        assert!(exchange.open_orders().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_externally_cancelled_order_is_replaced() {
        let exchange = Arc::new(MockExchange::new(dec!(135.00), 0));
        let mut engine = engine_with(exchange.clone());

        engine.cycle().await.unwrap();
        let primary = engine
            .live_orders()
            .into_iter()
            .find(|o| o.slot == Slot::PRIMARY_BUY)
            .unwrap();

        // Someone cancels the order behind our back.
        exchange.cancel_order(&primary.order_id).await.unwrap();
        engine.cycle().await.unwrap();

        // The slot healed and a fresh order rests at the same level.
        let live = engine.live_orders();
        let replaced = live.iter().find(|o| o.slot == Slot::PRIMARY_BUY).unwrap();
        assert_ne!(replaced.order_id, primary.order_id);
        assert_eq!(replaced.level_price, primary.level_price);
    }
}
