//! In-memory exchange used by the test suite and for paper trading.
//!
//! Tracks resting orders and counts placement and cancel requests so tests
//! can assert how many venue calls a code path issued. Failure injection
//! covers the interesting cases: lost place responses, failing cancels, and
//! a dead market-data feed.

use crate::exchange::traits::{
    CancelOutcome, Exchange, ExchangeError, LocatedOrder, OpenOrder, OrderSnapshot,
    RemoteOrderState,
};
use crate::grid::Side;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone)]
struct MockOrder {
    order_id: String,
    client_order_id: String,
    side: Side,
    price: Decimal,
    qty: u32,
    filled_qty: u32,
    state: RemoteOrderState,
}

#[derive(Debug, Default)]
struct Inner {
    price: Decimal,
    position: u32,
    orders: HashMap<String, MockOrder>,
    next_id: u64,
    place_count: u32,
    cancel_count: u32,
    fail_cancels: bool,
    drop_places: bool,
    fail_prices: bool,
}

/// Deterministic in-memory venue.
#[derive(Debug, Default)]
pub struct MockExchange {
    inner: Mutex<Inner>,
}

impl MockExchange {
    pub fn new(price: Decimal, position: u32) -> Self {
        Self {
            inner: Mutex::new(Inner {
                price,
                position,
                ..Inner::default()
            }),
        }
    }

    pub fn set_price(&self, price: Decimal) {
        self.inner.lock().unwrap().price = price;
    }

    pub fn set_position(&self, position: u32) {
        self.inner.lock().unwrap().position = position;
    }

    pub fn place_count(&self) -> u32 {
        self.inner.lock().unwrap().place_count
    }

    pub fn cancel_count(&self) -> u32 {
        self.inner.lock().unwrap().cancel_count
    }

    /// Subsequent cancels fail with a transient error; the order stays.
    pub fn fail_cancels(&self) {
        self.inner.lock().unwrap().fail_cancels = true;
    }

    /// Subsequent places reach the venue but the response is lost.
    pub fn drop_place_responses(&self) {
        self.inner.lock().unwrap().drop_places = true;
    }

    /// Subsequent price queries fail with a transient error.
    pub fn fail_prices(&self) {
        self.inner.lock().unwrap().fail_prices = true;
    }

    /// Clear all injected failures.
    pub fn heal(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_cancels = false;
        inner.drop_places = false;
        inner.fail_prices = false;
    }

    /// Fill part or all of a resting order, adjusting the venue position.
    pub fn fill_order(&self, order_id: &str, qty: u32) {
        let mut inner = self.inner.lock().unwrap();
        let side = {
            let Some(order) = inner.orders.get_mut(order_id) else {
                panic!("fill_order: unknown order {order_id}");
            };
            order.filled_qty = (order.filled_qty + qty).min(order.qty);
            order.state = if order.filled_qty == order.qty {
                RemoteOrderState::Filled
            } else {
                RemoteOrderState::PartiallyFilled
            };
            order.side
        };
        match side {
            Side::Buy => inner.position += qty,
            Side::Sell => inner.position = inner.position.saturating_sub(qty),
        }
    }

    /// Order id of the order with the given client id, if any.
    pub fn order_id_for(&self, client_order_id: &str) -> Option<String> {
        let inner = self.inner.lock().unwrap();
        inner
            .orders
            .values()
            .find(|order| order.client_order_id == client_order_id)
            .map(|order| order.order_id.clone())
    }

    fn is_open(state: RemoteOrderState) -> bool {
        matches!(
            state,
            RemoteOrderState::Resting | RemoteOrderState::PartiallyFilled
        )
    }
}

#[async_trait]
impl Exchange for MockExchange {
    async fn place_limit_order(
        &self,
        side: Side,
        price: Decimal,
        qty: u32,
        client_order_id: &str,
    ) -> Result<String, ExchangeError> {
        let mut inner = self.inner.lock().unwrap();
        inner.place_count += 1;
        inner.next_id += 1;
        let order_id = format!("mock-{}", inner.next_id);
        inner.orders.insert(
            order_id.clone(),
            MockOrder {
                order_id: order_id.clone(),
                client_order_id: client_order_id.to_string(),
                side,
                price,
                qty,
                filled_qty: 0,
                state: RemoteOrderState::Resting,
            },
        );
        if inner.drop_places {
            return Err(ExchangeError::Transient("response lost".to_string()));
        }
        Ok(order_id)
    }

    async fn cancel_order(&self, order_id: &str) -> Result<CancelOutcome, ExchangeError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_cancels {
            return Err(ExchangeError::Transient("cancel timed out".to_string()));
        }
        inner.cancel_count += 1;
        match inner.orders.get_mut(order_id) {
            Some(order) if Self::is_open(order.state) => {
                order.state = RemoteOrderState::Cancelled;
                Ok(CancelOutcome::Cancelled)
            }
            Some(_) | None => Ok(CancelOutcome::NotFound),
        }
    }

    async fn order_status(&self, order_id: &str) -> Result<OrderSnapshot, ExchangeError> {
        let inner = self.inner.lock().unwrap();
        match inner.orders.get(order_id) {
            Some(order) => Ok(OrderSnapshot {
                state: order.state,
                filled_qty: order.filled_qty,
                avg_fill_price: (order.filled_qty > 0).then_some(order.price),
            }),
            None => Err(ExchangeError::NotFound),
        }
    }

    async fn locate_order(&self, client_order_id: &str) -> Result<LocatedOrder, ExchangeError> {
        let inner = self.inner.lock().unwrap();
        inner
            .orders
            .values()
            .find(|order| order.client_order_id == client_order_id)
            .map(|order| LocatedOrder {
                order_id: order.order_id.clone(),
                price: order.price,
                qty: order.qty,
                snapshot: OrderSnapshot {
                    state: order.state,
                    filled_qty: order.filled_qty,
                    avg_fill_price: (order.filled_qty > 0).then_some(order.price),
                },
            })
            .ok_or(ExchangeError::NotFound)
    }

    async fn open_orders(&self) -> Result<Vec<OpenOrder>, ExchangeError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .orders
            .values()
            .filter(|order| Self::is_open(order.state))
            .map(|order| OpenOrder {
                order_id: order.order_id.clone(),
                client_order_id: order.client_order_id.clone(),
                side: order.side,
                price: order.price,
                qty: order.qty,
            })
            .collect())
    }

    async fn position(&self) -> Result<u32, ExchangeError> {
        Ok(self.inner.lock().unwrap().position)
    }

    async fn price(&self) -> Result<Decimal, ExchangeError> {
        let inner = self.inner.lock().unwrap();
        if inner.fail_prices {
            return Err(ExchangeError::Transient("ticker unavailable".to_string()));
        }
        Ok(inner.price)
    }
}
