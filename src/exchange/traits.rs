//! Venue-agnostic exchange boundary.
//!
//! The core only ever talks to this trait; the OKX client and the mock
//! venue both implement it. Errors are classified so callers can retry
//! transient failures without touching local slot state.

use crate::grid::Side;
use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

/// Exchange call failure, classified for retry handling.
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// Timeout, rate limit, connectivity: safe to retry, but the request may
    /// or may not have reached the venue.
    #[error("transient exchange failure: {0}")]
    Transient(String),
    /// The referenced order does not exist on the venue.
    #[error("order not found")]
    NotFound,
    /// The venue rejected the request (bad parameters, insufficient margin).
    /// Retrying will not help.
    #[error("request rejected by exchange: {0}")]
    Rejected(String),
}

impl ExchangeError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ExchangeError::Transient(_))
    }
}

/// Result of a cancel request. A missing order is reported separately
/// because it usually means the order filled or was already cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    NotFound,
}

/// Remote order state as reported by the venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteOrderState {
    Resting,
    PartiallyFilled,
    Filled,
    Cancelled,
    Unknown,
}

/// Snapshot of a single order's remote state.
#[derive(Debug, Clone)]
pub struct OrderSnapshot {
    pub state: RemoteOrderState,
    /// Accumulated filled quantity
    pub filled_qty: u32,
    /// Average fill price, when anything has filled
    pub avg_fill_price: Option<Decimal>,
}

/// An order located by client order id. The venue keeps recently filled and
/// cancelled orders queryable, so a lookup can find orders that are no
/// longer open.
#[derive(Debug, Clone)]
pub struct LocatedOrder {
    pub order_id: String,
    pub price: Decimal,
    pub qty: u32,
    pub snapshot: OrderSnapshot,
}

/// An order currently resting on the venue.
#[derive(Debug, Clone)]
pub struct OpenOrder {
    pub order_id: String,
    pub client_order_id: String,
    pub side: Side,
    pub price: Decimal,
    pub qty: u32,
}

/// The collaborator boundary to the venue.
#[async_trait]
pub trait Exchange: Send + Sync {
    /// Place a limit order; returns the venue's order id.
    async fn place_limit_order(
        &self,
        side: Side,
        price: Decimal,
        qty: u32,
        client_order_id: &str,
    ) -> Result<String, ExchangeError>;

    /// Cancel a resting order.
    async fn cancel_order(&self, order_id: &str) -> Result<CancelOutcome, ExchangeError>;

    /// Authoritative remote state of one order.
    async fn order_status(&self, order_id: &str) -> Result<OrderSnapshot, ExchangeError>;

    /// Locate an order by client order id, whether or not it is still open.
    async fn locate_order(&self, client_order_id: &str) -> Result<LocatedOrder, ExchangeError>;

    /// All orders currently resting for the instrument.
    async fn open_orders(&self) -> Result<Vec<OpenOrder>, ExchangeError>;

    /// Current position in contracts.
    async fn position(&self) -> Result<u32, ExchangeError>;

    /// Last traded price.
    async fn price(&self) -> Result<Decimal, ExchangeError>;
}
