//! Exchange integrations.
//!
//! ## OKX
//! REST connectivity for the single traded perpetual swap:
//! - Market data (last price)
//! - Account operations (position, orders)
//!
//! ## Mock
//! In-memory venue used by the test suite and for paper trading.

pub mod mock;
pub mod okx;
mod traits;

use std::time::Duration;
use tracing::warn;

pub use mock::MockExchange;
pub use okx::OkxClient;
pub use traits::{
    CancelOutcome, Exchange, ExchangeError, LocatedOrder, OpenOrder, OrderSnapshot,
    RemoteOrderState,
};

/// Run an exchange call, retrying transient failures with incremental
/// backoff. Permanent failures surface immediately; the final transient
/// failure is returned as-is so callers can treat the request as ambiguous.
pub async fn with_retry<T, F, Fut>(
    max_retries: u32,
    what: &str,
    mut call: F,
) -> Result<T, ExchangeError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, ExchangeError>>,
{
    let mut last_err = None;

    for attempt in 1..=max_retries.max(1) {
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() => {
                warn!(what, attempt, max_retries, error = %e, "transient exchange failure");
                last_err = Some(e);
                if attempt < max_retries {
                    tokio::time::sleep(Duration::from_millis(500 * attempt as u64)).await;
                }
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_err.unwrap_or_else(|| ExchangeError::Transient("no attempts made".to_string())))
}
