//! Type definitions for OKX v5 API responses.
//!
//! Every response arrives in a `{code, msg, data}` envelope with the payload
//! in `data` as an array, even for single-object results. Numeric fields are
//! strings on the wire; fields that can legitimately be empty strings (for
//! example `avgPx` before anything fills) stay `String` and are parsed by
//! the client.

use rust_decimal::Decimal;
use serde::Deserialize;

/// Standard OKX response envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    pub code: String,
    #[serde(default)]
    pub msg: String,
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
}

/// Ticker snapshot from `/api/v5/market/ticker`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickerData {
    pub inst_id: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub last: Decimal,
}

/// Position row from `/api/v5/account/positions`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionData {
    pub inst_id: String,
    /// Contracts held; empty when the position row is a placeholder
    #[serde(default)]
    pub pos: String,
}

/// Per-order result row from `/api/v5/trade/order` and
/// `/api/v5/trade/cancel-order` POSTs. `sCode` is the per-order status code;
/// the envelope `code` only reports batch-level failure.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderAck {
    #[serde(default)]
    pub ord_id: String,
    #[serde(default)]
    pub cl_ord_id: String,
    #[serde(default)]
    pub s_code: String,
    #[serde(default)]
    pub s_msg: String,
}

/// Order detail from `/api/v5/trade/order` GET and
/// `/api/v5/trade/orders-pending`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDetail {
    pub ord_id: String,
    #[serde(default)]
    pub cl_ord_id: String,
    pub side: String,
    /// live | partially_filled | filled | canceled
    pub state: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub px: Decimal,
    #[serde(default)]
    pub sz: String,
    /// Accumulated filled size; empty before the first fill
    #[serde(default)]
    pub acc_fill_sz: String,
    /// Average fill price; empty before the first fill
    #[serde(default)]
    pub avg_px: String,
}
