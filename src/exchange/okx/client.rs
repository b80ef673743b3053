//! OKX v5 REST API client.
//!
//! All requests are signed with `base64(HMAC-SHA256(secret, timestamp +
//! method + path + body))`. The demo environment shares the production
//! domain and is selected with the `x-simulated-trading` header.

use crate::config::OkxConfig;
use crate::exchange::okx::types::{ApiResponse, OrderAck, OrderDetail, PositionData, TickerData};
use crate::exchange::traits::{
    CancelOutcome, Exchange, ExchangeError, LocatedOrder, OpenOrder, OrderSnapshot,
    RemoteOrderState,
};
use crate::grid::Side;
use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde_json::json;
use sha2::Sha256;
use tracing::debug;

const BASE_URL: &str = "https://www.okx.com";

// Venue error codes that mean the referenced order is gone.
const CODE_CANCEL_ORDER_MISSING: &str = "51400";
const CODE_QUERY_ORDER_MISSING: &str = "51603";
// Request rate limit reached.
const CODE_RATE_LIMIT: &str = "50011";

/// OKX API client bound to a single instrument.
pub struct OkxClient {
    http: Client,
    api_key: String,
    secret_key: String,
    passphrase: String,
    simulated: bool,
    inst_id: String,
}

impl OkxClient {
    /// Create a new OKX client from configuration.
    pub fn new(config: &OkxConfig, inst_id: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            secret_key: config.secret_key.clone(),
            passphrase: config.passphrase.clone(),
            simulated: config.simulated,
            inst_id: inst_id.to_string(),
        })
    }

    /// ISO-8601 timestamp with millisecond precision, as the signature
    /// scheme requires.
    fn timestamp() -> String {
        Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
    }

    /// Sign `timestamp + METHOD + request_path + body` with the API secret.
    fn sign(&self, timestamp: &str, method: &str, request_path: &str, body: &str) -> String {
        let message = format!("{timestamp}{method}{request_path}{body}");
        let mut mac = Hmac::<Sha256>::new_from_slice(self.secret_key.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(message.as_bytes());
        BASE64.encode(mac.finalize().into_bytes())
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<serde_json::Value>,
    ) -> Result<ApiResponse<T>, ExchangeError> {
        let request_path = if query.is_empty() {
            path.to_string()
        } else {
            let query_string: String = query
                .iter()
                .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
                .collect::<Vec<_>>()
                .join("&");
            format!("{path}?{query_string}")
        };

        let body_string = body
            .as_ref()
            .map(|b| b.to_string())
            .unwrap_or_default();

        let timestamp = Self::timestamp();
        let signature = self.sign(&timestamp, method.as_str(), &request_path, &body_string);

        let url = format!("{BASE_URL}{request_path}");
        let mut request = self
            .http
            .request(method, &url)
            .header("OK-ACCESS-KEY", &self.api_key)
            .header("OK-ACCESS-SIGN", signature)
            .header("OK-ACCESS-TIMESTAMP", timestamp)
            .header("OK-ACCESS-PASSPHRASE", &self.passphrase)
            .header("Content-Type", "application/json");
        if self.simulated {
            request = request.header("x-simulated-trading", "1");
        }
        if !body_string.is_empty() {
            request = request.body(body_string);
        }

        let response = request.send().await.map_err(|e| {
            ExchangeError::Transient(format!("request to {url} failed: {e}"))
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(ExchangeError::Transient(format!(
                "{url} returned HTTP {status}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| ExchangeError::Transient(format!("failed to parse {url} response: {e}")))
    }

    /// Classify a non-zero OKX status code.
    fn classify(code: &str, msg: &str) -> ExchangeError {
        match code {
            CODE_CANCEL_ORDER_MISSING | CODE_QUERY_ORDER_MISSING => ExchangeError::NotFound,
            CODE_RATE_LIMIT => ExchangeError::Transient(format!("rate limited: {msg}")),
            _ if msg.contains("Order does not exist") => ExchangeError::NotFound,
            _ => ExchangeError::Rejected(format!("code {code}: {msg}")),
        }
    }

    fn check_envelope<T>(response: &ApiResponse<T>) -> Result<(), ExchangeError> {
        if response.code == "0" {
            Ok(())
        } else {
            Err(Self::classify(&response.code, &response.msg))
        }
    }

    fn map_state(state: &str) -> RemoteOrderState {
        match state {
            "live" => RemoteOrderState::Resting,
            "partially_filled" => RemoteOrderState::PartiallyFilled,
            "filled" => RemoteOrderState::Filled,
            "canceled" | "mmp_canceled" => RemoteOrderState::Cancelled,
            _ => RemoteOrderState::Unknown,
        }
    }

    fn parse_qty(raw: &str) -> u32 {
        raw.parse().unwrap_or(0)
    }
}

#[async_trait]
impl Exchange for OkxClient {
    async fn place_limit_order(
        &self,
        side: Side,
        price: Decimal,
        qty: u32,
        client_order_id: &str,
    ) -> Result<String, ExchangeError> {
        let body = json!({
            "instId": self.inst_id,
            "tdMode": "cross",
            "side": side.to_string(),
            "ordType": "limit",
            "px": price.to_string(),
            "sz": qty.to_string(),
            "clOrdId": client_order_id,
        });

        debug!(inst_id = %self.inst_id, %side, %price, qty, "placing limit order");

        let response: ApiResponse<OrderAck> = self
            .request(Method::POST, "/api/v5/trade/order", &[], Some(body))
            .await?;
        Self::check_envelope(&response)?;

        let ack = response
            .data
            .first()
            .ok_or_else(|| ExchangeError::Transient("empty order response".to_string()))?;
        if ack.s_code != "0" {
            return Err(Self::classify(&ack.s_code, &ack.s_msg));
        }
        Ok(ack.ord_id.clone())
    }

    async fn cancel_order(&self, order_id: &str) -> Result<CancelOutcome, ExchangeError> {
        let body = json!({
            "instId": self.inst_id,
            "ordId": order_id,
        });

        let response: ApiResponse<OrderAck> = self
            .request(Method::POST, "/api/v5/trade/cancel-order", &[], Some(body))
            .await?;

        match Self::check_envelope(&response) {
            Ok(()) => {}
            Err(ExchangeError::NotFound) => return Ok(CancelOutcome::NotFound),
            Err(e) => return Err(e),
        }

        match response.data.first() {
            Some(ack) if ack.s_code == "0" => Ok(CancelOutcome::Cancelled),
            Some(ack) => match Self::classify(&ack.s_code, &ack.s_msg) {
                ExchangeError::NotFound => Ok(CancelOutcome::NotFound),
                e => Err(e),
            },
            None => Err(ExchangeError::Transient("empty cancel response".to_string())),
        }
    }

    async fn order_status(&self, order_id: &str) -> Result<OrderSnapshot, ExchangeError> {
        let response: ApiResponse<OrderDetail> = self
            .request(
                Method::GET,
                "/api/v5/trade/order",
                &[("instId", &self.inst_id), ("ordId", order_id)],
                None,
            )
            .await?;
        Self::check_envelope(&response)?;

        let detail = response.data.first().ok_or(ExchangeError::NotFound)?;
        Ok(OrderSnapshot {
            state: Self::map_state(&detail.state),
            filled_qty: Self::parse_qty(&detail.acc_fill_sz),
            avg_fill_price: detail.avg_px.parse().ok(),
        })
    }

    async fn locate_order(&self, client_order_id: &str) -> Result<LocatedOrder, ExchangeError> {
        let response: ApiResponse<OrderDetail> = self
            .request(
                Method::GET,
                "/api/v5/trade/order",
                &[("instId", &self.inst_id), ("clOrdId", client_order_id)],
                None,
            )
            .await?;
        Self::check_envelope(&response)?;

        let detail = response.data.first().ok_or(ExchangeError::NotFound)?;
        Ok(LocatedOrder {
            order_id: detail.ord_id.clone(),
            price: detail.px,
            qty: Self::parse_qty(&detail.sz),
            snapshot: OrderSnapshot {
                state: Self::map_state(&detail.state),
                filled_qty: Self::parse_qty(&detail.acc_fill_sz),
                avg_fill_price: detail.avg_px.parse().ok(),
            },
        })
    }

    async fn open_orders(&self) -> Result<Vec<OpenOrder>, ExchangeError> {
        let response: ApiResponse<OrderDetail> = self
            .request(
                Method::GET,
                "/api/v5/trade/orders-pending",
                &[("instType", "SWAP"), ("instId", &self.inst_id)],
                None,
            )
            .await?;
        Self::check_envelope(&response)?;

        Ok(response
            .data
            .iter()
            .map(|detail| OpenOrder {
                order_id: detail.ord_id.clone(),
                client_order_id: detail.cl_ord_id.clone(),
                side: if detail.side == "sell" {
                    Side::Sell
                } else {
                    Side::Buy
                },
                price: detail.px,
                qty: Self::parse_qty(&detail.sz),
            })
            .collect())
    }

    async fn position(&self) -> Result<u32, ExchangeError> {
        let response: ApiResponse<PositionData> = self
            .request(
                Method::GET,
                "/api/v5/account/positions",
                &[("instType", "SWAP"), ("instId", &self.inst_id)],
                None,
            )
            .await?;
        Self::check_envelope(&response)?;

        // No row means no position. Short positions never occur for this
        // long-only grid; clamp defensively anyway.
        let contracts = response
            .data
            .iter()
            .find(|row| row.inst_id == self.inst_id)
            .and_then(|row| row.pos.parse::<Decimal>().ok())
            .unwrap_or(Decimal::ZERO);
        Ok(contracts.max(Decimal::ZERO).trunc().try_into().unwrap_or(0))
    }

    async fn price(&self) -> Result<Decimal, ExchangeError> {
        let response: ApiResponse<TickerData> = self
            .request(
                Method::GET,
                "/api/v5/market/ticker",
                &[("instId", &self.inst_id)],
                None,
            )
            .await?;
        Self::check_envelope(&response)?;

        response
            .data
            .first()
            .map(|ticker| ticker.last)
            .ok_or_else(|| ExchangeError::Transient("empty ticker response".to_string()))
    }
}
