//! Telegram notifications.
//!
//! Fire-and-forget delivery: a failed notification is logged and dropped,
//! never propagated, so a Telegram outage can never stall trading. Messages
//! use HTML parse mode.

use crate::config::TelegramConfig;
use crate::grid::{FillEvent, Side, TradeRecord};
use chrono::Utc;
use reqwest::Client;
use rust_decimal::Decimal;
use serde_json::json;
use tracing::{debug, error, info, warn};

const SEND_ATTEMPTS: u32 = 2;

/// Telegram bot notifier.
pub struct TelegramNotifier {
    http: Client,
    config: TelegramConfig,
}

impl TelegramNotifier {
    pub fn new(config: TelegramConfig) -> Self {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self { http, config }
    }

    /// Send a message, retrying once. Failures are logged and swallowed.
    pub async fn send(&self, text: &str) {
        if !self.config.enabled {
            debug!("telegram notifications disabled");
            return;
        }
        if self.config.bot_token.is_empty() || self.config.chat_id.is_empty() {
            warn!("telegram config incomplete, skipping notification");
            return;
        }

        let url = format!(
            "https://api.telegram.org/bot{}/sendMessage",
            self.config.bot_token
        );
        let body = json!({
            "chat_id": self.config.chat_id,
            "text": text,
            "parse_mode": "HTML",
        });

        for attempt in 1..=SEND_ATTEMPTS {
            match self.http.post(&url).json(&body).send().await {
                Ok(response) if response.status().is_success() => {
                    debug!("telegram message sent");
                    return;
                }
                Ok(response) => {
                    warn!(status = %response.status(), attempt, "telegram API rejected message");
                }
                Err(e) => {
                    warn!(error = %e, attempt, "telegram request failed");
                }
            }
        }
        error!("telegram notification dropped after {SEND_ATTEMPTS} attempts");
    }

    pub async fn notify_fill(
        &self,
        symbol: &str,
        record: &TradeRecord,
        event: &FillEvent,
        position: u32,
        total_pnl: Decimal,
    ) {
        let text = fill_message(symbol, record, event, position, total_pnl);
        self.send(&text).await;
        info!(%symbol, side = %record.side, "fill notification sent");
    }

    pub async fn notify_started(&self, symbol: &str, price: Decimal, position: u32) {
        self.send(&status_message("started", symbol, Some(price), position))
            .await;
    }

    pub async fn notify_stopped(&self, symbol: &str, position: u32) {
        self.send(&status_message("stopped", symbol, None, position))
            .await;
    }

    pub async fn notify_error(&self, message: &str) {
        let text = format!(
            "\u{26a0} <b>Bot error</b>\n\n<code>{}</code>\n\n{}",
            message,
            Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
        );
        self.send(&text).await;
    }
}

fn fill_message(
    symbol: &str,
    record: &TradeRecord,
    event: &FillEvent,
    position: u32,
    total_pnl: Decimal,
) -> String {
    let (emoji, action) = match record.side {
        Side::Buy => ("\u{1f7e2}", "Buy"),
        Side::Sell => ("\u{1f534}", "Sell"),
    };

    let mut text = format!(
        "{emoji} <b>{action} fill</b>\n\n\
         <b>Symbol:</b> {symbol}\n\
         <b>Price:</b> ${price}\n\
         <b>Quantity:</b> {qty}\n\
         <b>Level:</b> {ratio}\n\
         <b>Position:</b> {position}",
        price = record.price,
        qty = record.qty,
        ratio = event.level_ratio,
    );

    if let Some(pnl) = record.realized_pnl {
        text.push_str(&format!(
            "\n\n<b>Realized P&amp;L:</b> ${pnl}\n<b>Total P&amp;L:</b> ${total_pnl}"
        ));
    }

    text.push_str(&format!(
        "\n<b>Reason:</b> {}\n\n{}",
        record.reason,
        record.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    text
}

fn status_message(status: &str, symbol: &str, price: Option<Decimal>, position: u32) -> String {
    let emoji = if status == "started" {
        "\u{1f7e2}"
    } else {
        "\u{1f534}"
    };
    let mut text = format!(
        "{emoji} <b>Bot {status}</b>\n\n<b>Symbol:</b> {symbol}\n<b>Position:</b> {position}"
    );
    if let Some(price) = price {
        text.push_str(&format!("\n<b>Price:</b> ${price}"));
    }
    text.push_str(&format!(
        "\n\n{}",
        Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
    ));
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Slot;
    use rust_decimal_macros::dec;

    fn record(side: Side, pnl: Option<Decimal>) -> TradeRecord {
        TradeRecord {
            side,
            price: dec!(143.30),
            qty: 3,
            realized_pnl: pnl,
            reason: "fib 0.550 L2 sell limit fill".to_string(),
            timestamp: Utc::now(),
        }
    }

    fn event(slot: Slot) -> FillEvent {
        FillEvent {
            slot,
            order_id: "o1".to_string(),
            fill_id: "f1".to_string(),
            level_ratio: dec!(0.550),
            price: dec!(143.30),
            qty: 3,
            full: true,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_sell_fill_message_includes_pnl() {
        let text = fill_message(
            "SOL-USDT-SWAP",
            &record(Side::Sell, Some(dec!(50.60))),
            &event(Slot::SECONDARY_SELL),
            17,
            dec!(120.45),
        );
        assert!(text.contains("Sell fill"));
        assert!(text.contains("$50.60"));
        assert!(text.contains("$120.45"));
        assert!(text.contains("fib 0.550 L2 sell limit fill"));
    }

    #[test]
    fn test_buy_fill_message_has_no_pnl_section() {
        let text = fill_message(
            "SOL-USDT-SWAP",
            &record(Side::Buy, None),
            &event(Slot::PRIMARY_BUY),
            20,
            Decimal::ZERO,
        );
        assert!(text.contains("Buy fill"));
        assert!(!text.contains("Realized"));
    }

    #[test]
    fn test_status_message() {
        let text = status_message("started", "SOL-USDT-SWAP", Some(dec!(135.2)), 15);
        assert!(text.contains("Bot started"));
        assert!(text.contains("$135.2"));
        assert!(text.contains("Position:</b> 15"));
    }

    #[tokio::test]
    async fn test_disabled_notifier_sends_nothing() {
        let notifier = TelegramNotifier::new(TelegramConfig {
            bot_token: String::new(),
            chat_id: String::new(),
            enabled: false,
        });
        // Must return immediately without attempting any network call.
        notifier.send("hello").await;
    }
}
