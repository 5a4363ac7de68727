use chrono::DateTime;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::value::RawValue;
use std::sync::Arc;
use tracing::{debug, info, warn, Instrument, Span};

use crate::domain::PaymentStatus;
use crate::error::{PaymentError, PaymentResult};
use crate::service::{CreatePaymentRequest, PaymentService, UpdatePaymentRequest};
use crate::store::Store;

pub const DEFAULT_REQUEST_CHANNEL: &str = "order_payment_creation_request";
pub const DEFAULT_LOG_CHANNEL: &str = "log";

/// Payment request published by the order service. `status` carries the order's
/// status, not a payment status.
///
/// `price` is kept as the raw JSON token so its digits reach `Money` untouched.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentCreationRequestMessage {
    pub id: String,
    pub created_at: String,
    #[serde(default)]
    pub updated_at: Option<String>,
    pub price: Box<RawValue>,
    pub order_id: String,
    pub status: String,
}

impl PaymentCreationRequestMessage {
    /// Decimal text of the price. Accepts a bare JSON number or a quoted one.
    pub fn price_text(&self) -> PaymentResult<String> {
        let raw = self.price.get().trim();
        if raw.starts_with('"') {
            return serde_json::from_str::<String>(raw)
                .map_err(|e| PaymentError::InvalidInput(format!("price {raw}: {e}")));
        }
        Ok(raw.to_string())
    }
}

pub fn payment_status_from_order_status(status: &str) -> PaymentStatus {
    match status {
        "Aberto" | "Aguardando Pagamento" => PaymentStatus::Pending,
        "Recebido" => PaymentStatus::Paid,
        _ => PaymentStatus::Closed,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumerAction {
    Created,
    Closed,
}

/// Turns order-side payment requests into `CreatePayment` / close calls.
#[derive(Clone)]
pub struct CreationRequestConsumer {
    service: PaymentService,
    store: Arc<dyn Store>,
    channel: String,
    span: Span,
}

impl CreationRequestConsumer {
    pub fn new(service: PaymentService, store: Arc<dyn Store>, channel: impl Into<String>, span: Span) -> Self {
        Self { service, store, channel: channel.into(), span }
    }

    /// Consume until the subscription ends. Bad messages are logged and skipped.
    pub async fn run(&self) -> PaymentResult<()> {
        self.consume().instrument(self.span.clone()).await
    }

    async fn consume(&self) -> PaymentResult<()> {
        let mut messages = self.store.subscribe(&self.channel).await?;
        info!(channel = %self.channel, "Listening for payment creation requests");
        while let Some(payload) = messages.next().await {
            match self.handle(&payload).await {
                Ok(action) => debug!(?action, "Payment request handled"),
                Err(err) => warn!(%err, "Payment request rejected"),
            }
        }
        info!(channel = %self.channel, "Payment request subscription closed");
        Ok(())
    }

    pub async fn handle(&self, payload: &[u8]) -> PaymentResult<ConsumerAction> {
        let msg: PaymentCreationRequestMessage = serde_json::from_slice(payload)
            .map_err(|e| PaymentError::InvalidInput(format!("undecodable payment request: {e}")))?;
        DateTime::parse_from_rfc3339(&msg.created_at)
            .map_err(|e| PaymentError::InvalidInput(format!("created_at {:?}: {e}", msg.created_at)))?;
        let amount = msg.price_text()?;

        if payment_status_from_order_status(&msg.status) == PaymentStatus::Closed {
            self.service
                .update_payment(UpdatePaymentRequest { id: msg.id, status: PaymentStatus::Closed })
                .await?;
            return Ok(ConsumerAction::Closed);
        }
        // Creation always starts pending, whatever the order side reported.
        self.service
            .create_payment(CreatePaymentRequest {
                id: msg.id,
                order_id: msg.order_id,
                amount,
            })
            .await?;
        Ok(ConsumerAction::Created)
    }
}

/// Mirrors every message on the operator `log` channel into the service log.
pub async fn run_log_tap(store: Arc<dyn Store>, channel: String, span: Span) -> PaymentResult<()> {
    tap_channel(store, channel).instrument(span).await
}

async fn tap_channel(store: Arc<dyn Store>, channel: String) -> PaymentResult<()> {
    let mut messages = store.subscribe(&channel).await?;
    while let Some(payload) = messages.next().await {
        info!(channel = %channel, message = %String::from_utf8_lossy(&payload), "channel msg");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_statuses_map_to_payment_statuses() {
        assert_eq!(payment_status_from_order_status("Aberto"), PaymentStatus::Pending);
        assert_eq!(payment_status_from_order_status("Aguardando Pagamento"), PaymentStatus::Pending);
        assert_eq!(payment_status_from_order_status("Recebido"), PaymentStatus::Paid);
        assert_eq!(payment_status_from_order_status("Cancelado"), PaymentStatus::Closed);
        assert_eq!(payment_status_from_order_status(""), PaymentStatus::Closed);
    }

    fn decode(body: &str) -> PaymentCreationRequestMessage {
        serde_json::from_str(body).unwrap()
    }

    #[test]
    fn price_keeps_its_decimal_text() {
        let msg = decode(
            r#"{"id":"x","created_at":"2024-03-01T12:00:00Z","price":19.90,"order_id":"y","status":"Aberto"}"#,
        );
        assert_eq!(msg.price_text().unwrap(), "19.90");

        let msg = decode(
            r#"{"id":"x","created_at":"2024-03-01T12:00:00Z","price":12345678901234567.89,"order_id":"y","status":"Aberto"}"#,
        );
        assert_eq!(msg.price_text().unwrap(), "12345678901234567.89");

        let msg = decode(
            r#"{"id":"x","created_at":"2024-03-01T12:00:00Z","price":"7.25","order_id":"y","status":"Aberto"}"#,
        );
        assert_eq!(msg.price_text().unwrap(), "7.25");
    }

    #[test]
    fn created_at_is_required() {
        let missing = serde_json::from_str::<PaymentCreationRequestMessage>(
            r#"{"id":"x","price":1,"order_id":"y","status":"Aberto"}"#,
        );
        assert!(missing.is_err());
    }
}
