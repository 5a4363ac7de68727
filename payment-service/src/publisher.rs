use std::sync::Arc;
use tracing::debug;

use crate::domain::{Payment, StatusChangedEvent};
use crate::error::{PaymentError, PaymentResult};
use crate::queue::QueueNames;
use crate::store::Store;

pub const DEFAULT_STATUS_CHANNEL: &str = "payment_status_response";

/// Announces settled payments: one event on the status channel, then the id
/// on the `paid`/`failed` list for batch consumers. Failures propagate so the
/// worker's retry policy sees them.
#[derive(Clone)]
pub struct StatusPublisher {
    store: Arc<dyn Store>,
    channel: String,
    names: QueueNames,
}

impl StatusPublisher {
    pub fn new(store: Arc<dyn Store>, channel: impl Into<String>, names: QueueNames) -> Self {
        Self { store, channel: channel.into(), names }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub async fn publish(&self, payment: &Payment) -> PaymentResult<()> {
        let Some(list) = self.names.outcome_list(payment.status) else {
            return Ok(());
        };
        let event = StatusChangedEvent::from(payment);
        let payload = serde_json::to_vec(&event).map_err(|e| PaymentError::Corrupt {
            id: payment.id,
            reason: e.to_string(),
        })?;
        self.store.publish(&self.channel, payload).await?;
        self.store.push_head(list, &payment.id.to_string()).await?;
        debug!(payment_id = %payment.id, status = %payment.status, "Published status change");
        Ok(())
    }
}
