use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::{is_valid_transition, Payment, PaymentStatus};
use crate::error::{PaymentError, PaymentResult};
use crate::oracle::SettlementOracle;
use crate::publisher::StatusPublisher;
use crate::queue::QueueManager;
use crate::store::Store;

/// System of record for payments. One key per payment id; records are never deleted
/// except to compensate a failed enqueue during creation.
#[derive(Clone)]
pub struct PaymentRepository {
    store: Arc<dyn Store>,
    queue: QueueManager,
    oracle: Arc<dyn SettlementOracle>,
    publisher: StatusPublisher,
}

impl PaymentRepository {
    pub fn new(
        store: Arc<dyn Store>,
        queue: QueueManager,
        oracle: Arc<dyn SettlementOracle>,
        publisher: StatusPublisher,
    ) -> Self {
        Self { store, queue, oracle, publisher }
    }

    pub fn queue(&self) -> &QueueManager {
        &self.queue
    }

    pub fn decide(&self, current: PaymentStatus) -> PaymentStatus {
        self.oracle.decide(current)
    }

    /// Persist a new `pending` payment and enqueue it.
    ///
    /// Crash window: between `set` and `push_head` the record exists without
    /// queue membership. A failed push is compensated by deleting the record;
    /// only a crash inside that window leaves an unqueued record behind.
    pub async fn create(&self, mut payment: Payment) -> PaymentResult<Payment> {
        let key = payment.id.to_string();
        if self.store.exists(&key).await? {
            return Err(PaymentError::AlreadyExists(payment.id));
        }
        let now = Utc::now();
        payment.status = PaymentStatus::Pending;
        payment.created_at = now;
        payment.updated_at = now;
        self.store.set(&key, payment.encode()?, None).await?;

        if let Err(push) = self.queue.enqueue_pending(&key).await {
            warn!(payment_id = %payment.id, err = %push, "Enqueue failed; removing new payment record");
            return match self.store.delete(&key).await {
                Ok(()) => Err(push.into()),
                Err(delete) => {
                    error!(payment_id = %payment.id, %push, %delete, "Compensating delete failed");
                    Err(PaymentError::EnqueueCompensation { push, delete })
                }
            };
        }
        info!(payment_id = %payment.id, order_id = %payment.order_id, amount = %payment.amount, "Payment created");
        Ok(payment)
    }

    pub async fn get(&self, id: Uuid) -> PaymentResult<Payment> {
        self.load(id).await?.ok_or(PaymentError::NotFound(id))
    }

    /// Apply an externally requested status.
    ///
    /// `closed` is idempotent: a missing record is a no-op (`Ok(None)`), otherwise the id is
    /// pulled from both work lists whatever its status and the decoded record is re-persisted
    /// as `closed`. `paid`/`failed` re-derive the outcome through the oracle, so the requested
    /// status only selects the settlement path.
    pub async fn apply_outcome(&self, id: Uuid, target: PaymentStatus) -> PaymentResult<Option<Payment>> {
        match target {
            PaymentStatus::Closed => self.close(id).await,
            PaymentStatus::Paid | PaymentStatus::Failed => {
                let payment = self.get(id).await?;
                if !is_valid_transition(payment.status, target) {
                    return Err(PaymentError::InvalidTransition { id, from: payment.status, to: target });
                }
                let outcome = self.oracle.decide(payment.status);
                self.commit_settlement(payment, outcome).await.map(Some)
            }
            PaymentStatus::Pending => Err(PaymentError::InvalidTransition {
                id,
                from: PaymentStatus::Pending,
                to: PaymentStatus::Pending,
            }),
        }
    }

    /// Record a settlement outcome: transition, publish, then persist.
    ///
    /// Crash window: publish happens before the write, so a crash in between
    /// leaves a notification for a status that is not yet durable. Consumers
    /// must tolerate at-least-once notifications.
    pub async fn commit_settlement(&self, mut payment: Payment, outcome: PaymentStatus) -> PaymentResult<Payment> {
        if !outcome.is_settlement_outcome() {
            return Err(PaymentError::InvalidInput(format!("{outcome} is not a settlement outcome")));
        }
        payment.transition(outcome)?;
        self.publisher.publish(&payment).await?;
        self.persist(&payment).await?;
        Ok(payment)
    }

    async fn close(&self, id: Uuid) -> PaymentResult<Option<Payment>> {
        let Some(mut payment) = self.load(id).await? else {
            debug!(payment_id = %id, "Close requested for unknown payment; nothing to do");
            return Ok(None);
        };
        let key = id.to_string();
        self.queue.withdraw(&key).await?;
        payment.transition(PaymentStatus::Closed)?;
        self.persist(&payment).await?;
        info!(payment_id = %id, "Payment closed");
        Ok(Some(payment))
    }

    async fn load(&self, id: Uuid) -> PaymentResult<Option<Payment>> {
        match self.store.get(&id.to_string()).await? {
            Some(bytes) => Payment::decode(id, &bytes).map(Some),
            None => Ok(None),
        }
    }

    async fn persist(&self, payment: &Payment) -> PaymentResult<()> {
        self.store.set(&payment.id.to_string(), payment.encode()?, None).await?;
        Ok(())
    }
}
