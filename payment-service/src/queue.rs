use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

use crate::domain::PaymentStatus;
use crate::error::StoreResult;
use crate::store::Store;

pub const DEFAULT_DEQUEUE_TIMEOUT: Duration = Duration::from_secs(3600);

/// Names of the five lists the pipeline routes payment ids through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueNames {
    pub pending: String,
    pub processing: String,
    pub deadletter: String,
    pub paid: String,
    pub failed: String,
}

impl QueueNames {
    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            pending: format!("{prefix}_pending_queue"),
            processing: format!("{prefix}_processing_queue"),
            deadletter: format!("{prefix}_deadletter_queue"),
            paid: format!("{prefix}_paid_queue"),
            failed: format!("{prefix}_failed_queue"),
        }
    }

    /// Auxiliary list for a settled outcome, if it has one.
    pub fn outcome_list(&self, status: PaymentStatus) -> Option<&str> {
        match status {
            PaymentStatus::Paid => Some(&self.paid),
            PaymentStatus::Failed => Some(&self.failed),
            PaymentStatus::Pending | PaymentStatus::Closed => None,
        }
    }
}

impl Default for QueueNames {
    fn default() -> Self {
        Self::with_prefix("payment")
    }
}

/// Membership of the three work lists at one instant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueSnapshot {
    pub pending: Vec<String>,
    pub processing: Vec<String>,
    pub deadletter: Vec<String>,
}

impl QueueSnapshot {
    /// How many of the three work lists currently hold `id`.
    pub fn lists_containing(&self, id: &str) -> usize {
        [&self.pending, &self.processing, &self.deadletter]
            .iter()
            .filter(|list| list.iter().any(|member| member == id))
            .count()
    }
}

/// Moves payment ids between `pending`, `processing` and `deadletter`.
///
/// The store offers no cross-list transaction. Each sequence below is ordered
/// so that a crash part-way leaves the id in one recoverable list, with
/// "stuck in `processing`" as the residual case an operator replays.
#[derive(Clone)]
pub struct QueueManager {
    store: Arc<dyn Store>,
    names: QueueNames,
    dequeue_timeout: Duration,
}

impl QueueManager {
    pub fn new(store: Arc<dyn Store>, names: QueueNames, dequeue_timeout: Duration) -> Self {
        Self { store, names, dequeue_timeout }
    }

    pub fn names(&self) -> &QueueNames {
        &self.names
    }

    pub async fn enqueue_pending(&self, id: &str) -> StoreResult<()> {
        self.store.push_head(&self.names.pending, id).await
    }

    /// Block until an id can be claimed. Whoever's move the store serves first owns the id
    /// until it is removed from `processing`.
    pub async fn dequeue_for_processing(&self) -> StoreResult<String> {
        self.store
            .atomic_move(&self.names.pending, &self.names.processing, self.dequeue_timeout)
            .await
    }

    pub async fn settle(&self, id: &str, outcome: PaymentStatus) -> StoreResult<()> {
        let removed = self.store.remove_by_value(&self.names.processing, 0, id).await?;
        debug!(payment_id = %id, %outcome, removed, "Released payment from processing");
        Ok(())
    }

    /// Push to `deadletter`, then drop from `processing`. When the push fails the id is
    /// left in `processing` rather than lost.
    pub async fn deadletter(&self, id: &str) -> StoreResult<()> {
        self.store.push_head(&self.names.deadletter, id).await?;
        if let Err(err) = self.store.remove_by_value(&self.names.processing, 0, id).await {
            error!(payment_id = %id, ?err, "Dead-lettered payment still listed in processing");
            return Err(err);
        }
        Ok(())
    }

    /// Drop an id from `processing` without an outcome (malformed or unknown ids).
    pub async fn discard(&self, id: &str) -> StoreResult<()> {
        self.store.remove_by_value(&self.names.processing, 0, id).await.map(|_| ())
    }

    /// Remove an id from the work lists and `deadletter`, wherever it currently sits.
    pub async fn withdraw(&self, id: &str) -> StoreResult<()> {
        self.store.remove_by_value(&self.names.pending, 0, id).await?;
        self.store.remove_by_value(&self.names.processing, 0, id).await?;
        self.store.remove_by_value(&self.names.deadletter, 0, id).await?;
        Ok(())
    }

    /// Operator replay: move a dead-lettered id back to `pending`.
    /// Returns `false` when the id was not dead-lettered.
    pub async fn replay(&self, id: &str) -> StoreResult<bool> {
        let removed = self.store.remove_by_value(&self.names.deadletter, 0, id).await?;
        if removed == 0 {
            return Ok(false);
        }
        if let Err(err) = self.enqueue_pending(id).await {
            // Put it back so the id stays recoverable.
            self.store.push_head(&self.names.deadletter, id).await?;
            return Err(err);
        }
        Ok(true)
    }

    pub async fn snapshot(&self) -> StoreResult<QueueSnapshot> {
        Ok(QueueSnapshot {
            pending: self.store.list_members(&self.names.pending).await?,
            processing: self.store.list_members(&self.names.processing).await?,
            deadletter: self.store.list_members(&self.names.deadletter).await?,
        })
    }
}

impl std::fmt::Debug for QueueManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueManager")
            .field("names", &self.names)
            .field("dequeue_timeout", &self.dequeue_timeout)
            .finish()
    }
}
