use crate::domain::PaymentStatus;
use thiserror::Error;
use uuid::Uuid;

/// Failures reported by a `Store` adapter.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("timed out waiting on {0}")]
    Timeout(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            StoreError::Timeout(err.to_string())
        } else {
            StoreError::Unavailable(err.to_string())
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("payment {0} already exists")]
    AlreadyExists(Uuid),
    #[error("payment {0} not found")]
    NotFound(Uuid),
    #[error("payment {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: Uuid,
        from: PaymentStatus,
        to: PaymentStatus,
    },
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("store timeout: {0}")]
    Timeout(String),
    /// Enqueue failed after the record was written and the compensating delete failed too.
    #[error("PUSH: {push} ---- DELETE: {delete}")]
    EnqueueCompensation { push: StoreError, delete: StoreError },
    #[error("payment record {id} is corrupt: {reason}")]
    Corrupt { id: Uuid, reason: String },
    #[error("payment {id} dead-lettered after {attempts} attempts: {last_error}")]
    DeadLettered {
        id: Uuid,
        attempts: u32,
        last_error: String,
    },
}

impl PaymentError {
    /// Whether the worker may retry the failed settlement step.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PaymentError::StoreUnavailable(_)
                | PaymentError::Timeout(_)
                | PaymentError::EnqueueCompensation { .. }
        )
    }
}

impl From<StoreError> for PaymentError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) => PaymentError::StoreUnavailable(msg),
            StoreError::Timeout(msg) => PaymentError::Timeout(msg),
        }
    }
}

pub type PaymentResult<T> = Result<T, PaymentError>;
