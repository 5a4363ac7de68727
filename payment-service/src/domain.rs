use chrono::{DateTime, SecondsFormat, Utc};
use common_money::Money;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{PaymentError, PaymentResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Closed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Closed => "closed",
        }
    }

    /// Outcomes the settlement worker can commit.
    pub fn is_settlement_outcome(&self) -> bool {
        matches!(self, PaymentStatus::Paid | PaymentStatus::Failed)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "paid" => Ok(PaymentStatus::Paid),
            "failed" => Ok(PaymentStatus::Failed),
            "closed" => Ok(PaymentStatus::Closed),
            other => Err(PaymentError::InvalidInput(format!("unknown payment status {other:?}"))),
        }
    }
}

/// Valid transitions:
/// pending -> paid | failed   (settlement worker)
/// any     -> closed          (external close signal)
/// Everything else is rejected.
pub fn is_valid_transition(from: PaymentStatus, to: PaymentStatus) -> bool {
    match to {
        PaymentStatus::Closed => true,
        PaymentStatus::Paid | PaymentStatus::Failed => from == PaymentStatus::Pending,
        PaymentStatus::Pending => false,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub amount: Money,
    pub order_id: Uuid,
    pub status: PaymentStatus,
}

impl Payment {
    /// A fresh `pending` payment stamped with the current time.
    pub fn new(id: Uuid, amount: Money, order_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id,
            created_at: now,
            updated_at: now,
            amount,
            order_id,
            status: PaymentStatus::Pending,
        }
    }

    pub fn transition(&mut self, to: PaymentStatus) -> PaymentResult<()> {
        if !is_valid_transition(self.status, to) {
            return Err(PaymentError::InvalidTransition {
                id: self.id,
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn encode(&self) -> PaymentResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| PaymentError::Corrupt {
            id: self.id,
            reason: e.to_string(),
        })
    }

    pub fn decode(id: Uuid, bytes: &[u8]) -> PaymentResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| PaymentError::Corrupt {
            id,
            reason: e.to_string(),
        })
    }
}

/// Outbound notification emitted when a payment settles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChangedEvent {
    pub id: Uuid,
    pub order_id: Uuid,
    pub status: PaymentStatus,
    pub updated_at: String,
}

impl From<&Payment> for StatusChangedEvent {
    fn from(payment: &Payment) -> Self {
        Self {
            id: payment.id,
            order_id: payment.order_id,
            status: payment.status,
            updated_at: payment.updated_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }
}

pub fn parse_id(raw: &str, field: &str) -> PaymentResult<Uuid> {
    let id = Uuid::parse_str(raw.trim())
        .map_err(|_| PaymentError::InvalidInput(format!("{field} is not a valid uuid: {raw:?}")))?;
    if id.is_nil() {
        return Err(PaymentError::InvalidInput(format!("{field} must not be the nil uuid")));
    }
    Ok(id)
}
