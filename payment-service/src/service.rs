//! Public entry points. Each operation has its own request and response type,
//! so transports never downcast a generic payload.

use common_money::Money;
use common_observability::PipelineMetrics;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::domain::{parse_id, Payment, PaymentStatus};
use crate::error::{PaymentError, PaymentResult};
use crate::queue::QueueSnapshot;
use crate::repo::PaymentRepository;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CreatePaymentRequest {
    pub id: String,
    pub order_id: String,
    /// Decimal text such as `"10.00"`; never parsed through a float.
    pub amount: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePaymentResponse {
    pub id: Uuid,
    pub status: PaymentStatus,
}

#[derive(Debug, Clone)]
pub struct GetPaymentRequest {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetPaymentResponse {
    pub payment: Payment,
    pub status: PaymentStatus,
}

#[derive(Debug, Clone)]
pub struct UpdatePaymentRequest {
    pub id: String,
    pub status: PaymentStatus,
}

/// Empty (`{}`) when closing an unknown payment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatePaymentResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<PaymentStatus>,
}

impl UpdatePaymentResponse {
    pub fn is_empty(&self) -> bool {
        self.id.is_none() && self.status.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayPaymentResponse {
    pub id: Uuid,
    pub requeued: bool,
}

#[derive(Clone)]
pub struct PaymentService {
    repo: PaymentRepository,
    metrics: PipelineMetrics,
}

impl PaymentService {
    pub fn new(repo: PaymentRepository, metrics: PipelineMetrics) -> Self {
        Self { repo, metrics }
    }

    pub fn repository(&self) -> &PaymentRepository {
        &self.repo
    }

    pub async fn create_payment(&self, req: CreatePaymentRequest) -> PaymentResult<CreatePaymentResponse> {
        let id = parse_id(&req.id, "id")?;
        let order_id = parse_id(&req.order_id, "order_id")?;
        let amount = Money::positive(&req.amount).map_err(|e| PaymentError::InvalidInput(e.to_string()))?;
        let created = self.repo.create(Payment::new(id, amount, order_id)).await?;
        self.metrics.payments_created.inc();
        Ok(CreatePaymentResponse { id: created.id, status: created.status })
    }

    pub async fn get_payment(&self, req: GetPaymentRequest) -> PaymentResult<GetPaymentResponse> {
        let id = parse_id(&req.id, "id")?;
        let payment = self.repo.get(id).await?;
        Ok(GetPaymentResponse { status: payment.status, payment })
    }

    pub async fn update_payment(&self, req: UpdatePaymentRequest) -> PaymentResult<UpdatePaymentResponse> {
        let id = parse_id(&req.id, "id")?;
        let updated = self.repo.apply_outcome(id, req.status).await?;
        Ok(match updated {
            Some(payment) => UpdatePaymentResponse { id: Some(payment.id), status: Some(payment.status) },
            None => UpdatePaymentResponse::default(),
        })
    }

    /// Requeue a dead-lettered payment for another settlement round.
    pub async fn replay_payment(&self, id: &str) -> PaymentResult<ReplayPaymentResponse> {
        let id = parse_id(id, "id")?;
        let payment = self.repo.get(id).await?;
        if payment.status != PaymentStatus::Pending {
            return Err(PaymentError::InvalidTransition { id, from: payment.status, to: PaymentStatus::Pending });
        }
        let requeued = self.repo.queue().replay(&id.to_string()).await?;
        if requeued {
            info!(payment_id = %id, "Dead-lettered payment requeued");
        }
        Ok(ReplayPaymentResponse { id, requeued })
    }

    pub async fn queue_snapshot(&self) -> PaymentResult<QueueSnapshot> {
        Ok(self.repo.queue().snapshot().await?)
    }
}
