use axum::{
    extract::{Path, State},
    http::{
        header::{ACCEPT, CONTENT_TYPE},
        HeaderValue, Method, StatusCode,
    },
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use common_http_errors::{ApiError, ApiResult};
use common_observability::{PipelineMetrics, WorkerHealth, WorkerState};
use serde::{Deserialize, Serialize};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::domain::PaymentStatus;
use crate::error::PaymentError;
use crate::queue::QueueSnapshot;
use crate::service::{
    CreatePaymentRequest, CreatePaymentResponse, GetPaymentRequest, GetPaymentResponse, PaymentService,
    ReplayPaymentResponse, UpdatePaymentRequest, UpdatePaymentResponse,
};

#[derive(Clone)]
pub struct AppState {
    pub service: PaymentService,
    pub metrics: PipelineMetrics,
    pub health: WorkerHealth,
}

impl From<PaymentError> for ApiError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::InvalidInput(msg) => {
                ApiError::BadRequest { code: "invalid_input", trace_id: None, message: Some(msg) }
            }
            err @ PaymentError::InvalidTransition { .. } => ApiError::BadRequest {
                code: "invalid_transition",
                trace_id: None,
                message: Some(err.to_string()),
            },
            PaymentError::NotFound(_) => ApiError::NotFound { code: "payment_not_found", trace_id: None },
            err @ PaymentError::AlreadyExists(_) => ApiError::Conflict {
                code: "payment_exists",
                trace_id: None,
                message: Some(err.to_string()),
            },
            err @ (PaymentError::StoreUnavailable(_) | PaymentError::Timeout(_)) => ApiError::unavailable(err),
            other => {
                error!(error = %other, "Payment request failed");
                ApiError::internal(other, None)
            }
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdatePaymentBody {
    pub status: PaymentStatus,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub worker: WorkerState,
    /// Synchronous operations keep working whatever the worker state.
    pub accepting_requests: bool,
}

pub async fn create_payment(
    State(state): State<AppState>,
    Json(req): Json<CreatePaymentRequest>,
) -> ApiResult<Json<CreatePaymentResponse>> {
    Ok(Json(state.service.create_payment(req).await?))
}

pub async fn get_payment(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<GetPaymentResponse>> {
    Ok(Json(state.service.get_payment(GetPaymentRequest { id }).await?))
}

pub async fn update_payment(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<UpdatePaymentBody>,
) -> ApiResult<Json<UpdatePaymentResponse>> {
    let req = UpdatePaymentRequest { id, status: body.status };
    Ok(Json(state.service.update_payment(req).await?))
}

pub async fn replay_payment(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ReplayPaymentResponse>> {
    Ok(Json(state.service.replay_payment(&id).await?))
}

pub async fn queue_snapshot(State(state): State<AppState>) -> ApiResult<Json<QueueSnapshot>> {
    Ok(Json(state.service.queue_snapshot().await?))
}

pub async fn healthz(State(state): State<AppState>) -> Response {
    let worker = state.health.state();
    let (code, status) = match worker {
        WorkerState::Exhausted => (StatusCode::SERVICE_UNAVAILABLE, "degraded"),
        _ => (StatusCode::OK, "ok"),
    };
    (code, Json(HealthResponse { status, worker, accepting_requests: true })).into_response()
}

pub async fn metrics_endpoint(State(state): State<AppState>) -> (StatusCode, String) {
    (StatusCode::OK, state.metrics.render())
}

pub fn app_router(state: AppState) -> Router {
    let allowed_origins = [
        "http://localhost:3000",
        "http://localhost:3001",
        "http://localhost:5173",
    ];

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(
            allowed_origins
                .iter()
                .filter_map(|origin| origin.parse::<HeaderValue>().ok())
                .collect::<Vec<_>>(),
        ))
        .allow_methods([Method::GET, Method::POST, Method::PUT])
        .allow_headers([ACCEPT, CONTENT_TYPE]);

    Router::new()
        .route("/payments", post(create_payment))
        .route("/payments/:id", get(get_payment).put(update_payment))
        .route("/payments/:id/replay", post(replay_payment))
        .route("/queues", get(queue_snapshot))
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_endpoint))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
