use axum::{http::{StatusCode, HeaderValue}, response::{IntoResponse, Response}, Json};
use once_cell::sync::Lazy;
use prometheus::{IntCounterVec, Opts};
use serde::Serialize;
use uuid::Uuid;

/// Error responses emitted through `ApiError`, labelled by service-independent code and status.
pub static HTTP_ERRORS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("http_errors_total", "Count of HTTP error responses emitted (status >= 400)"),
        &["code", "status"],
    )
    .unwrap()
});

/// Register the error counter with a service registry. Safe to call more than once.
pub fn register_error_metrics(registry: &prometheus::Registry) {
    let _ = registry.register(Box::new(HTTP_ERRORS_TOTAL.clone()));
}

#[derive(Serialize, Debug)]
pub struct ErrorBody {
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")] pub trace_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")] pub message: Option<String>,
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest { code: &'static str, trace_id: Option<Uuid>, message: Option<String> },
    NotFound { code: &'static str, trace_id: Option<Uuid> },
    Conflict { code: &'static str, trace_id: Option<Uuid>, message: Option<String> },
    ServiceUnavailable { trace_id: Option<Uuid>, message: Option<String> },
    Internal { trace_id: Option<Uuid>, message: Option<String> },
}

impl ApiError {
    pub fn internal<E: std::fmt::Display>(e: E, trace_id: Option<Uuid>) -> Self { Self::Internal { trace_id, message: Some(e.to_string()) } }
    pub fn bad_request(code: &'static str, trace_id: Option<Uuid>) -> Self { Self::BadRequest { code, trace_id, message: None } }
    pub fn unavailable<E: std::fmt::Display>(e: E) -> Self { Self::ServiceUnavailable { trace_id: None, message: Some(e.to_string()) } }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body, error_code) = match self {
            ApiError::BadRequest { code, trace_id, message } => (
                StatusCode::BAD_REQUEST,
                ErrorBody { code: code.into(), trace_id, message },
                code
            ),
            ApiError::NotFound { code, trace_id } => (
                StatusCode::NOT_FOUND,
                ErrorBody { code: code.into(), trace_id, message: None },
                code
            ),
            ApiError::Conflict { code, trace_id, message } => (
                StatusCode::CONFLICT,
                ErrorBody { code: code.into(), trace_id, message },
                code
            ),
            ApiError::ServiceUnavailable { trace_id, message } => (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorBody { code: "store_unavailable".into(), trace_id, message },
                "store_unavailable"
            ),
            ApiError::Internal { trace_id, message } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorBody { code: "internal_error".into(), trace_id, message },
                "internal_error"
            ),
        };
        HTTP_ERRORS_TOTAL.with_label_values(&[error_code, status.as_str()]).inc();
        let mut resp = (status, Json(body)).into_response();
        if let Ok(val) = HeaderValue::from_str(error_code) {
            resp.headers_mut().insert("X-Error-Code", val);
        }
        resp
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
