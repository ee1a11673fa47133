use axum::Json;
use axum::extract::FromRequest;
use axum::extract::FromRequestParts;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::header::{HeaderValue, RETRY_AFTER};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::engine::EngineError;

pub type ApiResult<T> = Result<T, ApiError>;

/// JSON error body: a stable machine code and a client-safe message.
#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    retry_after_secs: Option<u64>,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            retry_after_secs: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "validation_error", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    #[must_use]
    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after_secs = Some(seconds);
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.code
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (
            self.status,
            Json(ApiErrorBody {
                code: self.code,
                message: self.message,
            }),
        )
            .into_response();
        if let Some(secs) = self.retry_after_secs
            && let Ok(value) = HeaderValue::from_str(&secs.to_string())
        {
            response.headers_mut().insert(RETRY_AFTER, value);
        }
        response
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        metrics::counter!(crate::observability::ERRORS_TOTAL, "code" => err.code()).increment(1);
        let code = err.code();
        match err {
            EngineError::Validation(_) | EngineError::LimitExceeded(_) => {
                Self::new(StatusCode::BAD_REQUEST, code, err.to_string())
            }
            EngineError::NotFound(_) => Self::new(StatusCode::NOT_FOUND, code, err.to_string()),
            EngineError::CapacityExceeded { .. }
            | EngineError::DailyLimitReached(_)
            | EngineError::DuplicatePaymentReference(_)
            | EngineError::InvalidTransition { .. } => {
                Self::new(StatusCode::CONFLICT, code, err.to_string())
            }
            EngineError::MaintenanceMode(ref msg) => {
                let message = if msg.is_empty() {
                    "the studio is closed for maintenance".to_string()
                } else {
                    msg.clone()
                };
                Self::new(StatusCode::SERVICE_UNAVAILABLE, code, message)
            }
            EngineError::Busy(_) => {
                Self::new(StatusCode::SERVICE_UNAVAILABLE, code, err.to_string()).with_retry_after(1)
            }
            EngineError::WalError(ref detail) => {
                tracing::error!(detail = %detail, "storage failure");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, code, "internal storage error")
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

/// `Json` whose rejections use the API error body.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ApiError))]
pub struct ApiQuery<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(ApiError))]
pub struct ApiPath<T>(pub T);
