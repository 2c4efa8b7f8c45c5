//! Error types for wardend

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use warden_audit::AuditError;
use warden_core::{FieldViolation, OrchestratorError};

/// Daemon-level errors
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Server startup error
    #[error("Server error: {0}")]
    Server(String),

    /// Audit log could not be opened or written at startup
    #[error("Audit error: {0}")]
    Audit(#[from] AuditError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// API-specific errors
#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing, malformed or unknown bearer token
    #[error("{0}")]
    Unauthorized(String),

    /// Token lacks the scope for this route class
    #[error("{0}")]
    Forbidden(String),

    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Intent or request body failed validation
    #[error("validation failed")]
    Validation(Vec<FieldViolation>),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Request refused by an execution invariant or the plan lifecycle
    #[error("{message}")]
    Conflict { code: &'static str, message: String },

    /// Bad request
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("request body exceeds {0} bytes")]
    PayloadTooLarge(usize),

    #[error("request URL exceeds {0} bytes")]
    UriTooLong(usize),

    #[error("request headers exceed {0} bytes")]
    HeadersTooLarge(usize),

    #[error("method {0} is not allowed")]
    MethodNotAllowed(String),

    /// The audit log rejected a write; nothing was changed
    #[error("audit log unavailable: {0}")]
    AuditFailure(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "AUTH_INVALID_KEY"),
            ApiError::Forbidden(_) => (StatusCode::FORBIDDEN, "AUTH_INSUFFICIENT_PERMISSION"),
            ApiError::RateLimited { .. } => (StatusCode::TOO_MANY_REQUESTS, "RATE_LIMIT_EXCEEDED"),
            ApiError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::Conflict { code, .. } => (StatusCode::CONFLICT, *code),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
            ApiError::PayloadTooLarge(_) => (StatusCode::PAYLOAD_TOO_LARGE, "INVALID_REQUEST"),
            ApiError::UriTooLong(_) => (StatusCode::URI_TOO_LONG, "INVALID_REQUEST"),
            ApiError::HeadersTooLarge(_) => (StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE, "INVALID_REQUEST"),
            ApiError::MethodNotAllowed(_) => (StatusCode::METHOD_NOT_ALLOWED, "METHOD_NOT_ALLOWED"),
            ApiError::AuditFailure(_) => (StatusCode::INTERNAL_SERVER_ERROR, "AUDIT_WRITE_FAILED"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::Validation(v) => ApiError::Validation(v.violations),
            OrchestratorError::IntentNotFound(_) | OrchestratorError::PlanNotFound(_) => {
                ApiError::NotFound(err.to_string())
            }
            OrchestratorError::InvalidTransition { .. } => ApiError::Conflict {
                code: "INVALID_TRANSITION",
                message: err.to_string(),
            },
            OrchestratorError::ConcurrentExecutionRejected { .. } => ApiError::Conflict {
                code: "CONCURRENT_EXECUTION_REJECTED",
                message: err.to_string(),
            },
            OrchestratorError::HaltActive(_) => ApiError::Conflict {
                code: "HALT_ACTIVE",
                message: err.to_string(),
            },
            OrchestratorError::AuditWriteFailure(e) => ApiError::AuditFailure(e.to_string()),
        }
    }
}

impl From<AuditError> for ApiError {
    fn from(err: AuditError) -> Self {
        match err {
            AuditError::InvalidQuery(msg) => ApiError::BadRequest(msg),
            other => ApiError::AuditFailure(other.to_string()),
        }
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<FieldViolation>>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        if status.is_server_error() {
            tracing::error!(code, error = %self, "Request failed");
        }

        let retry_after = match &self {
            ApiError::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        };

        let body = ErrorResponse {
            code: code.to_string(),
            message: self.to_string(),
            timestamp: Utc::now(),
            errors: match self {
                ApiError::Validation(violations) => Some(violations),
                _ => None,
            },
        };

        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

/// Result type alias for API operations
pub type ApiResult<T> = Result<T, ApiError>;

/// Result type alias for daemon operations
pub type DaemonResult<T> = Result<T, DaemonError>;
