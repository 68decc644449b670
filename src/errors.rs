use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::json;
use std::{fmt, time::Duration};
use thiserror::Error;

use crate::services::replicator::AdmissionError;

/// Errors raised by the replication engine.
///
/// Store implementations classify failures into these variants where they
/// happen; only `Transient` is ever retried.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ReplicationError {
    #[error("object `{0}` not found")]
    NotFound(String),
    #[error("access denied to `{target}`: {reason}")]
    AccessDenied { target: String, reason: String },
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("gave up after {attempts} attempts: {last_error}")]
    RetryExhausted {
        last_error: Box<ReplicationError>,
        attempts: u32,
    },
    #[error("source stream failed at offset {offset} and cannot be resumed: {reason}")]
    NonResumableStream { offset: u64, reason: String },
    #[error("job cancelled")]
    Cancelled,
    #[error("job exceeded its deadline of {0:?}")]
    DeadlineExceeded(Duration),
    #[error("internal error: {0}")]
    Internal(String),
}

pub type ReplicationResult<T> = Result<T, ReplicationError>;

impl ReplicationError {
    pub fn transient(msg: impl fmt::Display) -> Self {
        ReplicationError::Transient(msg.to_string())
    }

    pub fn access_denied(target: impl fmt::Display, reason: impl fmt::Display) -> Self {
        ReplicationError::AccessDenied {
            target: target.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ReplicationError::Transient(_))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ReplicationError::NotFound(_) => ErrorKind::NotFound,
            ReplicationError::AccessDenied { .. } => ErrorKind::AccessDenied,
            ReplicationError::Transient(_) => ErrorKind::Transient,
            ReplicationError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            ReplicationError::RetryExhausted { .. } => ErrorKind::RetryExhausted,
            ReplicationError::NonResumableStream { .. } => ErrorKind::NonResumableStreamFailure,
            ReplicationError::Cancelled => ErrorKind::Cancelled,
            ReplicationError::DeadlineExceeded(_) => ErrorKind::Timeout,
            ReplicationError::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// Wire-level classification of a [`ReplicationError`].
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    AccessDenied,
    Transient,
    InvalidRequest,
    RetryExhausted,
    NonResumableStreamFailure,
    Cancelled,
    Timeout,
    Internal,
}

/// A lightweight HTTP error that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status, code and message.
    pub fn new(status: StatusCode, code: &'static str, msg: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_server_error",
            msg,
        )
    }

    /// Shortcut for 400 Bad Request on payload validation
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "validation_error", msg)
    }

    /// Shortcut for 404 on unknown routes
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "endpoint_not_found", msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.code,
            "message": self.message,
            "status": self.status.as_u16(),
            "timestamp": chrono::Utc::now().timestamp(),
        }));

        (self.status, body).into_response()
    }
}

impl From<AdmissionError> for AppError {
    fn from(err: AdmissionError) -> Self {
        match err {
            AdmissionError::Busy { .. } => {
                AppError::new(StatusCode::TOO_MANY_REQUESTS, "retry_later", err.to_string())
            }
            AdmissionError::ShuttingDown => AppError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "shutting_down",
                err.to_string(),
            ),
            AdmissionError::Cancelled => AppError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "request_cancelled",
                err.to_string(),
            ),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}
