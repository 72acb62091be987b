//! JSON error responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use reconflow_core::ScanControlError;
use serde_json::json;
use std::fmt;

/// Handler result that renders errors as JSON.
pub type AppResult<T> = Result<T, AppError>;

/// An HTTP status plus the message returned as `{"error": {...}}`.
#[derive(Debug)]
pub struct AppError {
    /// Response status.
    pub status: StatusCode,
    /// Human-readable reason.
    pub message: String,
}

impl AppError {
    /// Error with an arbitrary status.
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// `500`
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    /// `400`
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    /// `404`
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    /// `409`
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
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
            "error": {
                "message": self.message,
                "status": self.status.as_u16(),
            }
        }));

        (self.status, body).into_response()
    }
}

impl From<ScanControlError> for AppError {
    fn from(err: ScanControlError) -> Self {
        match err {
            ScanControlError::NotFound(_) => Self::not_found(err.to_string()),
            ScanControlError::InvalidTarget(_) => Self::bad_request(err.to_string()),
            ScanControlError::DuplicateActiveScan { .. } => Self::conflict(err.to_string()),
            ScanControlError::Pipeline(_) => {
                tracing::error!(error = %err, "pipeline planning failed");
                Self::internal(err.to_string())
            }
        }
    }
}
