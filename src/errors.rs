use crate::services::{
    access_guard::GuardError, lifecycle_service::LifecycleError, policy::PolicyError,
};
use axum::{
    Json,
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;
use tracing::error;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
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
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<LifecycleError> for AppError {
    fn from(err: LifecycleError) -> Self {
        use LifecycleError::*;
        match &err {
            NotFound(_) => Self::new(StatusCode::NOT_FOUND, "File not found or expired"),
            Exhausted(_) => Self::new(StatusCode::GONE, "No downloads remaining"),
            AlreadyExists(_) => Self::new(
                StatusCode::CONFLICT,
                "this custom link is already taken, try another one",
            ),
            AccessDenied(_) => Self::new(StatusCode::FORBIDDEN, "Wrong or missing password"),
            StoreUnavailable(_) | Contention(_) | IdsExhausted(_) => {
                error!(error = %err, "store unavailable");
                Self::new(StatusCode::SERVICE_UNAVAILABLE, "storage temporarily unavailable")
            }
            DestructFailed { .. } | UpdateFailed { .. } | Corrupt { .. } => {
                error!(error = %err, "lifecycle failure");
                Self::internal("storage error")
            }
        }
    }
}

impl From<PolicyError> for AppError {
    fn from(err: PolicyError) -> Self {
        match err {
            PolicyError::FileTooLarge => Self::new(StatusCode::PAYLOAD_TOO_LARGE, err.to_string()),
            other => Self::bad_request(other.to_string()),
        }
    }
}

impl From<GuardError> for AppError {
    fn from(err: GuardError) -> Self {
        error!(error = %err, "password processing failed");
        Self::internal("Failed to process password")
    }
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        Self::new(err.status(), err.body_text())
    }
}
