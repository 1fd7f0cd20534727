//! API error envelope and status mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use conduit_core::errors::ErrorKind;
use conduit_runtime::RuntimeError;
use conduit_store::StoreError;
use serde_json::json;
use tracing::warn;

/// An error ready to leave the HTTP surface.
#[derive(Debug)]
pub struct ApiError {
    /// Taxonomy kind, drives the status code.
    pub kind: ErrorKind,
    /// Human-readable detail.
    pub message: String,
}

impl ApiError {
    /// A 404 for a named entity.
    pub fn not_found(what: impl std::fmt::Display) -> Self {
        Self { kind: ErrorKind::NotFound, message: format!("not found: {what}") }
    }

    /// A 400 validation failure.
    pub fn validation(message: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Validation, message: message.into() }
    }

    /// HTTP status for the taxonomy kind.
    pub fn status(&self) -> StatusCode {
        match self.kind {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Spawn | ErrorKind::Bridge | ErrorKind::Protocol | ErrorKind::Internal => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<RuntimeError> for ApiError {
    fn from(error: RuntimeError) -> Self {
        Self { kind: error.kind(), message: error.to_string() }
    }
}

impl From<StoreError> for ApiError {
    fn from(error: StoreError) -> Self {
        let kind = match &error {
            StoreError::NotFound(_) => ErrorKind::NotFound,
            StoreError::Invalid(_) => ErrorKind::Validation,
            _ => ErrorKind::Internal,
        };
        Self { kind, message: error.to_string() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(kind = self.kind.as_str(), message = %self.message, "request failed");
        }
        let body = Json(json!({
            "error": { "kind": self.kind.as_str(), "message": self.message }
        }));
        (status, body).into_response()
    }
}
