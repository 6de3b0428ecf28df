//! Relay HTTP error type with response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use outbox::OutboxError;
use transaction::Classify;

/// Errors surfaced by relay HTTP handlers.
#[derive(Debug)]
pub enum ApiError {
    /// The outbox store could not be queried.
    Outbox(OutboxError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Outbox(err) if err.is_retryable() => {
                tracing::warn!(error = %err, "outbox store unavailable");
                (StatusCode::SERVICE_UNAVAILABLE, err.to_string())
            }
            ApiError::Outbox(err) => {
                tracing::error!(error = %err, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
        };

        let body = serde_json::json!({ "status": "unavailable", "error": message });
        (status, axum::Json(body)).into_response()
    }
}

impl From<OutboxError> for ApiError {
    fn from(err: OutboxError) -> Self {
        ApiError::Outbox(err)
    }
}
