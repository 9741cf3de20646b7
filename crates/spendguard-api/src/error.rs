//! Error type for the HTTP API.
//!
//! [`ApiError`] wraps control-plane failures and request-shape problems and
//! converts them into a JSON body `{"error": ..., "status": ...}` with a
//! matching status code.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use spendguard_budget::BudgetError;
use spendguard_core::CoreError;
use spendguard_tracker::TrackerError;

/// Errors returned by API handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The control plane rejected or failed the operation.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A path or query parameter could not be parsed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ApiError {
    /// HTTP status for this error.
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_)
            | Self::Core(
                CoreError::InvalidCommand(_)
                | CoreError::Budget(BudgetError::InvalidConfig(_) | BudgetError::InvalidAmount(_))
                | CoreError::Tracker(TrackerError::InvalidRecord(_)),
            ) => StatusCode::BAD_REQUEST,
            Self::Core(CoreError::NotFound(_)) => StatusCode::NOT_FOUND,
            Self::Core(CoreError::Workflow(_)) => StatusCode::CONFLICT,
            Self::Core(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "Request rejected");
        }

        let body = serde_json::json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        });

        (status, axum::Json(body)).into_response()
    }
}
