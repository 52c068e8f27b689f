pub mod health;
pub mod jobs;
pub mod session;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::warn;
use vault_core::VaultError;
use vault_scheduler::SchedulerError;
use vault_sessions::SessionError;

/// JSON error body: `{"error": "...", "code": "..."}`.
pub struct ApiError {
    status: StatusCode,
    error: VaultError,
}

impl ApiError {
    pub fn new(status: StatusCode, error: VaultError) -> Self {
        Self { status, error }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": self.error.to_string(),
            "code": self.error.code(),
        });
        (self.status, Json(body)).into_response()
    }
}

impl From<SchedulerError> for ApiError {
    fn from(e: SchedulerError) -> Self {
        match e {
            SchedulerError::JobNotFound { name } => {
                Self::new(StatusCode::NOT_FOUND, VaultError::JobNotFound { name })
            }
            SchedulerError::Lock(e) => {
                warn!("job lock unavailable: {e}");
                Self::new(StatusCode::SERVICE_UNAVAILABLE, VaultError::Store(e.to_string()))
            }
            other => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                VaultError::Scheduler(other.to_string()),
            ),
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        match e {
            // An unreachable store still means "not authenticated", but the
            // client should retry rather than log in again.
            SessionError::Store(e) => {
                warn!("session store unavailable: {e}");
                Self::new(StatusCode::SERVICE_UNAVAILABLE, VaultError::Store(e.to_string()))
            }
            other => Self::new(
                StatusCode::UNAUTHORIZED,
                VaultError::InvalidSession(other.to_string()),
            ),
        }
    }
}
