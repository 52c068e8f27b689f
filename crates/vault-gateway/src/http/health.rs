use axum::{extract::State, Json};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::app::AppState;

/// GET /health — liveness probe, returns instance metadata.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "git_sha": env!("VAULT_GIT_SHA"),
        "instance": state.instance.as_str(),
        "uptime_secs": (Utc::now() - state.started_at).num_seconds(),
        "store": state.store.name(),
        "jobs": state.scheduler.job_count(),
        "account_locks": state.account_locks.len(),
    }))
}
