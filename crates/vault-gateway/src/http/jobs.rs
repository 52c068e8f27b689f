use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;
use vault_scheduler::{ExecutionOutcome, JobSnapshot};

use super::ApiError;
use crate::app::AppState;

/// GET /jobs — registered jobs with their per-instance state.
pub async fn list_jobs(State(state): State<Arc<AppState>>) -> Json<Vec<JobSnapshot>> {
    Json(state.scheduler.snapshot())
}

/// POST /jobs/{name}/run — run a job now, under the same lease as its timer.
///
/// 200 when it ran (the body reports success or failure), 409 when another
/// holder has the lease.
pub async fn run_job(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    info!(job = %name, "manual run requested");
    let outcome = state.scheduler.execute_with_lock(&name).await?;
    let status = match outcome {
        ExecutionOutcome::Skipped => StatusCode::CONFLICT,
        _ => StatusCode::OK,
    };
    let mut body = serde_json::to_value(&outcome).unwrap_or_else(|_| json!({}));
    body["job"] = json!(name);
    Ok((status, Json(body)))
}
