use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use tracing::info;
use vault_core::{InstanceId, VaultConfig};
use vault_locks::{DistributedLock, KeyedMutexRegistry};
use vault_scheduler::{JobConfigStore, LockTtlPolicy, Scheduler};
use vault_sessions::SessionService;
use vault_store::CoordinationStore;

use crate::jobs;

/// Everything the process shares, built once at startup and handed to
/// handlers as `Arc<AppState>`.
pub struct AppState {
    pub config: VaultConfig,
    pub instance: InstanceId,
    pub started_at: DateTime<Utc>,
    pub store: Arc<dyn CoordinationStore>,
    /// Per-account critical sections inside this process.
    pub account_locks: KeyedMutexRegistry,
    pub scheduler: Arc<Scheduler>,
    pub sessions: SessionService,
}

impl AppState {
    /// Wire the components together and load enabled jobs.
    pub fn new(
        config: VaultConfig,
        store: Arc<dyn CoordinationStore>,
        job_configs: JobConfigStore,
    ) -> anyhow::Result<Self> {
        let instance = InstanceId::new();
        let account_locks = KeyedMutexRegistry::from_config(&config.locks);
        let scheduler = Scheduler::new(
            Arc::new(job_configs),
            Arc::new(jobs::builtin_registry(Arc::clone(&store))),
            DistributedLock::new(Arc::clone(&store)),
            LockTtlPolicy::from_config(&config.scheduler),
        );
        scheduler.load_jobs()?;

        let sessions = SessionService::from_config(Arc::clone(&store), &config.sessions);

        info!(
            instance = %instance,
            store = store.name(),
            jobs = scheduler.job_count(),
            "application state ready"
        );
        Ok(Self {
            config,
            instance,
            started_at: Utc::now(),
            store,
            account_locks,
            scheduler: Arc::new(scheduler),
            sessions,
        })
    }
}

/// Assemble the Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/jobs", get(crate::http::jobs::list_jobs))
        .route("/jobs/{name}/run", post(crate::http::jobs::run_job))
        .route(
            "/session",
            get(crate::http::session::current_session).post(crate::http::session::issue_session),
        )
        .route("/session/refresh", post(crate::http::session::refresh_session))
        .route("/session/logout", post(crate::http::session::logout))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
