//! Jobs this binary knows how to run.

use std::sync::Arc;

use tracing::info;
use vault_scheduler::{JobDescriptor, JobConfigStore, JobRegistry};
use vault_store::CoordinationStore;

pub const PURGE_JOB: &str = "PurgeExpiredCoordination";
const PURGE_PACKAGE: &str = "coordination";
const PURGE_FUNCTION: &str = "purge_expired";

/// Handler table for every `(package, function)` a descriptor may name.
pub fn builtin_registry(store: Arc<dyn CoordinationStore>) -> JobRegistry {
    let mut registry = JobRegistry::new();
    registry.register_fn(PURGE_PACKAGE, PURGE_FUNCTION, move || {
        let store = Arc::clone(&store);
        async move {
            let removed = store.purge_expired().await?;
            info!(removed, store = store.name(), "expired coordination entries purged");
            Ok::<(), anyhow::Error>(())
        }
    });
    registry
}

/// Insert the built-in job rows that are missing. Existing rows, including
/// ones an operator disabled, are left alone.
pub fn ensure_builtin_jobs(configs: &JobConfigStore) -> vault_scheduler::Result<()> {
    let present = configs.list_all()?.iter().any(|j| j.name == PURGE_JOB);
    if !present {
        configs.upsert(&JobDescriptor::new(
            PURGE_JOB,
            "@every 5m",
            PURGE_PACKAGE,
            PURGE_FUNCTION,
        ))?;
    }
    Ok(())
}
