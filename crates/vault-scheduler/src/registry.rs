use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::types::JobTarget;

/// A job body. Errors are logged by the scheduler and do not stop the timer.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self) -> anyhow::Result<()>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> JobHandler for FnHandler<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn run(&self) -> anyhow::Result<()> {
        (self.0)().await
    }
}

/// Explicit `(package, function)` → handler table.
///
/// Descriptors name their code by string; only targets registered here can
/// be scheduled. Anything else is skipped at load time.
#[derive(Default)]
pub struct JobRegistry {
    handlers: HashMap<JobTarget, Arc<dyn JobHandler>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H>(&mut self, package: &str, function: &str, handler: H) -> &mut Self
    where
        H: JobHandler + 'static,
    {
        let target = JobTarget::new(package, function);
        if self.handlers.contains_key(&target) {
            warn!(%target, "job handler replaced");
        }
        self.handlers.insert(target, Arc::new(handler));
        self
    }

    /// Register an async closure as the handler for `package.function`.
    pub fn register_fn<F, Fut>(&mut self, package: &str, function: &str, f: F) -> &mut Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.register(package, function, FnHandler(f))
    }

    pub fn resolve(&self, package: &str, function: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers
            .get(&JobTarget::new(package, function))
            .map(Arc::clone)
    }

    pub fn targets(&self) -> Vec<JobTarget> {
        let mut targets: Vec<_> = self.handlers.keys().cloned().collect();
        targets.sort_by_key(|t| t.to_string());
        targets
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter(Arc<AtomicUsize>);

    #[async_trait]
    impl JobHandler for Counter {
        async fn run(&self) -> anyhow::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn resolves_registered_targets_only() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut registry = JobRegistry::new();
        registry
            .register("asset", "push", Counter(Arc::clone(&hits)))
            .register_fn("search", "reindex", || async {
                Err::<(), _>(anyhow::anyhow!("index offline"))
            });

        registry.resolve("asset", "push").unwrap().run().await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let err = registry.resolve("search", "reindex").unwrap().run().await;
        assert_eq!(err.unwrap_err().to_string(), "index offline");

        assert!(registry.resolve("asset", "pull").is_none());
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.targets()[0].to_string(), "asset.push");
    }
}
