// Multi-instance behaviour of `Scheduler::execute_with_lock`. Each
// `Scheduler` stands in for one process; they share one coordination store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use vault_locks::DistributedLock;
use vault_scheduler::{
    ExecutionOutcome, JobDescriptor, JobRegistry, JobState, LockTtlPolicy, Scheduler,
    SchedulerError,
};
use vault_store::{CoordinationStore, MemoryStore, StoreError};

fn instance(
    store: Arc<dyn CoordinationStore>,
    jobs: Vec<JobDescriptor>,
    registry: Arc<JobRegistry>,
) -> Arc<Scheduler> {
    let ttl = LockTtlPolicy::new(Duration::from_secs(60))
        .with_override("PushBoxAsset", Duration::from_secs(360));
    let scheduler = Scheduler::new(Arc::new(jobs), registry, DistributedLock::new(store), ttl);
    scheduler.load_jobs().unwrap();
    Arc::new(scheduler)
}

/// Registry with `work.slow`: counts invocations, then sleeps for `duration`.
fn slow_registry(hits: &Arc<AtomicUsize>, duration: Duration) -> Arc<JobRegistry> {
    let hits = Arc::clone(hits);
    let mut registry = JobRegistry::new();
    registry.register_fn("work", "slow", move || {
        let hits = Arc::clone(&hits);
        async move {
            hits.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(duration).await;
            Ok(())
        }
    });
    Arc::new(registry)
}

fn job(name: &str) -> JobDescriptor {
    JobDescriptor::new(name, "*/5 * * * *", "work", "slow")
}

#[tokio::test(start_paused = true)]
async fn racing_instances_run_the_job_once() {
    let store: Arc<dyn CoordinationStore> = Arc::new(MemoryStore::new());
    let hits = Arc::new(AtomicUsize::new(0));
    let registry = slow_registry(&hits, Duration::from_secs(1));
    let a = instance(Arc::clone(&store), vec![job("Report")], Arc::clone(&registry));
    let b = instance(Arc::clone(&store), vec![job("Report")], registry);

    let (ra, rb) = tokio::join!(a.execute_with_lock("Report"), b.execute_with_lock("Report"));
    let mut outcomes = vec![ra.unwrap(), rb.unwrap()];
    outcomes.sort_by_key(|o| matches!(o, ExecutionOutcome::Skipped));

    assert_eq!(outcomes, vec![ExecutionOutcome::Completed, ExecutionOutcome::Skipped]);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn long_job_override_outlasts_the_default_ttl() {
    let store: Arc<dyn CoordinationStore> = Arc::new(MemoryStore::new());
    let hits = Arc::new(AtomicUsize::new(0));
    let registry = slow_registry(&hits, Duration::from_secs(300));
    let a = instance(Arc::clone(&store), vec![job("PushBoxAsset")], Arc::clone(&registry));
    let b = instance(Arc::clone(&store), vec![job("PushBoxAsset")], registry);

    let first = tokio::spawn({
        let a = Arc::clone(&a);
        async move { a.execute_with_lock("PushBoxAsset").await }
    });

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(a.state("PushBoxAsset"), Some(JobState::Running));
    assert_eq!(
        b.execute_with_lock("PushBoxAsset").await.unwrap(),
        ExecutionOutcome::Skipped
    );

    // Past the 1-minute default: the 6-minute override still holds.
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(
        b.execute_with_lock("PushBoxAsset").await.unwrap(),
        ExecutionOutcome::Skipped
    );

    assert_eq!(first.await.unwrap().unwrap(), ExecutionOutcome::Completed);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(a.state("PushBoxAsset"), Some(JobState::Idle));
    assert_eq!(b.state("PushBoxAsset"), Some(JobState::Idle));
}

#[tokio::test(start_paused = true)]
async fn default_ttl_lapses_under_a_long_job() {
    let store: Arc<dyn CoordinationStore> = Arc::new(MemoryStore::new());
    let hits = Arc::new(AtomicUsize::new(0));
    let registry = slow_registry(&hits, Duration::from_secs(300));
    let a = instance(Arc::clone(&store), vec![job("Reindex")], Arc::clone(&registry));
    let b = instance(Arc::clone(&store), vec![job("Reindex")], registry);

    let first = tokio::spawn({
        let a = Arc::clone(&a);
        async move { a.execute_with_lock("Reindex").await }
    });
    tokio::time::sleep(Duration::from_secs(70)).await;

    // No override: the 60 s lease is gone and a second run starts.
    assert_eq!(
        b.execute_with_lock("Reindex").await.unwrap(),
        ExecutionOutcome::Completed
    );
    assert_eq!(first.await.unwrap().unwrap(), ExecutionOutcome::Completed);
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn failing_job_releases_the_lock() {
    let store: Arc<dyn CoordinationStore> = Arc::new(MemoryStore::new());
    let mut registry = JobRegistry::new();
    registry.register_fn("work", "slow", || async {
        Err::<(), _>(anyhow::anyhow!("upstream returned 503"))
    });
    let sched = instance(Arc::clone(&store), vec![job("Sync")], Arc::new(registry));

    let outcome = sched.execute_with_lock("Sync").await.unwrap();
    assert_eq!(
        outcome,
        ExecutionOutcome::Failed {
            reason: "upstream returned 503".into()
        }
    );
    assert_eq!(store.get("lock:Sync").await.unwrap(), None);
    assert_eq!(sched.state("Sync"), Some(JobState::Idle));
}

#[tokio::test]
async fn panicking_job_releases_the_lock() {
    let store: Arc<dyn CoordinationStore> = Arc::new(MemoryStore::new());
    let mut registry = JobRegistry::new();
    registry.register_fn("work", "slow", || async {
        if true {
            panic!("index out of bounds");
        }
        Ok(())
    });
    let sched = instance(Arc::clone(&store), vec![job("Sync")], Arc::new(registry));

    for _ in 0..2 {
        // Not `Skipped` the second time: the first run left no lease behind.
        match sched.execute_with_lock("Sync").await.unwrap() {
            ExecutionOutcome::Failed { reason } => assert!(reason.contains("index out of bounds")),
            other => panic!("unexpected outcome {other:?}"),
        }
    }
    assert_eq!(store.get("lock:Sync").await.unwrap(), None);
}

#[tokio::test(start_paused = true)]
async fn cancelled_run_releases_the_lock() {
    let store: Arc<dyn CoordinationStore> = Arc::new(MemoryStore::new());
    let hits = Arc::new(AtomicUsize::new(0));
    let sched = instance(
        Arc::clone(&store),
        vec![job("Export")],
        slow_registry(&hits, Duration::from_secs(3600)),
    );

    let run = tokio::spawn({
        let sched = Arc::clone(&sched);
        async move { sched.execute_with_lock("Export").await }
    });
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(store.get("lock:Export").await.unwrap().is_some());

    run.abort();
    assert!(run.await.unwrap_err().is_cancelled());
    for _ in 0..10 {
        if store.get("lock:Export").await.unwrap().is_none() {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(store.get("lock:Export").await.unwrap(), None);
    assert_eq!(sched.state("Export"), Some(JobState::Idle));
}

struct DownStore;

#[async_trait]
impl CoordinationStore for DownStore {
    fn name(&self) -> &str {
        "down"
    }
    async fn set_if_absent(&self, _: &str, _: &str, _: Duration) -> vault_store::Result<bool> {
        Err(StoreError::Unavailable("connection refused".into()))
    }
    async fn compare_and_delete(&self, _: &str, _: &str) -> vault_store::Result<bool> {
        Err(StoreError::Unavailable("connection refused".into()))
    }
    async fn get(&self, _: &str) -> vault_store::Result<Option<String>> {
        Err(StoreError::Unavailable("connection refused".into()))
    }
    async fn set(&self, _: &str, _: &str, _: Duration) -> vault_store::Result<()> {
        Err(StoreError::Unavailable("connection refused".into()))
    }
    async fn delete(&self, _: &str) -> vault_store::Result<bool> {
        Err(StoreError::Unavailable("connection refused".into()))
    }
    async fn purge_expired(&self) -> vault_store::Result<usize> {
        Err(StoreError::Unavailable("connection refused".into()))
    }
}

#[tokio::test]
async fn unreachable_store_is_an_error_not_a_skip() {
    let hits = Arc::new(AtomicUsize::new(0));
    let sched = instance(
        Arc::new(DownStore),
        vec![job("Sync")],
        slow_registry(&hits, Duration::ZERO),
    );

    let err = sched.execute_with_lock("Sync").await.unwrap_err();
    assert!(matches!(err, SchedulerError::Lock(_)));
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    assert_eq!(sched.state("Sync"), Some(JobState::Registered));
}

#[tokio::test(start_paused = true)]
async fn timers_fire_until_shutdown() {
    let hits = Arc::new(AtomicUsize::new(0));
    let sched = instance(
        Arc::new(MemoryStore::new()),
        vec![JobDescriptor::new("Tick", "@every 1s", "work", "slow")],
        slow_registry(&hits, Duration::ZERO),
    );

    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(Arc::clone(&sched).run(rx));
    tokio::time::sleep(Duration::from_secs(30)).await;
    tx.send(true).unwrap();
    handle.await.unwrap();

    assert!(hits.load(Ordering::SeqCst) >= 2);
    assert_eq!(sched.state("Tick"), Some(JobState::Idle));
    assert!(sched.snapshot()[0].next_run.is_some());
}
