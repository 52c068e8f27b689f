use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures_util::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use vault_core::config::SchedulerConfig;
use vault_locks::DistributedLock;

use crate::{
    configs::JobConfigSource,
    error::{Result, SchedulerError},
    registry::{JobHandler, JobRegistry},
    schedule::CronExpr,
    types::{ExecutionOutcome, JobDescriptor, JobSnapshot, JobState},
};

/// Lock TTL per job: a default plus named overrides for jobs known to run
/// longer than it.
#[derive(Debug, Clone)]
pub struct LockTtlPolicy {
    default: Duration,
    overrides: HashMap<String, Duration>,
}

impl LockTtlPolicy {
    pub fn new(default: Duration) -> Self {
        Self {
            default,
            overrides: HashMap::new(),
        }
    }

    pub fn with_override(mut self, job: impl Into<String>, ttl: Duration) -> Self {
        self.overrides.insert(job.into(), ttl);
        self
    }

    pub fn from_config(cfg: &SchedulerConfig) -> Self {
        let mut policy = Self::new(Duration::from_secs(cfg.default_lock_ttl_secs.max(1)));
        for (job, secs) in &cfg.lock_ttl_overrides {
            policy = policy.with_override(job.clone(), Duration::from_secs((*secs).max(1)));
        }
        policy
    }

    pub fn ttl_for(&self, job: &str) -> Duration {
        self.overrides.get(job).copied().unwrap_or(self.default)
    }

    pub fn default_ttl(&self) -> Duration {
        self.default
    }
}

struct RegisteredJob {
    descriptor: JobDescriptor,
    schedule: CronExpr,
    handler: Arc<dyn JobHandler>,
}

#[derive(Default)]
struct JobRuntime {
    state: JobState,
    run_count: u64,
    last_run: Option<DateTime<Utc>>,
    next_run: Option<DateTime<Utc>>,
    last_outcome: Option<ExecutionOutcome>,
}

/// Flips a job back to `Idle` however its run ends, cancellation included.
struct RunningMark<'a> {
    runtime: &'a DashMap<String, JobRuntime>,
    name: &'a str,
}

impl<'a> RunningMark<'a> {
    fn enter(runtime: &'a DashMap<String, JobRuntime>, name: &'a str) -> Self {
        if let Some(mut rt) = runtime.get_mut(name) {
            rt.state = JobState::Running;
            rt.last_run = Some(Utc::now());
            rt.run_count += 1;
        }
        Self { runtime, name }
    }
}

impl Drop for RunningMark<'_> {
    fn drop(&mut self) {
        if let Some(mut rt) = self.runtime.get_mut(self.name) {
            rt.state = JobState::Idle;
        }
    }
}

/// Cron-driven dispatcher. Every instance runs the same timers; the job
/// lease decides which one actually executes a given tick.
pub struct Scheduler {
    source: Arc<dyn JobConfigSource>,
    registry: Arc<JobRegistry>,
    lock: DistributedLock,
    ttl: LockTtlPolicy,
    jobs: DashMap<String, Arc<RegisteredJob>>,
    runtime: DashMap<String, JobRuntime>,
}

impl Scheduler {
    pub fn new(
        source: Arc<dyn JobConfigSource>,
        registry: Arc<JobRegistry>,
        lock: DistributedLock,
        ttl: LockTtlPolicy,
    ) -> Self {
        Self {
            source,
            registry,
            lock,
            ttl,
            jobs: DashMap::new(),
            runtime: DashMap::new(),
        }
    }

    /// Read enabled descriptors and register a timer for each valid one.
    ///
    /// A bad cron expression or an unregistered target is logged and that job
    /// is skipped; loading continues. Only a failing config source is an
    /// error. Returns the number of jobs registered.
    pub fn load_jobs(&self) -> Result<usize> {
        let descriptors = self.source.list_enabled()?;
        let mut registered = 0;

        for descriptor in descriptors {
            let schedule = match CronExpr::parse(&descriptor.cron_expression) {
                Ok(s) => s,
                Err(e) => {
                    warn!(
                        job = %descriptor.name,
                        cron = %descriptor.cron_expression,
                        "skipping job with invalid cron expression: {e}"
                    );
                    continue;
                }
            };
            let Some(handler) = self
                .registry
                .resolve(&descriptor.package, &descriptor.function_name)
            else {
                warn!(
                    job = %descriptor.name,
                    handler = %descriptor.target(),
                    "skipping job: no handler registered for target"
                );
                continue;
            };

            info!(
                job = %descriptor.name,
                cron = %schedule,
                handler = %descriptor.target(),
                "job registered"
            );
            self.runtime.entry(descriptor.name.clone()).or_default();
            self.jobs.insert(
                descriptor.name.clone(),
                Arc::new(RegisteredJob {
                    descriptor,
                    schedule,
                    handler,
                }),
            );
            registered += 1;
        }

        info!(registered, "jobs loaded");
        Ok(registered)
    }

    /// Run `task_name` once under its fleet-wide lease.
    ///
    /// On contention nothing runs and `Skipped` is returned. Once the lease is
    /// taken it is released on every exit path: normal return, job error,
    /// panic, and cancellation of this future (background release). `Err`
    /// means the job is unknown or the store could not be reached.
    #[instrument(skip(self))]
    pub async fn execute_with_lock(&self, task_name: &str) -> Result<ExecutionOutcome> {
        let job = self
            .jobs
            .get(task_name)
            .map(|j| Arc::clone(j.value()))
            .ok_or_else(|| SchedulerError::JobNotFound {
                name: task_name.to_string(),
            })?;
        let ttl = self.ttl.ttl_for(task_name);

        let Some(lease) = self.lock.try_lock(task_name, ttl).await? else {
            info!(
                ttl_secs = ttl.as_secs(),
                "lock held elsewhere, job likely already running; skipping"
            );
            self.record(task_name, ExecutionOutcome::Skipped);
            return Ok(ExecutionOutcome::Skipped);
        };

        let started = Instant::now();
        let outcome = {
            let _running = RunningMark::enter(&self.runtime, task_name);
            debug!(handler = %job.descriptor.target(), "job started");
            match AssertUnwindSafe(job.handler.run()).catch_unwind().await {
                Ok(Ok(())) => ExecutionOutcome::Completed,
                Ok(Err(e)) => {
                    error!("job failed: {e:#}");
                    ExecutionOutcome::Failed {
                        reason: format!("{e:#}"),
                    }
                }
                Err(panic) => {
                    let reason = panic_message(panic.as_ref());
                    error!("job panicked: {reason}");
                    ExecutionOutcome::Failed {
                        reason: format!("panicked: {reason}"),
                    }
                }
            }
        };
        let elapsed = started.elapsed();
        self.record(task_name, outcome.clone());

        match lease.release().await {
            Ok(true) => debug!(elapsed_ms = elapsed.as_millis() as u64, "job lock released"),
            Ok(false) => warn!(
                elapsed_ms = elapsed.as_millis() as u64,
                ttl_secs = ttl.as_secs(),
                "job outlived its lock TTL; another instance may have run it concurrently"
            ),
            Err(e) => {
                error!("failed to release job lock: {e}");
                return Err(e.into());
            }
        }
        info!(?outcome, elapsed_ms = elapsed.as_millis() as u64, "job finished");
        Ok(outcome)
    }

    /// Drive one timer per registered job until `shutdown` turns `true`.
    ///
    /// A job that is mid-run when shutdown arrives finishes first.
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) {
        let names: Vec<String> = self.jobs.iter().map(|j| j.key().clone()).collect();
        info!(jobs = names.len(), "scheduler started");

        let mut timers = JoinSet::new();
        for name in names {
            timers.spawn(Arc::clone(&self).drive(name, shutdown.clone()));
        }
        while let Some(res) = timers.join_next().await {
            if let Err(e) = res {
                error!("job timer task failed: {e}");
            }
        }
        info!("scheduler stopped");
    }

    async fn drive(self: Arc<Self>, name: String, mut shutdown: watch::Receiver<bool>) {
        let Some(job) = self.jobs.get(&name).map(|j| Arc::clone(j.value())) else {
            return;
        };
        let mut last_fire: Option<DateTime<Utc>> = None;

        loop {
            if *shutdown.borrow() {
                break;
            }
            let now = Utc::now();
            // Never fire the same slot twice if the wall clock lags the timer.
            let from = last_fire.map_or(now, |last| last.max(now));
            let Some(next) = job.schedule.next_after(from) else {
                warn!(job = %name, cron = %job.schedule, "schedule has no future fire time; timer stopped");
                break;
            };
            if let Some(mut rt) = self.runtime.get_mut(&name) {
                rt.next_run = Some(next);
            }
            let wait = (next - now).to_std().unwrap_or_default();

            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    last_fire = Some(next);
                    if let Err(e) = self.execute_with_lock(&name).await {
                        error!(job = %name, "scheduled run aborted: {e}");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!(job = %name, "job timer stopped");
    }

    /// `None` when the job is not registered on this instance.
    pub fn state(&self, name: &str) -> Option<JobState> {
        self.runtime.get(name).map(|rt| rt.state)
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.jobs.contains_key(name)
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    pub fn ttl_policy(&self) -> &LockTtlPolicy {
        &self.ttl
    }

    /// Registered jobs ordered by name.
    pub fn snapshot(&self) -> Vec<JobSnapshot> {
        let mut out: Vec<JobSnapshot> = self
            .jobs
            .iter()
            .map(|entry| {
                let job = entry.value();
                let name = &job.descriptor.name;
                let rt = self.runtime.get(name);
                JobSnapshot {
                    name: name.clone(),
                    cron_expression: job.schedule.to_string(),
                    target: job.descriptor.target().to_string(),
                    state: rt.as_ref().map(|r| r.state).unwrap_or_default(),
                    lock_ttl_secs: self.ttl.ttl_for(name).as_secs(),
                    run_count: rt.as_ref().map_or(0, |r| r.run_count),
                    last_run: rt.as_ref().and_then(|r| r.last_run),
                    next_run: rt.as_ref().and_then(|r| r.next_run),
                    last_outcome: rt.as_ref().and_then(|r| r.last_outcome.clone()),
                }
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    fn record(&self, name: &str, outcome: ExecutionOutcome) {
        if let Some(mut rt) = self.runtime.get_mut(name) {
            if outcome == ExecutionOutcome::Skipped && rt.state == JobState::Registered {
                rt.state = JobState::Idle;
            }
            rt.last_outcome = Some(outcome);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
