//! In-process keyed mutex registry with lease expiry.
//!
//! `acquire(key)` hands out the mutex for `key`, creating it on first use and
//! pushing its idle lease forward on every call. A sweeper thread, started
//! once on first use, drops entries whose lease ran out.

use std::sync::{mpsc, Arc, OnceLock, Weak};
use std::thread;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, error, info};
use vault_core::config::{LocksConfig, SweepPolicyConfig};

/// Handle returned by [`KeyedMutexRegistry::acquire`]. Lock it around the
/// critical section (`lock().await` or `lock_owned().await`).
pub type AccountLock = Arc<Mutex<()>>;

/// What the sweeper may reclaim once an entry's lease has run out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SweepPolicy {
    /// Delete by expiry alone.
    ///
    /// **Known hazard:** a critical section that outlives the lease loses its
    /// registry entry while still running. The next `acquire` for that key
    /// then creates a *different* mutex and proceeds concurrently with the
    /// old holder. Only use this when every critical section is guaranteed to
    /// finish well inside the lease.
    ExpiryOnly,
    /// Delete an expired entry only when no caller still holds its handle.
    /// A handle held across a long critical section keeps the entry alive, so
    /// later callers keep serialising on the same mutex.
    #[default]
    SkipInUse,
}

impl From<SweepPolicyConfig> for SweepPolicy {
    fn from(cfg: SweepPolicyConfig) -> Self {
        match cfg {
            SweepPolicyConfig::ExpiryOnly => SweepPolicy::ExpiryOnly,
            SweepPolicyConfig::SkipInUse => SweepPolicy::SkipInUse,
        }
    }
}

struct LeaseEntry {
    lock: AccountLock,
    expires_at: Instant,
}

struct Inner {
    entries: DashMap<String, LeaseEntry>,
    lease: Duration,
    sweep_interval: Duration,
    policy: SweepPolicy,
    /// Set exactly once, when the sweeper thread is spawned. Sending on it (or
    /// dropping it together with the registry) stops the thread.
    sweeper: OnceLock<mpsc::Sender<()>>,
}

impl Inner {
    fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        self.entries.retain(|key, entry| {
            if entry.expires_at > now {
                return true;
            }
            // The registry itself owns one reference; anything above that is
            // a caller that still has the handle.
            if self.policy == SweepPolicy::SkipInUse && Arc::strong_count(&entry.lock) > 1 {
                debug!(key = %key, "lease expired but handle still in use; keeping");
                return true;
            }
            removed += 1;
            false
        });
        removed
    }
}

/// Per-key exclusive locks for one process.
///
/// Cloning is cheap and shares the same entries. Entries are private to the
/// process; use [`crate::DistributedLock`] for fleet-wide exclusion.
#[derive(Clone)]
pub struct KeyedMutexRegistry {
    inner: Arc<Inner>,
}

impl KeyedMutexRegistry {
    /// Registry whose sweeper runs once per `lease`, with the default policy.
    pub fn new(lease: Duration) -> Self {
        Self::with_options(lease, lease, SweepPolicy::default())
    }

    pub fn with_options(lease: Duration, sweep_interval: Duration, policy: SweepPolicy) -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: DashMap::new(),
                lease,
                sweep_interval,
                policy,
                sweeper: OnceLock::new(),
            }),
        }
    }

    pub fn from_config(cfg: &LocksConfig) -> Self {
        let lease = Duration::from_secs(cfg.lease_secs.max(1));
        let interval = cfg
            .sweep_interval_secs
            .map(|s| Duration::from_secs(s.max(1)))
            .unwrap_or(lease);
        Self::with_options(lease, interval, cfg.sweep_policy.into())
    }

    /// Return the mutex for `key`, creating it if absent, and refresh its
    /// lease to now + lease duration.
    ///
    /// Concurrent first calls for the same key converge on one entry: the
    /// insert happens under the map's shard lock.
    pub fn acquire(&self, key: &str) -> AccountLock {
        self.ensure_sweeper();
        let expires_at = Instant::now() + self.inner.lease;
        let mut entry = self
            .inner
            .entries
            .entry(key.to_string())
            .or_insert_with(|| {
                debug!(key, "new account lock");
                LeaseEntry {
                    lock: Arc::new(Mutex::new(())),
                    expires_at,
                }
            });
        entry.expires_at = expires_at;
        Arc::clone(&entry.lock)
    }

    /// Run one sweep immediately. Returns the number of entries removed.
    pub fn sweep_now(&self) -> usize {
        self.inner.sweep()
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.entries.contains_key(key)
    }

    pub fn lease(&self) -> Duration {
        self.inner.lease
    }

    pub fn policy(&self) -> SweepPolicy {
        self.inner.policy
    }

    /// True once the background sweeper has been started.
    pub fn sweeper_started(&self) -> bool {
        self.inner.sweeper.get().is_some()
    }

    /// Stop the sweeper thread. Entries stay in place; nothing expires them
    /// until [`sweep_now`](Self::sweep_now) is called.
    pub fn shutdown(&self) {
        if let Some(tx) = self.inner.sweeper.get() {
            let _ = tx.send(());
        }
    }

    fn ensure_sweeper(&self) {
        self.inner.sweeper.get_or_init(|| {
            let (tx, rx) = mpsc::channel();
            let weak = Arc::downgrade(&self.inner);
            let interval = self.inner.sweep_interval;
            let spawned = thread::Builder::new()
                .name("account-lock-sweeper".to_string())
                .spawn(move || sweeper_loop(weak, rx, interval));
            match spawned {
                Ok(_) => info!(
                    interval_ms = interval.as_millis() as u64,
                    "account lock sweeper started"
                ),
                Err(e) => error!("failed to spawn account lock sweeper: {e}"),
            }
            tx
        });
    }
}

fn sweeper_loop(inner: Weak<Inner>, stop: mpsc::Receiver<()>, interval: Duration) {
    loop {
        match stop.recv_timeout(interval) {
            Err(mpsc::RecvTimeoutError::Timeout) => {
                // Registry gone: nothing left to sweep.
                let Some(inner) = inner.upgrade() else { break };
                let removed = inner.sweep();
                if removed > 0 {
                    debug!(
                        removed,
                        remaining = inner.entries.len(),
                        "swept expired account locks"
                    );
                }
            }
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!("account lock sweeper stopped");
}
