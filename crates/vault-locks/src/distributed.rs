//! Fleet-wide exclusive leases on top of the coordination store.
//!
//! Acquire is one `set_if_absent` of a fresh owner token under `lock:<key>`;
//! release is one `compare_and_delete` with that token. Neither call waits:
//! a held key comes back as `acquired = false` immediately.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument, warn};
use uuid::Uuid;
use vault_store::CoordinationStore;

use crate::error::Result;

/// Namespace for lock keys inside the shared store.
pub const LOCK_PREFIX: &str = "lock:";

fn lock_key(key: &str) -> String {
    format!("{LOCK_PREFIX}{key}")
}

/// Opaque proof of one acquisition. Fresh for every attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OwnerToken(String);

impl OwnerToken {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for OwnerToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OwnerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OwnerToken {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Outcome of one [`DistributedLock::acquire_lock`] call.
#[derive(Debug, Clone)]
pub struct LockAttempt {
    pub key: String,
    /// The token written on success. Also returned on contention, where it
    /// owns nothing.
    pub token: OwnerToken,
    /// False when another holder's lease is still live.
    pub acquired: bool,
}

/// Cross-process exclusive lease.
#[derive(Clone)]
pub struct DistributedLock {
    store: Arc<dyn CoordinationStore>,
}

impl DistributedLock {
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn CoordinationStore> {
        &self.store
    }

    /// Try to take `key` for `ttl`.
    ///
    /// `acquired = false` means another instance is already working on this
    /// key; the caller should skip its own run. `Err` means the store could
    /// not be reached and nothing is known about the lease.
    #[instrument(skip(self), fields(ttl_ms = ttl.as_millis() as u64))]
    pub async fn acquire_lock(&self, key: &str, ttl: Duration) -> Result<LockAttempt> {
        let token = OwnerToken::new();
        let acquired = self
            .store
            .set_if_absent(&lock_key(key), token.as_str(), ttl)
            .await?;
        if acquired {
            debug!(%token, "lease acquired");
        } else {
            debug!("lease held by another owner");
        }
        Ok(LockAttempt {
            key: key.to_string(),
            token,
            acquired,
        })
    }

    /// Release `key` if and only if it is still held by `token`.
    ///
    /// Returns `false` when the lease already expired or was re-acquired by
    /// someone else. That case is not a failure: this holder's claim is over
    /// either way.
    #[instrument(skip(self, token))]
    pub async fn release_lock(&self, key: &str, token: &OwnerToken) -> Result<bool> {
        let released = self
            .store
            .compare_and_delete(&lock_key(key), token.as_str())
            .await?;
        if !released {
            debug!("release skipped: lease expired or owned by another holder");
        }
        Ok(released)
    }

    /// Like [`acquire_lock`](Self::acquire_lock) but returns a guard that
    /// releases on drop. `None` on contention.
    pub async fn try_lock(&self, key: &str, ttl: Duration) -> Result<Option<LeaseGuard>> {
        let attempt = self.acquire_lock(key, ttl).await?;
        if !attempt.acquired {
            return Ok(None);
        }
        Ok(Some(LeaseGuard {
            lock: self.clone(),
            key: attempt.key,
            token: attempt.token,
            released: false,
        }))
    }

    /// Current owner token of `key`, if a live lease exists.
    pub async fn holder(&self, key: &str) -> Result<Option<OwnerToken>> {
        Ok(self
            .store
            .get(&lock_key(key))
            .await?
            .map(|t| OwnerToken::from(t.as_str())))
    }
}

/// A held distributed lease.
///
/// Prefer [`release`](Self::release), which reports store errors. Dropping an
/// unreleased guard schedules a best-effort release on the current tokio
/// runtime; without a runtime the lease simply runs out its TTL.
pub struct LeaseGuard {
    lock: DistributedLock,
    key: String,
    token: OwnerToken,
    released: bool,
}

impl LeaseGuard {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn token(&self) -> &OwnerToken {
        &self.token
    }

    /// Release the lease. `Ok(false)` means it had already expired or
    /// changed hands.
    pub async fn release(mut self) -> Result<bool> {
        self.released = true;
        self.lock.release_lock(&self.key, &self.token).await
    }
}

impl fmt::Debug for LeaseGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeaseGuard")
            .field("key", &self.key)
            .field("token", &self.token)
            .field("released", &self.released)
            .finish()
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let lock = self.lock.clone();
        let key = std::mem::take(&mut self.key);
        let token = self.token.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = lock.release_lock(&key, &token).await {
                        warn!(key = %key, "background lease release failed: {e}");
                    }
                });
            }
            Err(_) => {
                warn!(key = %key, "lease guard dropped outside a runtime; lease will expire by TTL");
            }
        }
    }
}
