use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;
use vault_core::config::{StoreBackend, VaultConfig};

use crate::error::{Result, StoreError};
use crate::memory::MemoryStore;
use crate::sqlite::SqliteStore;

/// Shared key-value service with atomic conditional writes and expiry.
///
/// Shared by every process in the deployment and by every component inside a
/// process; no caller may assume private visibility of store state.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Short backend label for logs and health output.
    fn name(&self) -> &str;

    /// Write `value` under `key` only if the key is absent or expired.
    /// Returns `true` when this call created the entry.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// Delete `key` only if it is live and currently holds `expected`.
    /// Returns `true` when this call deleted the entry.
    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool>;

    /// Read a live value. Expired entries read as `None`.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Unconditionally write `value` under `key`, replacing value and expiry.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Unconditionally delete `key`. Returns `true` if a live entry was removed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Physically remove expired entries. Returns how many were removed.
    async fn purge_expired(&self) -> Result<usize>;
}

pub(crate) fn check_ttl(key: &str, ttl: Duration) -> Result<()> {
    if ttl.is_zero() {
        return Err(StoreError::InvalidTtl {
            key: key.to_string(),
        });
    }
    Ok(())
}

/// Build the store selected by `config.coordination`.
pub fn open_store(config: &VaultConfig) -> Result<Arc<dyn CoordinationStore>> {
    match config.coordination.backend {
        StoreBackend::Sqlite => {
            let path = config.coordination_path();
            let busy = Duration::from_millis(config.coordination.busy_timeout_ms);
            info!(path = %path, "opening SQLite coordination store");
            Ok(Arc::new(SqliteStore::open(path, busy)?))
        }
        StoreBackend::Memory => {
            info!("using in-process coordination store; locks do not span processes");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_ttl_is_rejected() {
        assert!(matches!(
            check_ttl("k", Duration::ZERO),
            Err(StoreError::InvalidTtl { .. })
        ));
        assert!(check_ttl("k", Duration::from_millis(1)).is_ok());
    }

    #[test]
    fn memory_backend_from_config() {
        let mut config = VaultConfig::default();
        config.coordination.backend = StoreBackend::Memory;
        let store = open_store(&config).unwrap();
        assert_eq!(store.name(), "memory");
    }
}
