use std::time::Duration;

use async_trait::async_trait;
use dashmap::{mapref::entry::Entry, DashMap};
use tokio::time::Instant;

use crate::error::Result;
use crate::store::{check_ttl, CoordinationStore};

struct Slot {
    value: String,
    expires_at: Instant,
}

impl Slot {
    fn new(value: &str, ttl: Duration) -> Self {
        Self {
            value: value.to_string(),
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Process-local coordination store.
///
/// Conditional operations run under the shard lock of the key, so they are
/// atomic against every other caller in this process. Expiry uses the tokio
/// clock, which lets tests drive TTLs with paused time.
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, Slot>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        check_ttl(key, ttl)?;
        let now = Instant::now();
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_live(now) {
                    return Ok(false);
                }
                // Expired entries are indistinguishable from absent ones.
                occupied.insert(Slot::new(value, ttl));
                Ok(true)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Slot::new(value, ttl));
                Ok(true)
            }
        }
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool> {
        let now = Instant::now();
        Ok(self
            .entries
            .remove_if(key, |_, slot| slot.is_live(now) && slot.value == expected)
            .is_some())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        // Copy out before touching the map again; the read guard holds the shard.
        let hit = self
            .entries
            .get(key)
            .map(|slot| (slot.is_live(now), slot.value.clone()));
        match hit {
            Some((true, value)) => Ok(Some(value)),
            Some((false, _)) => {
                self.entries.remove_if(key, |_, slot| !slot.is_live(now));
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        check_ttl(key, ttl)?;
        self.entries.insert(key.to_string(), Slot::new(value, ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let now = Instant::now();
        Ok(self
            .entries
            .remove(key)
            .is_some_and(|(_, slot)| slot.is_live(now)))
    }

    async fn purge_expired(&self) -> Result<usize> {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, slot| slot.is_live(now));
        Ok(before.saturating_sub(self.entries.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test(start_paused = true)]
    async fn set_if_absent_only_first_writer_wins() {
        let store = MemoryStore::new();
        assert!(store.set_if_absent("lock:a", "t1", TTL).await.unwrap());
        assert!(!store.set_if_absent("lock:a", "t2", TTL).await.unwrap());
        assert_eq!(store.get("lock:a").await.unwrap().as_deref(), Some("t1"));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entry_reads_as_miss_and_can_be_retaken() {
        let store = MemoryStore::new();
        store.set_if_absent("lock:a", "t1", TTL).await.unwrap();

        tokio::time::advance(TTL + Duration::from_millis(1)).await;
        assert_eq!(store.get("lock:a").await.unwrap(), None);
        assert!(store.set_if_absent("lock:a", "t2", TTL).await.unwrap());
        assert_eq!(store.get("lock:a").await.unwrap().as_deref(), Some("t2"));
    }

    #[tokio::test(start_paused = true)]
    async fn compare_and_delete_requires_matching_value() {
        let store = MemoryStore::new();
        store.set("k", "mine", TTL).await.unwrap();
        assert!(!store.compare_and_delete("k", "theirs").await.unwrap());
        assert!(store.get("k").await.unwrap().is_some());
        assert!(store.compare_and_delete("k", "mine").await.unwrap());
        assert!(store.get("k").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn compare_and_delete_ignores_expired_entry() {
        let store = MemoryStore::new();
        store.set("k", "mine", TTL).await.unwrap();
        tokio::time::advance(TTL * 2).await;
        assert!(!store.compare_and_delete("k", "mine").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn set_replaces_value_and_expiry() {
        let store = MemoryStore::new();
        store.set("k", "a", Duration::from_secs(1)).await.unwrap();
        store.set("k", "b", TTL).await.unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("b"));
    }

    #[tokio::test(start_paused = true)]
    async fn purge_removes_only_expired() {
        let store = MemoryStore::new();
        store.set("short", "x", Duration::from_secs(1)).await.unwrap();
        store.set("long", "y", TTL).await.unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert_eq!(store.len(), 1);
        assert!(store.delete("long").await.unwrap());
        assert!(store.is_empty());
    }
}
