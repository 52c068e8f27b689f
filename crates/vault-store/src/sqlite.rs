use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use tracing::debug;

use crate::db::init_db;
use crate::error::{Result, StoreError};
use crate::store::{check_ttl, CoordinationStore};

/// Coordination store backed by a SQLite file.
///
/// Every process that opens the same file sees the same keys. Conditional
/// writes are single statements, so SQLite's write lock makes them atomic
/// across processes. Expiry is wall-clock (epoch millis); hosts sharing the
/// file must agree on time.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the store at `path` and initialise its schema.
    pub fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::new(conn)
    }

    /// Wrap an already-open connection, initialising the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("connection mutex poisoned".to_string()))
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

// Rounded up so a sub-millisecond lease is still live when it is read back.
fn expiry_ms(ttl: Duration) -> i64 {
    let ms = ttl.as_micros().div_ceil(1000);
    now_ms().saturating_add(i64::try_from(ms).unwrap_or(i64::MAX))
}

#[async_trait]
impl CoordinationStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        check_ttl(key, ttl)?;
        let now = now_ms();
        let conn = self.conn()?;
        // The upsert only overwrites a row whose lease already ran out, so a
        // live holder leaves `changes` at zero.
        let changed = conn.execute(
            "INSERT INTO coordination_kv (key, value, expires_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE
                SET value = excluded.value, expires_at = excluded.expires_at
                WHERE coordination_kv.expires_at <= ?4",
            rusqlite::params![key, value, expiry_ms(ttl), now],
        )?;
        debug!(key, acquired = changed == 1, "set_if_absent");
        Ok(changed == 1)
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool> {
        let conn = self.conn()?;
        let n = conn.execute(
            "DELETE FROM coordination_kv
             WHERE key = ?1 AND value = ?2 AND expires_at > ?3",
            rusqlite::params![key, expected, now_ms()],
        )?;
        Ok(n == 1)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM coordination_kv WHERE key = ?1 AND expires_at > ?2",
                rusqlite::params![key, now_ms()],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        check_ttl(key, ttl)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO coordination_kv (key, value, expires_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE
                SET value = excluded.value, expires_at = excluded.expires_at",
            rusqlite::params![key, value, expiry_ms(ttl)],
        )?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let conn = self.conn()?;
        let n = conn.execute(
            "DELETE FROM coordination_kv WHERE key = ?1 AND expires_at > ?2",
            rusqlite::params![key, now_ms()],
        )?;
        // Drop any expired leftover too; it is already logically absent.
        conn.execute("DELETE FROM coordination_kv WHERE key = ?1", [key])?;
        Ok(n == 1)
    }

    async fn purge_expired(&self) -> Result<usize> {
        let conn = self.conn()?;
        let n = conn.execute(
            "DELETE FROM coordination_kv WHERE expires_at <= ?1",
            [now_ms()],
        )?;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    fn store() -> SqliteStore {
        SqliteStore::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn set_if_absent_is_exclusive_while_live() {
        let store = store();
        assert!(store.set_if_absent("lock:job", "a", TTL).await.unwrap());
        assert!(!store.set_if_absent("lock:job", "b", TTL).await.unwrap());
        assert_eq!(store.get("lock:job").await.unwrap().as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn expired_row_is_a_miss_and_can_be_retaken() {
        let store = store();
        store
            .set_if_absent("lock:job", "a", Duration::from_millis(20))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.get("lock:job").await.unwrap(), None);
        assert!(store.set_if_absent("lock:job", "b", TTL).await.unwrap());
        assert_eq!(store.get("lock:job").await.unwrap().as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn compare_and_delete_checks_owner() {
        let store = store();
        store.set("k", "owner-1", TTL).await.unwrap();
        assert!(!store.compare_and_delete("k", "owner-2").await.unwrap());
        assert!(store.compare_and_delete("k", "owner-1").await.unwrap());
        assert!(!store.compare_and_delete("k", "owner-1").await.unwrap());
    }

    #[tokio::test]
    async fn purge_and_delete() {
        let store = store();
        store.set("gone", "x", Duration::from_millis(10)).await.unwrap();
        store.set("kept", "y", TTL).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert!(store.delete("kept").await.unwrap());
        assert!(!store.delete("kept").await.unwrap());
    }

    #[tokio::test]
    async fn sub_millisecond_lease_still_excludes() {
        let store = store();
        let ttl = Duration::from_micros(900);
        assert!(store.set_if_absent("lock:k", "a", ttl).await.unwrap());
        assert!(!store.set_if_absent("lock:k", "b", ttl).await.unwrap());
        assert_eq!(store.get("lock:k").await.unwrap().as_deref(), Some("a"));
    }

    #[test]
    fn expiry_rounds_up_to_whole_millis() {
        let before = now_ms();
        assert!(expiry_ms(Duration::from_micros(1)) >= before + 1);
        assert!(expiry_ms(Duration::from_micros(1500)) >= before + 2);
    }

    #[tokio::test]
    async fn two_connections_share_one_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coord.db");
        let a = SqliteStore::open(&path, Duration::from_secs(1)).unwrap();
        let b = SqliteStore::open(&path, Duration::from_secs(1)).unwrap();

        assert!(a.set_if_absent("lock:PushBoxAsset", "a", TTL).await.unwrap());
        assert!(!b.set_if_absent("lock:PushBoxAsset", "b", TTL).await.unwrap());
        assert!(!b.compare_and_delete("lock:PushBoxAsset", "b").await.unwrap());
        assert!(a.compare_and_delete("lock:PushBoxAsset", "a").await.unwrap());
        assert!(b.set_if_absent("lock:PushBoxAsset", "b", TTL).await.unwrap());
    }
}
