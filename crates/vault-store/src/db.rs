use rusqlite::Connection;

use crate::error::Result;

/// Initialise the coordination schema in `conn`.
///
/// `expires_at` is epoch milliseconds. Rows past their expiry are logically
/// absent; `purge_expired` removes them physically.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS coordination_kv (
            key         TEXT    NOT NULL PRIMARY KEY,
            value       TEXT    NOT NULL,
            expires_at  INTEGER NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_coordination_kv_expires
            ON coordination_kv (expires_at);
        ",
    )?;
    Ok(())
}
