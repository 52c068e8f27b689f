use rusqlite::Connection;

use crate::error::Result;

/// Initialise the scheduler schema in `conn`.
///
/// Creates the `job_configs` table (idempotent). Rows are written out-of-band
/// by operators or seeded from the config file; the scheduler only reads them.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS job_configs (
            name             TEXT NOT NULL PRIMARY KEY,  -- also the lock key
            cron_expression  TEXT NOT NULL,
            package          TEXT NOT NULL,
            function_name    TEXT NOT NULL,
            status           TEXT NOT NULL DEFAULT 'enabled',
            created_at       TEXT NOT NULL,
            updated_at       TEXT NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_job_configs_status ON job_configs (status);
        ",
    )?;
    Ok(())
}
