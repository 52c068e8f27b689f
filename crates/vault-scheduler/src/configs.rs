use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use rusqlite::Connection;
use tracing::{info, warn};
use vault_core::config::JobSeedConfig;

use crate::{
    db::init_db,
    error::{Result, SchedulerError},
    schedule::CronExpr,
    types::{JobDescriptor, JobStatus},
};

/// Where the scheduler reads job descriptors from at load time.
pub trait JobConfigSource: Send + Sync {
    /// All descriptors whose status is `enabled`.
    fn list_enabled(&self) -> Result<Vec<JobDescriptor>>;
}

/// Fixed in-memory descriptor list, mostly for tests and embedding.
impl JobConfigSource for Vec<JobDescriptor> {
    fn list_enabled(&self) -> Result<Vec<JobDescriptor>> {
        Ok(self
            .iter()
            .filter(|d| d.status.is_enabled())
            .cloned()
            .collect())
    }
}

/// The `job_configs` table.
///
/// Operators manage rows here (or through the config file seed); the
/// scheduler only ever calls [`JobConfigSource::list_enabled`].
#[derive(Clone)]
pub struct JobConfigStore {
    conn: Arc<Mutex<Connection>>,
}

impl JobConfigStore {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| SchedulerError::Internal("job config connection poisoned".to_string()))
    }

    /// Insert or replace the descriptor named `job.name`. The cron expression
    /// must parse; nothing is written otherwise.
    pub fn upsert(&self, job: &JobDescriptor) -> Result<()> {
        CronExpr::parse(&job.cron_expression)?;
        let conn = self.conn()?;
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO job_configs
             (name, cron_expression, package, function_name, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
             ON CONFLICT(name) DO UPDATE SET
                cron_expression = excluded.cron_expression,
                package         = excluded.package,
                function_name   = excluded.function_name,
                status          = excluded.status,
                updated_at      = excluded.updated_at",
            rusqlite::params![
                job.name,
                job.cron_expression,
                job.package,
                job.function_name,
                job.status.to_string(),
                now
            ],
        )?;
        info!(job = %job.name, status = %job.status, "job config saved");
        Ok(())
    }

    pub fn set_status(&self, name: &str, status: JobStatus) -> Result<()> {
        let conn = self.conn()?;
        let n = conn.execute(
            "UPDATE job_configs SET status = ?1, updated_at = ?2 WHERE name = ?3",
            rusqlite::params![status.to_string(), Utc::now().to_rfc3339(), name],
        )?;
        if n == 0 {
            return Err(SchedulerError::JobNotFound {
                name: name.to_string(),
            });
        }
        info!(job = %name, %status, "job status changed");
        Ok(())
    }

    pub fn remove(&self, name: &str) -> Result<()> {
        let conn = self.conn()?;
        let n = conn.execute("DELETE FROM job_configs WHERE name = ?1", [name])?;
        if n == 0 {
            return Err(SchedulerError::JobNotFound {
                name: name.to_string(),
            });
        }
        info!(job = %name, "job config removed");
        Ok(())
    }

    /// Every descriptor ordered by name, whatever its status.
    pub fn list_all(&self) -> Result<Vec<JobDescriptor>> {
        self.query("SELECT name, cron_expression, package, function_name, status
                    FROM job_configs ORDER BY name")
    }

    /// Upsert one row per `[[scheduler.jobs]]` entry from the config file.
    pub fn seed_from_config(&self, seeds: &[JobSeedConfig]) -> Result<usize> {
        for seed in seeds {
            let mut job = JobDescriptor::new(
                &seed.name,
                &seed.cron_expression,
                &seed.package,
                &seed.function_name,
            );
            job.status = JobStatus::from(seed.enabled);
            self.upsert(&job)?;
        }
        Ok(seeds.len())
    }

    fn query(&self, sql: &str) -> Result<Vec<JobDescriptor>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let jobs = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?, // name
                    row.get::<_, String>(1)?, // cron_expression
                    row.get::<_, String>(2)?, // package
                    row.get::<_, String>(3)?, // function_name
                    row.get::<_, String>(4)?, // status
                ))
            })?
            .filter_map(|r| {
                let (name, cron_expression, package, function_name, status) = r.ok()?;
                let status = match status.parse::<JobStatus>() {
                    Ok(s) => s,
                    Err(e) => {
                        warn!(job = %name, "skipping job config row: {e}");
                        return None;
                    }
                };
                Some(JobDescriptor {
                    name,
                    cron_expression,
                    package,
                    function_name,
                    status,
                })
            })
            .collect();
        Ok(jobs)
    }
}

impl JobConfigSource for JobConfigStore {
    fn list_enabled(&self) -> Result<Vec<JobDescriptor>> {
        self.query(
            "SELECT name, cron_expression, package, function_name, status
             FROM job_configs WHERE status = 'enabled' ORDER BY name",
        )
    }
}
