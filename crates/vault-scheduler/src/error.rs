use thiserror::Error;
use vault_locks::LockError;

use crate::schedule::CronParseError;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The cron expression could not be parsed.
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(#[from] CronParseError),

    /// No registered job with the given name.
    #[error("Job not found: {name}")]
    JobNotFound { name: String },

    /// The coordination store failed while taking or releasing the job lease.
    #[error("Job lock error: {0}")]
    Lock(#[from] LockError),

    /// Shared state became unusable (poisoned connection mutex).
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
