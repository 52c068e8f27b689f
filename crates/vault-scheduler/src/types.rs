use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether the scheduler should pick a descriptor up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Enabled,
    Disabled,
}

impl JobStatus {
    pub fn is_enabled(self) -> bool {
        matches!(self, JobStatus::Enabled)
    }
}

impl From<bool> for JobStatus {
    fn from(enabled: bool) -> Self {
        if enabled {
            JobStatus::Enabled
        } else {
            JobStatus::Disabled
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Enabled => "enabled",
            JobStatus::Disabled => "disabled",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "enabled" => Ok(JobStatus::Enabled),
            "disabled" => Ok(JobStatus::Disabled),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// The `(package, function)` pair a descriptor points at.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobTarget {
    pub package: String,
    pub function: String,
}

impl JobTarget {
    pub fn new(package: impl Into<String>, function: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            function: function.into(),
        }
    }
}

impl fmt::Display for JobTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.package, self.function)
    }
}

/// A persisted job configuration record. The scheduler never mutates it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDescriptor {
    /// Unique; doubles as the distributed lock key.
    pub name: String,
    pub cron_expression: String,
    pub package: String,
    pub function_name: String,
    pub status: JobStatus,
}

impl JobDescriptor {
    pub fn new(
        name: impl Into<String>,
        cron_expression: impl Into<String>,
        package: impl Into<String>,
        function_name: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            cron_expression: cron_expression.into(),
            package: package.into(),
            function_name: function_name.into(),
            status: JobStatus::Enabled,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.status = JobStatus::Disabled;
        self
    }

    pub fn target(&self) -> JobTarget {
        JobTarget::new(&self.package, &self.function_name)
    }
}

/// Per-instance lifecycle of a registered job. Unregistered jobs have no
/// state at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    #[default]
    Registered,
    Running,
    Idle,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Registered => "registered",
            JobState::Running => "running",
            JobState::Idle => "idle",
        };
        write!(f, "{s}")
    }
}

/// Result of one `execute_with_lock` call that reached the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    /// Lease taken, body ran to completion, lease released.
    Completed,
    /// Another holder had the lease; nothing ran.
    Skipped,
    /// Lease taken, body returned an error or panicked, lease released.
    Failed { reason: String },
}

/// Read-only view of a registered job for status endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub name: String,
    pub cron_expression: String,
    pub target: String,
    pub state: JobState,
    pub lock_ttl_secs: u64,
    pub run_count: u64,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub last_outcome: Option<ExecutionOutcome>,
}
