//! `vault-scheduler` — cron-driven job dispatch guarded by distributed locks.
//!
//! # Overview
//!
//! Job descriptors live in the `job_configs` SQLite table (or any other
//! [`JobConfigSource`]). [`Scheduler::load_jobs`] reads the enabled ones,
//! parses their cron expressions and binds each `(package, function)` target
//! to a handler from the [`JobRegistry`]. [`Scheduler::run`] then drives one
//! timer per job.
//!
//! Timers fire on every instance in a deployment. [`Scheduler::execute_with_lock`]
//! takes a distributed lease keyed by job name before running the body, so a
//! given job runs on at most one instance at a time. There is no other
//! cross-process awareness.
//!
//! # Job states
//!
//! | State        | Meaning                                        |
//! |--------------|------------------------------------------------|
//! | (absent)     | Unregistered: not loaded, or skipped on load   |
//! | `Registered` | Loaded and bound, never run on this instance   |
//! | `Running`    | Body executing on this instance                |
//! | `Idle`       | Last run finished (or was skipped on contention) |

pub mod configs;
pub mod db;
pub mod engine;
pub mod error;
pub mod registry;
pub mod schedule;
pub mod types;

pub use configs::{JobConfigSource, JobConfigStore};
pub use engine::{LockTtlPolicy, Scheduler};
pub use error::{Result, SchedulerError};
pub use registry::{JobHandler, JobRegistry};
pub use schedule::{CronExpr, CronParseError};
pub use types::{ExecutionOutcome, JobDescriptor, JobSnapshot, JobState, JobStatus, JobTarget};
