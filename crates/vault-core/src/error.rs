use thiserror::Error;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Coordination store error: {0}")]
    Store(String),

    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("Job not found: {name}")]
    JobNotFound { name: String },

    #[error("Invalid session: {0}")]
    InvalidSession(String),
}

impl VaultError {
    /// Short error code string returned in JSON error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            VaultError::Config(_) => "CONFIG_ERROR",
            VaultError::Store(_) => "STORE_UNAVAILABLE",
            VaultError::Scheduler(_) => "SCHEDULER_ERROR",
            VaultError::JobNotFound { .. } => "JOB_NOT_FOUND",
            VaultError::InvalidSession(_) => "INVALID_SESSION",
        }
    }
}

pub type Result<T> = std::result::Result<T, VaultError>;
