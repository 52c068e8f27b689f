use thiserror::Error;

/// Errors raised by a coordination store backend.
///
/// Every variant means the store could not answer; callers must not read any
/// of them as "key absent" or "lock free".
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying SQLite / rusqlite error (locked file, I/O, corrupt schema).
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The backend is unreachable or refused the request.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Leases must expire in the future; a zero TTL is rejected.
    #[error("Invalid TTL for key {key}: must be greater than zero")]
    InvalidTtl { key: String },
}

pub type Result<T> = std::result::Result<T, StoreError>;
