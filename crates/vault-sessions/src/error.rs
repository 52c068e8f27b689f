use thiserror::Error;
use vault_store::StoreError;

/// Why a session operation failed. Every variant means "not authenticated"
/// to a caller of `validate_token`.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The coordination store could not be reached.
    #[error("session store error: {0}")]
    Store(#[from] StoreError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Not of the form `<payload>.<signature>` or the payload does not decode.
    #[error("malformed token: {0}")]
    Malformed(String),

    /// The signing key could not initialise the MAC.
    #[error("signing key rejected: {0}")]
    SigningKey(String),

    #[error("token signature mismatch")]
    BadSignature,

    #[error("token expired")]
    Expired,

    /// No store entry for the token: logged out, superseded or lapsed.
    #[error("token revoked or unknown")]
    Revoked,

    /// The store maps the token to a different user than its claim names.
    #[error("token subject does not match session owner")]
    SubjectMismatch,

    #[error("invalid username: {0}")]
    InvalidUsername(String),

    /// A concurrent login for the same user replaced the session mid-issue.
    #[error("concurrent login for {username}; retry")]
    Contended { username: String },
}

pub type Result<T> = std::result::Result<T, SessionError>;
