use thiserror::Error;
use vault_store::StoreError;

/// Errors from the distributed lock.
///
/// Contention is not an error: a held key yields `acquired = false`. Only a
/// store that cannot answer ends up here.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("coordination store error: {0}")]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, LockError>;
