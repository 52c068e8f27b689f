//! `vault-locks` — exclusion primitives at two scopes.
//!
//! * [`KeyedMutexRegistry`]: one async mutex per key inside this process,
//!   with idle-lease expiry and a background sweeper. Used around custody
//!   account mutations.
//! * [`DistributedLock`]: a TTL lease in the shared coordination store with an
//!   owner token, so at most one process in the fleet holds a key and nobody
//!   can release a lease they do not own.

pub mod distributed;
pub mod error;
pub mod registry;

pub use distributed::{DistributedLock, LeaseGuard, LockAttempt, OwnerToken};
pub use error::{LockError, Result};
pub use registry::{AccountLock, KeyedMutexRegistry, SweepPolicy};
