//! `vault-store` — the shared key-value coordination store.
//!
//! Every cross-process primitive (distributed locks, session mappings) goes
//! through [`CoordinationStore`]. The contract is small on purpose: atomic
//! set-if-absent, compare-and-delete, plain get/set, all with server-side
//! expiry. Once a TTL elapses `get` reports a miss even if nobody deleted the
//! key.
//!
//! | Backend        | Scope                                   |
//! |----------------|-----------------------------------------|
//! | `SqliteStore`  | Any process that opens the same file    |
//! | `MemoryStore`  | One process; tests and single instances |

pub mod db;
pub mod error;
pub mod memory;
pub mod sqlite;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use store::{open_store, CoordinationStore};
