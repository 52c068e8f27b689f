//! Bearer session tokens backed by the coordination store.
//!
//! Each live session is two store entries with the same lease:
//! `session:token:<token> → username` and `session:user:<username> → token`.
//! The store is authoritative: a token whose entry is gone is invalid no
//! matter what its signature and expiry claim say.

pub mod error;
pub mod service;
pub mod signer;
pub mod types;

pub use error::{Result, SessionError};
pub use service::SessionService;
pub use signer::{HmacSigner, TokenSigner};
pub use types::{IssuedToken, TokenClaims};
