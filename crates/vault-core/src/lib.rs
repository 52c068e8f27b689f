pub mod config;
pub mod error;
pub mod types;

pub use config::VaultConfig;
pub use error::{Result, VaultError};
pub use types::InstanceId;
