use std::collections::HashMap;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 18790;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_ACCOUNT_LEASE_SECS: u64 = 300; // idle lease for in-process account locks
pub const DEFAULT_LOCK_TTL_SECS: u64 = 60;
pub const DEFAULT_SESSION_TTL_SECS: u64 = 24 * 60 * 60;
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Top-level config (vault.toml + VAULT_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VaultConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub coordination: CoordinationConfig,
    #[serde(default)]
    pub locks: LocksConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Which implementation backs the shared coordination store.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Shared SQLite file. Every process pointing at the same file coordinates.
    #[default]
    Sqlite,
    /// Process-local map. Only safe for single-instance deployments and tests.
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinationConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    /// Overrides `database.path` for the coordination table when set.
    pub path: Option<String>,
    /// How long a writer waits on a locked SQLite file before failing.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            path: None,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

/// What the account-lock sweeper is allowed to reclaim.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SweepPolicyConfig {
    /// Reclaim by expiry alone, even when a caller still holds the handle.
    ExpiryOnly,
    /// Leave expired entries alone while any caller still holds their handle.
    #[default]
    SkipInUse,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocksConfig {
    #[serde(default = "default_account_lease_secs")]
    pub lease_secs: u64,
    /// Defaults to `lease_secs` when unset.
    pub sweep_interval_secs: Option<u64>,
    #[serde(default)]
    pub sweep_policy: SweepPolicyConfig,
}

impl Default for LocksConfig {
    fn default() -> Self {
        Self {
            lease_secs: DEFAULT_ACCOUNT_LEASE_SECS,
            sweep_interval_secs: None,
            sweep_policy: SweepPolicyConfig::default(),
        }
    }
}

/// A job descriptor declared in the config file, upserted into the
/// `job_configs` table at startup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobSeedConfig {
    pub name: String,
    pub cron_expression: String,
    pub package: String,
    pub function_name: String,
    #[serde(default = "bool_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// When false the timer loop is not started; manual runs still work.
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_lock_ttl_secs")]
    pub default_lock_ttl_secs: u64,
    /// Job name → lock TTL in seconds, for jobs known to outlive the default.
    #[serde(default = "default_lock_ttl_overrides")]
    pub lock_ttl_overrides: HashMap<String, u64>,
    #[serde(default)]
    pub jobs: Vec<JobSeedConfig>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_lock_ttl_secs: DEFAULT_LOCK_TTL_SECS,
            lock_ttl_overrides: default_lock_ttl_overrides(),
            jobs: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// HMAC signing secret shared by every instance. When unset the gateway
    /// generates a per-process secret and warns; tokens then only validate on
    /// the instance that issued them.
    pub secret: Option<String>,
    #[serde(default = "default_session_ttl_secs")]
    pub ttl_secs: u64,
    /// Key the upstream identity service presents in `X-Issuer-Key` to mint
    /// tokens over `POST /session`. Unset disables issuance over HTTP.
    pub issuer_key: Option<String>,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            secret: None,
            ttl_secs: DEFAULT_SESSION_TTL_SECS,
            issuer_key: None,
        }
    }
}

fn bool_true() -> bool {
    true
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}
fn default_account_lease_secs() -> u64 {
    DEFAULT_ACCOUNT_LEASE_SECS
}
fn default_lock_ttl_secs() -> u64 {
    DEFAULT_LOCK_TTL_SECS
}
fn default_session_ttl_secs() -> u64 {
    DEFAULT_SESSION_TTL_SECS
}
fn default_lock_ttl_overrides() -> HashMap<String, u64> {
    // PushBoxAsset walks every custody account; one minute is not enough.
    HashMap::from([("PushBoxAsset".to_string(), 6 * 60)])
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.vault/vault.db", home)
}

impl VaultConfig {
    /// Load config from a TOML file with VAULT_* env var overrides.
    ///
    /// Nested keys use a double underscore, e.g.
    /// `VAULT_SCHEDULER__DEFAULT_LOCK_TTL_SECS=90`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: VaultConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("VAULT_").split("__"))
            .extract()
            .map_err(|e| crate::error::VaultError::Config(e.to_string()))?;

        Ok(config)
    }

    /// Path of the SQLite file holding the coordination table.
    pub fn coordination_path(&self) -> &str {
        self.coordination
            .path
            .as_deref()
            .unwrap_or(&self.database.path)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.vault/vault.toml", home)
}
