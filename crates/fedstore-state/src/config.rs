//! Store configuration.
//!
//! Parsed from TOML:
//!
//! ```toml
//! [backend]
//! driver = "redb"
//! url = "/var/lib/fedstore/state.redb"
//! username = "SA"
//! password = ""
//!
//! [connection]
//! pool_size = 1
//! max_retries = 3
//! retry_interval_ms = 100
//!
//! [policy]
//! reregistration = "overwrite"
//! ownership = "lenient"
//! ```
//!
//! Every section and field is optional; omitted values take the defaults
//! below.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level store configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: BackendConfig,
    pub connection: ConnectionConfig,
    pub policy: PolicyConfig,
}

/// Which backend to use and how to reach it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub driver: Driver,
    /// `memory:` for an ephemeral store, otherwise a database file path
    /// (optionally prefixed with `redb://`).
    pub url: String,
    #[serde(flatten)]
    pub credentials: Credentials,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            driver: Driver::Redb,
            url: "memory:".to_string(),
            credentials: Credentials::default(),
        }
    }
}

/// Backend driver identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Driver {
    /// Durable redb-backed store (sub-clusters, application homes, policies).
    #[default]
    Redb,
    /// In-process store supporting every operation.
    Memory,
}

impl fmt::Display for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Driver::Redb => write!(f, "redb"),
            Driver::Memory => write!(f, "memory"),
        }
    }
}

/// Username/password pair handed to the backend on connect.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
        }
    }
}

// Never print the password.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Connection manager settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Maximum concurrently open connections (default: 1).
    pub pool_size: usize,
    /// Extra connect attempts after the first failure (default: 3).
    pub max_retries: u32,
    /// Pause between connect attempts (default: 100ms).
    pub retry_interval_ms: u64,
    /// Maximum wait for a free connection (default: 5s).
    pub acquire_timeout_ms: u64,
    /// Maximum duration of a single procedure call (default: 5s).
    pub call_timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            pool_size: 1,
            max_retries: 3,
            retry_interval_ms: 100,
            acquire_timeout_ms: 5_000,
            call_timeout_ms: 5_000,
        }
    }
}

impl ConnectionConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

/// How to treat re-registration of an active sub-cluster with different info.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReregistrationPolicy {
    /// Replace the stored record.
    #[default]
    Overwrite,
    /// Fail with a registration conflict.
    Reject,
}

/// How to treat an add that names a different owner than the stored one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OwnershipMode {
    /// Keep the existing owner and return it.
    #[default]
    Lenient,
    /// Keep the existing owner and fail with an owner conflict.
    Strict,
}

/// Store-level semantics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub reregistration: ReregistrationPolicy,
    pub ownership: OwnershipMode,
    /// An active sub-cluster silent for longer than this is marked lost
    /// by `expire_sub_clusters` (default: 30 minutes).
    pub heartbeat_timeout_secs: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            reregistration: ReregistrationPolicy::default(),
            ownership: OwnershipMode::default(),
            heartbeat_timeout_secs: 30 * 60,
        }
    }
}

impl PolicyConfig {
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }
}

impl StoreConfig {
    /// Load and validate a TOML config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate TOML config text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: StoreConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Ephemeral in-memory store using the given driver (for testing).
    pub fn in_memory(driver: Driver) -> Self {
        Self {
            backend: BackendConfig {
                driver,
                ..BackendConfig::default()
            },
            ..Self::default()
        }
    }

    /// Builder method: set the re-registration policy.
    pub fn with_reregistration(mut self, policy: ReregistrationPolicy) -> Self {
        self.policy.reregistration = policy;
        self
    }

    /// Builder method: set the ownership mode.
    pub fn with_ownership(mut self, mode: OwnershipMode) -> Self {
        self.policy.ownership = mode;
        self
    }

    /// Builder method: replace connection settings.
    pub fn with_connection(mut self, connection: ConnectionConfig) -> Self {
        self.connection = connection;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backend.url.trim().is_empty() {
            return Err(ConfigError::Invalid("backend.url must not be empty".into()));
        }
        if self.connection.pool_size == 0 {
            return Err(ConfigError::Invalid(
                "connection.pool_size must be at least 1".into(),
            ));
        }
        if self.connection.acquire_timeout_ms == 0 || self.connection.call_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "connection timeouts must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
