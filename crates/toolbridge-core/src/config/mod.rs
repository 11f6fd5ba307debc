//! Configuration
//!
//! Every section defaults sensibly, so an empty file (or none at all) is a
//! valid configuration. Durations use humantime notation (`"30s"`, `"5m"`).

pub mod env_loader;
pub mod file_loader;
pub mod logging_config;

pub use env_loader::{apply_env_overrides, apply_env_overrides_with};
pub use file_loader::load_from_file;
pub use logging_config::{LogFormat, LoggingConfig};

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{BridgeError, BridgeResult};
use crate::mcp::transport::framing::DEFAULT_MAX_LINE_BYTES;
use crate::mcp::types::ClientInfo;
use crate::mcp::TransportOptions;

/// Connection pool tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    #[serde(with = "humantime_serde")]
    pub health_check_interval: Duration,
    /// Connections unused for longer than this are evicted
    #[serde(with = "humantime_serde")]
    pub max_idle_time: Duration,
    /// Consecutive reconnect failures tolerated before giving up
    pub max_reconnect_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub reconnect_base_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub reconnect_max_delay: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            health_check_interval: Duration::from_secs(60),
            max_idle_time: Duration::from_secs(300),
            max_reconnect_attempts: 3,
            reconnect_base_delay: Duration::from_secs(1),
            reconnect_max_delay: Duration::from_secs(30),
        }
    }
}

/// Defaults applied to every transport the factory builds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportDefaults {
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Longest accepted inbound line
    pub max_line_bytes: usize,
    pub client_name: String,
    pub client_version: String,
    pub docker_binary: String,
    pub notification_capacity: usize,
}

impl Default for TransportDefaults {
    fn default() -> Self {
        let client = ClientInfo::default();
        Self {
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            client_name: client.name,
            client_version: client.version,
            docker_binary: "docker".to_string(),
            notification_capacity: 64,
        }
    }
}

impl From<&TransportDefaults> for TransportOptions {
    fn from(defaults: &TransportDefaults) -> Self {
        Self {
            request_timeout: defaults.request_timeout,
            connect_timeout: defaults.connect_timeout,
            max_line_bytes: defaults.max_line_bytes,
            notification_capacity: defaults.notification_capacity,
            client_info: ClientInfo {
                name: defaults.client_name.clone(),
                version: defaults.client_version.clone(),
            },
            docker_binary: defaults.docker_binary.clone(),
        }
    }
}

/// Tool execution settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Timeout for `tools/call`; the transport request timeout when unset
    #[serde(with = "humantime_serde")]
    pub default_timeout: Option<Duration>,
    /// Connect and discover in the background after registration
    pub discover_on_register: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            default_timeout: None,
            discover_on_register: true,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub pool: PoolConfig,
    pub transport: TransportDefaults,
    pub execution: ExecutionConfig,
    pub logging: LoggingConfig,
}

impl BridgeConfig {
    /// Load from `path`, then apply `TOOLBRIDGE_*` overrides and validate
    pub fn load(path: &Path) -> BridgeResult<Self> {
        let mut config = load_from_file(path)?;
        apply_env_overrides(&mut config)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_file(path: &Path) -> BridgeResult<Self> {
        load_from_file(path)
    }

    pub fn apply_env_overrides(&mut self) -> BridgeResult<()> {
        apply_env_overrides(self)
    }

    pub fn transport_options(&self) -> TransportOptions {
        TransportOptions::from(&self.transport)
    }

    pub fn validate(&self) -> BridgeResult<()> {
        let pool = &self.pool;
        let zero_checks = [
            ("pool.health_check_interval", pool.health_check_interval),
            ("pool.max_idle_time", pool.max_idle_time),
            ("pool.reconnect_base_delay", pool.reconnect_base_delay),
            ("transport.request_timeout", self.transport.request_timeout),
            ("transport.connect_timeout", self.transport.connect_timeout),
        ];
        for (name, value) in zero_checks {
            if value.is_zero() {
                return Err(BridgeError::config(format!("{} must be greater than zero", name)));
            }
        }

        if pool.reconnect_base_delay > pool.reconnect_max_delay {
            return Err(BridgeError::config(
                "pool.reconnect_base_delay must not exceed pool.reconnect_max_delay",
            ));
        }
        if self.transport.max_line_bytes == 0 {
            return Err(BridgeError::config("transport.max_line_bytes must be greater than zero"));
        }
        if self.transport.client_name.trim().is_empty() {
            return Err(BridgeError::config("transport.client_name must not be empty"));
        }
        if self.execution.default_timeout.is_some_and(|t| t.is_zero()) {
            return Err(BridgeError::config("execution.default_timeout must be greater than zero"));
        }
        Ok(())
    }
}
