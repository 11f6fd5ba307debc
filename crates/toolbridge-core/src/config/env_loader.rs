//! Environment variable overrides
//!
//! Recognised variables, all prefixed `TOOLBRIDGE_`:
//! `REQUEST_TIMEOUT_SECS`, `HEALTH_CHECK_INTERVAL_SECS`, `MAX_IDLE_SECS`,
//! `MAX_RECONNECT_ATTEMPTS`, `LOG_LEVEL`, `LOG_FORMAT`.

use std::str::FromStr;
use std::time::Duration;

use super::{BridgeConfig, LogFormat};
use crate::error::{BridgeError, BridgeResult};

pub const ENV_PREFIX: &str = "TOOLBRIDGE_";

fn parse_var<T: FromStr>(name: &str, raw: &str) -> BridgeResult<T> {
    raw.trim()
        .parse()
        .map_err(|_| BridgeError::config(format!("Invalid {}{} value: '{}'", ENV_PREFIX, name, raw)))
}

/// Apply overrides read through `lookup`, which receives the full variable name
pub fn apply_env_overrides_with<F>(config: &mut BridgeConfig, lookup: F) -> BridgeResult<()>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

    if let Some(raw) = get("REQUEST_TIMEOUT_SECS") {
        config.transport.request_timeout =
            Duration::from_secs(parse_var("REQUEST_TIMEOUT_SECS", &raw)?);
    }
    if let Some(raw) = get("HEALTH_CHECK_INTERVAL_SECS") {
        config.pool.health_check_interval =
            Duration::from_secs(parse_var("HEALTH_CHECK_INTERVAL_SECS", &raw)?);
    }
    if let Some(raw) = get("MAX_IDLE_SECS") {
        config.pool.max_idle_time = Duration::from_secs(parse_var("MAX_IDLE_SECS", &raw)?);
    }
    if let Some(raw) = get("MAX_RECONNECT_ATTEMPTS") {
        config.pool.max_reconnect_attempts = parse_var("MAX_RECONNECT_ATTEMPTS", &raw)?;
    }
    if let Some(level) = get("LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(raw) = get("LOG_FORMAT") {
        config.logging.format = raw
            .parse::<LogFormat>()
            .map_err(|e| BridgeError::config(format!("Invalid {}LOG_FORMAT: {}", ENV_PREFIX, e)))?;
    }

    Ok(())
}

/// Apply overrides from the process environment
pub fn apply_env_overrides(config: &mut BridgeConfig) -> BridgeResult<()> {
    apply_env_overrides_with(config, |name| std::env::var(name).ok())
}
