//! File-based configuration loading

use std::fs;
use std::path::Path;

use super::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};

/// Read a `BridgeConfig` from disk.
///
/// The format follows the extension: `toml`, `yaml`/`yml`, anything else is
/// read as JSON. A missing file yields the defaults.
pub fn load_from_file(path: &Path) -> BridgeResult<BridgeConfig> {
    if !path.exists() {
        return Ok(BridgeConfig::default());
    }

    let content = fs::read_to_string(path).map_err(|e| {
        BridgeError::config(format!(
            "Failed to read config file '{}': {}",
            path.display(),
            e
        ))
    })?;

    let config = match path.extension().and_then(|s| s.to_str()) {
        Some("toml") => toml::from_str(&content).map_err(|e| {
            BridgeError::config(format!("Failed to parse TOML config '{}': {}", path.display(), e))
        })?,
        Some("yaml") | Some("yml") => serde_yaml::from_str(&content).map_err(|e| {
            BridgeError::config(format!("Failed to parse YAML config '{}': {}", path.display(), e))
        })?,
        _ => serde_json::from_str(&content).map_err(|e| {
            BridgeError::config(format!("Failed to parse JSON config '{}': {}", path.display(), e))
        })?,
    };

    Ok(config)
}
