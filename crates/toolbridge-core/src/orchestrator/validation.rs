//! Input validation, run before any I/O

use reqwest::Url;
use serde_json::Value;

use crate::domain::{DockerConfig, HttpConfig, SshAuth, SshConfig, StdioConfig, TransportConfig};
use crate::error::{BridgeError, BridgeResult};

const MAX_NAME_LEN: usize = 128;

pub fn validate_server_name(name: &str) -> BridgeResult<()> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(BridgeError::validation("server name must not be empty"));
    }
    if trimmed.chars().count() > MAX_NAME_LEN {
        return Err(BridgeError::validation(format!(
            "server name must be at most {} characters",
            MAX_NAME_LEN
        )));
    }
    if trimmed.chars().any(char::is_control) {
        return Err(BridgeError::validation("server name must not contain control characters"));
    }
    Ok(())
}

/// Check the fields the selected transport requires
pub fn validate_transport(config: &TransportConfig) -> BridgeResult<()> {
    match config {
        TransportConfig::Stdio(stdio) => validate_stdio(stdio),
        TransportConfig::Ssh(ssh) => validate_ssh(ssh),
        TransportConfig::Http(http) => validate_http(http),
        TransportConfig::Docker(docker) => validate_docker(docker),
    }
}

/// `tools/call` arguments must be a JSON object; null stands for none
pub fn validate_arguments(arguments: &Value) -> BridgeResult<()> {
    match arguments {
        Value::Object(_) | Value::Null => Ok(()),
        other => Err(BridgeError::validation(format!(
            "tool arguments must be a JSON object, got {}",
            json_type(other)
        ))),
    }
}

fn validate_stdio(config: &StdioConfig) -> BridgeResult<()> {
    require("stdio", "command", &config.command)
}

fn validate_ssh(config: &SshConfig) -> BridgeResult<()> {
    require("ssh", "host", &config.host)?;
    require("ssh", "username", &config.username)?;
    require("ssh", "command", &config.command)?;
    if config.port == 0 {
        return Err(BridgeError::validation("ssh transport requires a non-zero port"));
    }
    match &config.auth {
        SshAuth::Password { password } if password.is_empty() => Err(BridgeError::validation(
            "ssh transport requires a password or a private key",
        )),
        SshAuth::PrivateKey { private_key, .. } if private_key.trim().is_empty() => Err(
            BridgeError::validation("ssh transport requires a password or a private key"),
        ),
        _ => Ok(()),
    }
}

fn validate_http(config: &HttpConfig) -> BridgeResult<()> {
    require("http", "url", &config.url)?;
    let url = Url::parse(config.url.trim())
        .map_err(|e| BridgeError::validation(format!("invalid http url '{}': {}", config.url, e)))?;

    let allowed: &[&str] = if config.use_websocket {
        &["ws", "wss"]
    } else {
        &["http", "https"]
    };
    if !allowed.contains(&url.scheme()) {
        return Err(BridgeError::validation(format!(
            "url scheme '{}' is not valid for {} mode (expected {})",
            url.scheme(),
            if config.use_websocket { "websocket" } else { "http" },
            allowed.join(" or ")
        )));
    }
    Ok(())
}

fn validate_docker(config: &DockerConfig) -> BridgeResult<()> {
    require("docker", "image", &config.image)?;
    let has_command = config
        .command
        .as_deref()
        .is_some_and(|c| !c.trim().is_empty());
    if config.container.is_some() && !has_command {
        return Err(BridgeError::validation(
            "docker transport with a container requires a command",
        ));
    }
    if let Some(command) = config.command.as_deref() {
        shell_words::split(command).map_err(|e| {
            BridgeError::validation(format!("invalid docker command '{}': {}", command, e))
        })?;
    }
    Ok(())
}

fn require(kind: &str, field: &str, value: &str) -> BridgeResult<()> {
    if value.trim().is_empty() {
        Err(BridgeError::validation(format!(
            "{} transport requires a {}",
            kind, field
        )))
    } else {
        Ok(())
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
