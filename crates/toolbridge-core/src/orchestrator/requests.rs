//! Request and report types of the orchestrator API

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

use crate::domain::{ServerDescriptor, ServerId, ServerStatus, TransportConfig};
use crate::mcp::types::InitializeResult;
use crate::pool::ConnectionSnapshot;

/// Register a new server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterServerRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub transport: TransportConfig,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl RegisterServerRequest {
    pub fn new(name: impl Into<String>, transport: TransportConfig) -> Self {
        Self {
            name: name.into(),
            description: None,
            transport,
            metadata: Map::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Partial update; `None` leaves a field untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateServerRequest {
    #[serde(default)]
    pub name: Option<String>,
    /// An empty string clears the description
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub transport: Option<TransportConfig>,
    #[serde(default)]
    pub status: Option<ServerStatus>,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

/// Invoke one tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteToolRequest {
    pub server_id: ServerId,
    #[serde(alias = "method")]
    pub tool_name: String,
    #[serde(default, alias = "params")]
    pub arguments: Value,
    /// Return the pending execution immediately and run in the background
    #[serde(default, rename = "async")]
    pub is_async: bool,
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
}

impl ExecuteToolRequest {
    pub fn new(server_id: ServerId, tool_name: impl Into<String>, arguments: Value) -> Self {
        Self {
            server_id,
            tool_name: tool_name.into(),
            arguments,
            is_async: false,
            timeout: None,
        }
    }

    pub fn asynchronous(mut self) -> Self {
        self.is_async = true;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Outcome of a connection test; carrier failures land here, not in `Err`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionTestResult {
    pub success: bool,
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    pub server_info: Option<InitializeResult>,
    pub error: Option<String>,
}

impl ConnectionTestResult {
    pub fn succeeded(duration: Duration, server_info: Option<InitializeResult>) -> Self {
        Self {
            success: true,
            duration,
            server_info,
            error: None,
        }
    }

    pub fn failed(duration: Duration, error: impl Into<String>) -> Self {
        Self {
            success: false,
            duration,
            server_info: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatusReport {
    pub server: ServerDescriptor,
    pub connection: Option<ConnectionSnapshot>,
    pub tool_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_execute_request_accepts_method_params_async() {
        let server_id = ServerId::new();
        let request: ExecuteToolRequest = serde_json::from_value(json!({
            "serverId": server_id,
            "method": "echo",
            "params": {"message": "hi"},
            "async": true,
            "timeout": "5s"
        }))
        .unwrap();

        assert_eq!(request.tool_name, "echo");
        assert_eq!(request.arguments, json!({"message": "hi"}));
        assert!(request.is_async);
        assert_eq!(request.timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_register_request_from_json() {
        let request: RegisterServerRequest = serde_json::from_value(json!({
            "name": "files",
            "transport": {"type": "stdio", "command": "mcp-files", "args": ["--root", "/srv"]}
        }))
        .unwrap();
        assert_eq!(request.name, "files");
        assert!(matches!(request.transport, TransportConfig::Stdio(_)));
    }
}
