//! MCP protocol message types
//!
//! JSON-RPC 2.0 envelopes exchanged with tool servers, plus the inbound
//! classification used by the correlation layer.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Protocol version advertised during the handshake
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

pub const JSONRPC_VERSION: &str = "2.0";

fn jsonrpc_version() -> String {
    JSONRPC_VERSION.to_string()
}

/// Correlation id; servers echo whichever form the client sent
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    String(String),
    Number(i64),
}

impl From<String> for RequestId {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<i64> for RequestId {
    fn from(value: i64) -> Self {
        Self::Number(value)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(id) => f.write_str(id),
            Self::Number(id) => write!(f, "{}", id),
        }
    }
}

/// Outbound request.
///
/// The id stays empty until a transport assigns one, unless the caller
/// pinned it with [`with_id`](Self::with_id).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpRequest {
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl McpRequest {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            id: None,
            method: method.into(),
            params: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<RequestId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }
}

/// Reply to a request; exactly one of `result` and `error` is set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpResponse {
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,
    pub id: RequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<McpRpcError>,
}

impl McpResponse {
    pub fn success(id: impl Into<RequestId>, result: Value) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            id: id.into(),
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: impl Into<RequestId>, error: McpRpcError) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            id: id.into(),
            result: None,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// The result payload, or the error object. A missing result reads as `null`.
    pub fn into_result(self) -> Result<Value, McpRpcError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result.unwrap_or_default()),
        }
    }
}

/// JSON-RPC error object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl McpRpcError {
    pub const PARSE_ERROR: i32 = -32700;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;

    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn parse_error() -> Self {
        Self::new(Self::PARSE_ERROR, "Parse error")
    }

    pub fn method_not_found() -> Self {
        Self::new(Self::METHOD_NOT_FOUND, "Method not found")
    }

    pub fn invalid_params() -> Self {
        Self::new(Self::INVALID_PARAMS, "Invalid params")
    }
}

impl fmt::Display for McpRpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for McpRpcError {}

/// Outbound notification; never answered
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpNotification {
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl McpNotification {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            method: method.into(),
            params: None,
        }
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }
}

/// A message received with a null or missing id.
///
/// Servers use these for progress and log messages, and some report
/// unparseable input as an error object with `id: null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundNotification {
    /// Method name, when the message is a proper notification
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Parameters or result payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Error object carried with a null id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<McpRpcError>,
}

/// Classification of one inbound JSON-RPC value
#[derive(Debug, Clone)]
pub enum InboundMessage {
    /// Response to a pending request
    Response(McpResponse),
    /// Null-id message
    Notification(InboundNotification),
    /// Server-initiated request, which this client does not serve
    Request { id: RequestId, method: String },
}

impl InboundMessage {
    /// Classify a parsed JSON value.
    ///
    /// A missing or null `id` always means notification, whatever else the
    /// message carries.
    pub fn classify(value: Value) -> Result<Self, serde_json::Error> {
        let id_is_null = value.get("id").is_none_or(Value::is_null);
        if id_is_null {
            return serde_json::from_value(value).map(Self::Notification);
        }

        if let Some(method) = value.get("method").and_then(Value::as_str) {
            let method = method.to_string();
            let id: RequestId = serde_json::from_value(value["id"].clone())?;
            return Ok(Self::Request { id, method });
        }

        serde_json::from_value(value).map(Self::Response)
    }
}

/// Method names this client sends
pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    /// Sent once the handshake result has been accepted
    pub const INITIALIZED: &str = "notifications/initialized";
    pub const TOOLS_LIST: &str = "tools/list";
    pub const TOOLS_CALL: &str = "tools/call";
    pub const PING: &str = "ping";
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_serialization() {
        let req = McpRequest::new("tools/list").with_id(1i64);
        let json = serde_json::to_string(&req).unwrap();

        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"method\":\"tools/list\""));
        assert!(json.contains("\"id\":1"));
    }

    #[test]
    fn test_request_without_id_omits_field() {
        let req = McpRequest::new("ping");
        let json = serde_json::to_string(&req).unwrap();
        assert!(!json.contains("\"id\""));
    }

    #[test]
    fn test_response_error() {
        let res = McpResponse::error(1i64, McpRpcError::method_not_found());

        assert!(!res.is_success());
        let err = res.into_result().unwrap_err();
        assert_eq!(err.code, -32601);
    }

    #[test]
    fn test_classify_response() {
        let msg = InboundMessage::classify(json!({
            "jsonrpc": "2.0", "id": 7, "result": {"tools": []}
        }))
        .unwrap();
        match msg {
            InboundMessage::Response(res) => assert_eq!(res.id, RequestId::Number(7)),
            other => panic!("unexpected classification: {:?}", other),
        }
    }

    #[test]
    fn test_classify_null_id_is_notification() {
        let msg = InboundMessage::classify(json!({
            "jsonrpc": "2.0", "id": null, "error": {"code": -32700, "message": "Parse error"}
        }))
        .unwrap();
        match msg {
            InboundMessage::Notification(n) => {
                assert!(n.method.is_none());
                assert_eq!(n.error.unwrap().code, -32700);
            }
            other => panic!("unexpected classification: {:?}", other),
        }

        let msg = InboundMessage::classify(json!({
            "jsonrpc": "2.0", "method": "notifications/progress", "params": {"progress": 1}
        }))
        .unwrap();
        assert!(matches!(
            msg,
            InboundMessage::Notification(InboundNotification { method: Some(ref m), .. }) if m == "notifications/progress"
        ));
    }

    #[test]
    fn test_classify_server_request() {
        let msg = InboundMessage::classify(json!({
            "jsonrpc": "2.0", "id": "srv-1", "method": "roots/list"
        }))
        .unwrap();
        assert!(matches!(msg, InboundMessage::Request { ref method, .. } if method == "roots/list"));
    }
}
