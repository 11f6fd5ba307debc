//! MCP error types

use std::time::Duration;
use thiserror::Error;

use super::protocol::McpRpcError;

/// Errors raised by transports and the correlation layer
#[derive(Debug, Error, Clone)]
pub enum McpError {
    /// Carrier could not be opened, or closed underneath a request
    #[error("Connection error: {message}")]
    Connection {
        message: String,
        context: Option<String>,
    },

    /// Peer violated the protocol
    #[error("Protocol error: {message}")]
    Protocol {
        message: String,
        context: Option<String>,
    },

    /// Carrier-level I/O failure
    #[error("Transport error: {message}")]
    Transport {
        message: String,
        context: Option<String>,
    },

    /// JSON-RPC error object returned by the server
    #[error("Server error {code}: {message}")]
    Server {
        code: i32,
        message: String,
        data: Option<serde_json::Value>,
    },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Request timeout after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// Non-2xx reply from an HTTP endpoint; only the request it answered fails
    #[error("HTTP error {status}: {body}")]
    HttpStatus { status: u16, body: String },

    /// Transport is not in the connected state
    #[error("Transport not connected")]
    NotConnected,

    /// A single inbound line exceeded the buffer bound
    #[error("Inbound line exceeds {limit} bytes")]
    FrameTooLarge { limit: usize },
}

impl McpError {
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            context: None,
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
            context: None,
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            context: None,
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    pub fn timeout(after: Duration) -> Self {
        Self::Timeout {
            timeout_ms: after.as_millis() as u64,
        }
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Add context to connection, protocol and transport errors
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        let ctx = Some(context.into());
        match &mut self {
            Self::Connection { context: c, .. } => *c = ctx,
            Self::Protocol { context: c, .. } => *c = ctx,
            Self::Transport { context: c, .. } => *c = ctx,
            _ => {}
        }
        self
    }

    /// Stable machine-readable code
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Connection { .. } => "MCP_CONNECTION",
            Self::Protocol { .. } => "MCP_PROTOCOL",
            Self::Transport { .. } => "MCP_TRANSPORT",
            Self::Server { .. } => "MCP_SERVER",
            Self::InvalidRequest { .. } => "MCP_INVALID_REQUEST",
            Self::Timeout { .. } => "MCP_TIMEOUT",
            Self::Serialization { .. } => "MCP_SERIALIZATION",
            Self::HttpStatus { .. } => "MCP_HTTP_STATUS",
            Self::NotConnected => "MCP_NOT_CONNECTED",
            Self::FrameTooLarge { .. } => "MCP_FRAME_TOO_LARGE",
        }
    }

    /// Whether the failure concerns the carrier rather than the request
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::Transport { .. }
                | Self::NotConnected
                | Self::FrameTooLarge { .. }
        )
    }

    /// Whether repeating the request on a fresh connection could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::Transport { .. } | Self::Timeout { .. } | Self::NotConnected
        ) || matches!(self, Self::HttpStatus { status, .. } if *status >= 500)
    }
}

impl From<McpRpcError> for McpError {
    fn from(err: McpRpcError) -> Self {
        Self::Server {
            code: err.code,
            message: err.message,
            data: err.data,
        }
    }
}

impl From<serde_json::Error> for McpError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

impl From<std::io::Error> for McpError {
    fn from(err: std::io::Error) -> Self {
        Self::transport(err.to_string())
    }
}
