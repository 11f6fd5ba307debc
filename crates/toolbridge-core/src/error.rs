//! Service-level error types

use thiserror::Error;

use crate::domain::{ExecutionId, ServerId, TransitionError};
use crate::mcp::McpError;
use crate::store::StoreError;

/// Result type alias for toolbridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Errors surfaced by the pool and the orchestrator
#[derive(Error, Debug, Clone)]
pub enum BridgeError {
    /// Carrier or handshake failure
    #[error("Connection error{}: {message}", server_suffix(.server_id))]
    Connection {
        server_id: Option<ServerId>,
        message: String,
    },

    /// Malformed input, rejected before any I/O
    #[error("Validation error: {0}")]
    Validation(String),

    /// Tool-level failure, already recorded on the execution
    #[error("Execution {execution_id} failed: {message}")]
    Execution {
        execution_id: ExecutionId,
        code: Option<i32>,
        message: String,
    },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Peer returned something this client cannot interpret
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

fn server_suffix(server_id: &Option<ServerId>) -> String {
    server_id
        .map(|id| format!(" for server {}", id))
        .unwrap_or_default()
}

impl BridgeError {
    pub fn connection(server_id: Option<ServerId>, message: impl Into<String>) -> Self {
        Self::Connection {
            server_id,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn server_not_found(id: ServerId) -> Self {
        Self::NotFound {
            entity: "Server",
            id: id.to_string(),
        }
    }

    pub fn execution_not_found(id: ExecutionId) -> Self {
        Self::NotFound {
            entity: "Execution",
            id: id.to_string(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Classify a protocol-layer error raised while talking to a server
    pub fn from_mcp(server_id: ServerId, err: McpError) -> Self {
        if err.is_connection_failure() || matches!(err, McpError::Timeout { .. }) {
            Self::connection(Some(server_id), err.to_string())
        } else {
            Self::Protocol(err.to_string())
        }
    }

    /// Stable machine-readable code
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Connection { .. } => "CONNECTION_ERROR",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Execution { .. } => "EXECUTION_ERROR",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::AlreadyExists(_) => "ALREADY_EXISTS",
            Self::Protocol(_) => "PROTOCOL_ERROR",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<StoreError> for BridgeError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => Self::NotFound { entity, id },
            StoreError::Conflict(message) => Self::AlreadyExists(message),
            other => Self::Storage(other.to_string()),
        }
    }
}

impl From<TransitionError> for BridgeError {
    fn from(err: TransitionError) -> Self {
        Self::Storage(err.to_string())
    }
}
