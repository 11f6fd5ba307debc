//! Registered server records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use super::ids::ServerId;
use super::transport::{TransportConfig, TransportKind};
use crate::mcp::types::InitializeResult;

/// Administrative lifecycle of a server record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    #[default]
    Active,
    Inactive,
    Error,
}

/// Connection state, shared by persisted records and live transports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered tool server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerDescriptor {
    pub id: ServerId,
    /// Unique across all servers
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub transport: TransportConfig,
    #[serde(default)]
    pub status: ServerStatus,
    #[serde(default)]
    pub connection_status: ConnectionStatus,
    /// Handshake result from the last successful connection
    #[serde(default)]
    pub server_info: Option<InitializeResult>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub last_connected_at: Option<DateTime<Utc>>,
}

impl ServerDescriptor {
    pub fn new(name: impl Into<String>, transport: TransportConfig) -> Self {
        let now = Utc::now();
        Self {
            id: ServerId::new(),
            name: name.into(),
            description: None,
            transport,
            status: ServerStatus::Active,
            connection_status: ConnectionStatus::Disconnected,
            server_info: None,
            last_error: None,
            metadata: Map::new(),
            created_at: now,
            updated_at: now,
            last_connected_at: None,
        }
    }

    pub fn transport_kind(&self) -> TransportKind {
        self.transport.kind()
    }

    /// Apply a connection status report.
    ///
    /// `connected` clears the last error and reactivates an errored server;
    /// `error` records the message and flags the server.
    pub fn apply_connection_status(
        &mut self,
        status: ConnectionStatus,
        server_info: Option<InitializeResult>,
        error_message: Option<String>,
    ) {
        let now = Utc::now();
        self.connection_status = status;
        match status {
            ConnectionStatus::Connected => {
                if server_info.is_some() {
                    self.server_info = server_info;
                }
                self.last_error = None;
                self.last_connected_at = Some(now);
                if self.status == ServerStatus::Error {
                    self.status = ServerStatus::Active;
                }
            }
            ConnectionStatus::Error => {
                self.last_error = error_message;
                if self.status == ServerStatus::Active {
                    self.status = ServerStatus::Error;
                }
            }
            ConnectionStatus::Disconnected | ConnectionStatus::Connecting => {
                if error_message.is_some() {
                    self.last_error = error_message;
                }
            }
        }
        self.updated_at = now;
    }
}
