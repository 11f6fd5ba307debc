//! MCP transport layer
//!
//! A [`Transport`] is one connection to one tool server. Every variant shares
//! the same correlation machinery ([`SessionTransport`]) and differs only in
//! its [`Carrier`], the piece that moves raw frames over a process pipe, an
//! SSH channel, an HTTP endpoint or a WebSocket.

pub mod docker;
pub mod factory;
pub mod framing;
pub mod http;
pub mod session;
pub mod ssh;
pub mod stdio;
pub mod websocket;

pub use docker::docker_process_spec;
pub use factory::{DefaultTransportFactory, TransportFactory};
pub use framing::LineBuffer;
pub use http::HttpCarrier;
pub use session::{InboundSink, SessionTransport};
pub use ssh::SshCarrier;
pub use stdio::{ProcessCarrier, ProcessSpec};
pub use websocket::WebSocketCarrier;

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::{broadcast, watch};

use crate::domain::{ConnectionStatus, TransportKind};
use crate::mcp::error::McpError;
use crate::mcp::protocol::{InboundNotification, McpNotification, McpRequest, McpResponse};
use crate::mcp::types::{ClientInfo, InitializeResult};

/// Request/response connection to a single tool server.
///
/// Status moves `disconnected -> connecting -> connected`, then to
/// `disconnected` on a clean close or `error` on carrier failure. Both end
/// states are final for the instance.
#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Open the carrier and run the `initialize` handshake
    async fn connect(&self) -> Result<InitializeResult, McpError>;

    /// Close the carrier and reject every pending request
    async fn disconnect(&self) -> Result<(), McpError>;

    /// Send a request with the configured default timeout
    async fn send(&self, request: McpRequest) -> Result<McpResponse, McpError>;

    async fn send_with_timeout(
        &self,
        request: McpRequest,
        timeout: Duration,
    ) -> Result<McpResponse, McpError>;

    /// Fire-and-forget notification
    async fn notify(&self, notification: McpNotification) -> Result<(), McpError>;

    fn status(&self) -> ConnectionStatus;

    /// Handshake result, once connected
    fn server_info(&self) -> Option<InitializeResult>;

    /// Status change feed
    fn watch_status(&self) -> watch::Receiver<ConnectionStatus>;

    /// Null-id messages received from the server
    fn notifications(&self) -> broadcast::Receiver<InboundNotification>;

    /// Send `method` and unwrap the JSON-RPC result
    async fn call(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        let mut request = McpRequest::new(method);
        request.params = params;
        let response = self.send(request).await?;
        response.into_result().map_err(McpError::from)
    }
}

/// Byte-level half of a transport.
///
/// Carriers push inbound data into the [`InboundSink`] handed to `open` and
/// report closure or failure through it.
#[async_trait]
pub trait Carrier: Send + Sync + 'static {
    /// Short human-readable target, for logs
    fn describe(&self) -> String;

    async fn open(&self, sink: InboundSink) -> Result<(), McpError>;

    /// Write one serialized message.
    ///
    /// Returns messages the carrier received in direct reply (plain HTTP);
    /// streaming carriers deliver replies through the sink and return none.
    async fn send_raw(&self, frame: String) -> Result<Vec<String>, McpError>;

    /// Release the carrier. Must tolerate repeated calls.
    async fn close(&self) -> Result<(), McpError>;
}

/// Settings shared by every transport instance
#[derive(Debug, Clone)]
pub struct TransportOptions {
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub max_line_bytes: usize,
    pub notification_capacity: usize,
    pub client_info: ClientInfo,
    pub docker_binary: String,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            max_line_bytes: framing::DEFAULT_MAX_LINE_BYTES,
            notification_capacity: 64,
            client_info: ClientInfo::default(),
            docker_binary: "docker".to_string(),
        }
    }
}
