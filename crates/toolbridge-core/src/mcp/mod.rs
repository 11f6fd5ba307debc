//! Model Context Protocol client plumbing
//!
//! Wire types, protocol errors and the transports that carry them.

pub mod error;
pub mod protocol;
pub mod transport;
pub mod types;

pub use error::McpError;
pub use protocol::{
    InboundMessage, InboundNotification, MCP_PROTOCOL_VERSION, McpNotification, McpRequest,
    McpResponse, McpRpcError, RequestId, methods,
};
pub use transport::{
    Carrier, DefaultTransportFactory, InboundSink, SessionTransport, Transport, TransportFactory,
    TransportOptions,
};
pub use types::{ClientInfo, InitializeResult, McpContent, McpServerInfo, McpTool, McpToolResult};
