//! Toolbridge Core Library
//!
//! Client side of the Model Context Protocol for a control plane: four
//! transports (process, SSH, HTTP/WebSocket, container) behind one
//! request/response contract, a connection pool with idle eviction and
//! backoff reconnects, and an orchestrator that registers servers, discovers
//! tools and runs tool calls.

pub mod config;
pub mod domain;
pub mod error;
pub mod events;
pub mod logging;
pub mod mcp;
pub mod orchestrator;
pub mod pool;
pub mod store;

// Re-export commonly used types
pub use config::{BridgeConfig, ExecutionConfig, LogFormat, LoggingConfig, PoolConfig, TransportDefaults};
pub use domain::{
    ConnectionStatus, Execution, ExecutionFailure, ExecutionFilter, ExecutionId, ExecutionStatus,
    ServerDescriptor, ServerId, ServerStatus, ToolDescriptor, TransportConfig, TransportKind,
};
pub use error::{BridgeError, BridgeResult};
pub use events::{BridgeEvent, CloseReason, EventBus};
pub use mcp::{McpError, Transport, TransportFactory};
pub use orchestrator::{
    ConnectionTestResult, ExecuteToolRequest, ExecutionOrchestrator, RegisterServerRequest,
    ServerStatusReport, UpdateServerRequest,
};
pub use pool::{ConnectionPool, ConnectionSnapshot};
pub use store::{ExecutionStore, ServerStore, StoreError, ToolStore};
