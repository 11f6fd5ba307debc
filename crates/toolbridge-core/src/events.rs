//! Lifecycle event bus
//!
//! The pool and the orchestrator publish [`BridgeEvent`]s here; controllers and
//! event publishers subscribe. Events published before a subscriber attaches
//! are not replayed.

use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::domain::{ExecutionId, ServerId};
use crate::mcp::protocol::InboundNotification;
use crate::mcp::types::InitializeResult;

/// Why the pool closed a connection on its own initiative
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CloseReason {
    Idle,
    Removed,
    Shutdown,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Removed => "removed",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Events emitted by the pool and the orchestrator
#[derive(Debug, Clone)]
pub enum BridgeEvent {
    // ========== Connection Events ==========
    ServerConnected {
        server_id: ServerId,
        server_info: InitializeResult,
    },

    /// An established transport went away without being asked to
    ServerDisconnected {
        server_id: ServerId,
        reason: String,
    },

    ReconnectScheduled {
        server_id: ServerId,
        attempt: u32,
        delay: Duration,
    },

    /// Reconnect attempts exhausted; no further automatic retries
    ConnectionLost {
        server_id: ServerId,
        attempts: u32,
    },

    ConnectionClosed {
        server_id: ServerId,
        reason: CloseReason,
    },

    ServerNotification {
        server_id: ServerId,
        notification: InboundNotification,
    },

    // ========== Tool Events ==========
    ToolsDiscovered {
        server_id: ServerId,
        tools: Vec<String>,
    },

    // ========== Execution Events ==========
    ExecutionStarted {
        execution_id: ExecutionId,
        server_id: ServerId,
        tool_name: String,
    },

    ExecutionCompleted {
        execution_id: ExecutionId,
        server_id: ServerId,
        duration_ms: Option<i64>,
    },

    ExecutionFailed {
        execution_id: ExecutionId,
        server_id: ServerId,
        error: String,
    },
}

impl BridgeEvent {
    /// Get the event type name
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ServerConnected { .. } => "server_connected",
            Self::ServerDisconnected { .. } => "server_disconnected",
            Self::ReconnectScheduled { .. } => "reconnect_scheduled",
            Self::ConnectionLost { .. } => "connection_lost",
            Self::ConnectionClosed { .. } => "connection_closed",
            Self::ServerNotification { .. } => "server_notification",
            Self::ToolsDiscovered { .. } => "tools_discovered",
            Self::ExecutionStarted { .. } => "execution_started",
            Self::ExecutionCompleted { .. } => "execution_completed",
            Self::ExecutionFailed { .. } => "execution_failed",
        }
    }

    /// Server the event concerns
    pub fn server_id(&self) -> ServerId {
        match self {
            Self::ServerConnected { server_id, .. }
            | Self::ServerDisconnected { server_id, .. }
            | Self::ReconnectScheduled { server_id, .. }
            | Self::ConnectionLost { server_id, .. }
            | Self::ConnectionClosed { server_id, .. }
            | Self::ServerNotification { server_id, .. }
            | Self::ToolsDiscovered { server_id, .. }
            | Self::ExecutionStarted { server_id, .. }
            | Self::ExecutionCompleted { server_id, .. }
            | Self::ExecutionFailed { server_id, .. } => *server_id,
        }
    }

    /// JSON payload for external publishers
    pub fn to_json(&self) -> Value {
        let mut payload = match self {
            Self::ServerConnected { server_info, .. } => serde_json::json!({
                "serverName": server_info.server_info.name,
                "serverVersion": server_info.server_info.version,
                "protocolVersion": server_info.protocol_version,
            }),
            Self::ServerDisconnected { reason, .. } => serde_json::json!({ "reason": reason }),
            Self::ReconnectScheduled { attempt, delay, .. } => serde_json::json!({
                "attempt": attempt,
                "delayMs": delay.as_millis() as u64,
            }),
            Self::ConnectionLost { attempts, .. } => serde_json::json!({ "attempts": attempts }),
            Self::ConnectionClosed { reason, .. } => serde_json::json!({ "reason": reason }),
            Self::ServerNotification { notification, .. } => serde_json::json!({
                "method": notification.method,
                "params": notification.params,
            }),
            Self::ToolsDiscovered { tools, .. } => serde_json::json!({ "tools": tools }),
            Self::ExecutionStarted {
                execution_id,
                tool_name,
                ..
            } => serde_json::json!({
                "executionId": execution_id,
                "toolName": tool_name,
            }),
            Self::ExecutionCompleted {
                execution_id,
                duration_ms,
                ..
            } => serde_json::json!({
                "executionId": execution_id,
                "durationMs": duration_ms,
            }),
            Self::ExecutionFailed {
                execution_id, error, ..
            } => serde_json::json!({
                "executionId": execution_id,
                "error": error,
            }),
        };

        if let Value::Object(map) = &mut payload {
            map.insert("type".into(), Value::from(self.event_type()));
            map.insert("serverId".into(), Value::from(self.server_id().to_string()));
        }
        payload
    }
}

/// Broadcast bus for [`BridgeEvent`]s
///
/// Slow subscribers lose the oldest events once `capacity` is exceeded.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<BridgeEvent>,
    capacity: usize,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self { sender, capacity }
    }

    /// Returns the number of receivers the event reached
    pub fn publish(&self, event: BridgeEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
