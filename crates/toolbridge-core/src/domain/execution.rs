//! Tool execution records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::ids::{ExecutionId, ServerId};
use crate::mcp::types::McpToolResult;

/// Execution lifecycle: `pending -> running -> completed | failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Error payload recorded on a failed execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionFailure {
    /// JSON-RPC error code, when the server returned one
    #[serde(default)]
    pub code: Option<i32>,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

impl ExecutionFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_code(mut self, code: i32) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Illegal lifecycle transition
#[derive(Debug, Clone, Error, PartialEq)]
#[error("execution {id} cannot move from {from:?} to {to:?}")]
pub struct TransitionError {
    pub id: ExecutionId,
    pub from: ExecutionStatus,
    pub to: ExecutionStatus,
}

/// One invocation of a tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub id: ExecutionId,
    pub server_id: ServerId,
    pub tool_name: String,
    pub arguments: Value,
    pub status: ExecutionStatus,
    /// Raw `tools/call` result on completion
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<ExecutionFailure>,
    /// Whether the caller returned before completion
    #[serde(default)]
    pub is_async: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_ms: Option<i64>,
}

impl Execution {
    pub fn new(server_id: ServerId, tool_name: impl Into<String>, arguments: Value, is_async: bool) -> Self {
        Self {
            id: ExecutionId::new(),
            server_id,
            tool_name: tool_name.into(),
            arguments,
            status: ExecutionStatus::Pending,
            result: None,
            error: None,
            is_async,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            duration_ms: None,
        }
    }

    pub fn start(&mut self, at: DateTime<Utc>) -> Result<(), TransitionError> {
        self.check(ExecutionStatus::Pending, ExecutionStatus::Running)?;
        self.status = ExecutionStatus::Running;
        self.started_at = Some(at);
        Ok(())
    }

    pub fn complete(&mut self, result: Value, at: DateTime<Utc>) -> Result<(), TransitionError> {
        self.check(ExecutionStatus::Running, ExecutionStatus::Completed)?;
        self.status = ExecutionStatus::Completed;
        self.result = Some(result);
        self.finish(at);
        Ok(())
    }

    /// Failure is accepted from `pending` as well, for calls that never started.
    pub fn fail(&mut self, failure: ExecutionFailure, at: DateTime<Utc>) -> Result<(), TransitionError> {
        if self.status.is_terminal() {
            return Err(self.transition_error(ExecutionStatus::Failed));
        }
        self.status = ExecutionStatus::Failed;
        self.error = Some(failure);
        self.finish(at);
        Ok(())
    }

    /// Text content of a completed result, newline joined
    pub fn result_text(&self) -> Option<String> {
        let result = self.result.clone()?;
        serde_json::from_value::<McpToolResult>(result)
            .ok()
            .map(|r| r.text())
    }

    fn finish(&mut self, at: DateTime<Utc>) {
        let began = self.started_at.unwrap_or(self.created_at);
        self.completed_at = Some(at);
        self.duration_ms = Some((at - began).num_milliseconds().max(0));
    }

    fn check(&self, expected: ExecutionStatus, to: ExecutionStatus) -> Result<(), TransitionError> {
        if self.status == expected {
            Ok(())
        } else {
            Err(self.transition_error(to))
        }
    }

    fn transition_error(&self, to: ExecutionStatus) -> TransitionError {
        TransitionError {
            id: self.id,
            from: self.status,
            to,
        }
    }
}

/// Query filter for execution listings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionFilter {
    #[serde(default)]
    pub server_id: Option<ServerId>,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub status: Option<ExecutionStatus>,
    /// Maximum number of records, newest first
    #[serde(default)]
    pub limit: Option<usize>,
}

impl ExecutionFilter {
    pub fn for_server(server_id: ServerId) -> Self {
        Self {
            server_id: Some(server_id),
            ..Default::default()
        }
    }

    pub fn matches(&self, execution: &Execution) -> bool {
        self.server_id.is_none_or(|id| id == execution.server_id)
            && self
                .tool_name
                .as_deref()
                .is_none_or(|name| name == execution.tool_name)
            && self.status.is_none_or(|status| status == execution.status)
    }
}
