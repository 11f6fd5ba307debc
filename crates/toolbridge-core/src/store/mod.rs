//! Persistence ports
//!
//! The pool and the orchestrator only see these traits. A relational
//! implementation lives outside this crate; [`memory`] provides an
//! in-process one.

pub mod memory;

pub use memory::{InMemoryExecutionStore, InMemoryServerStore, InMemoryToolStore};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

use crate::domain::{
    ConnectionStatus, Execution, ExecutionFailure, ExecutionFilter, ExecutionId, ServerDescriptor,
    ServerId, ToolDescriptor, TransitionError,
};
use crate::mcp::types::InitializeResult;

/// Store error types
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Constraint violation: {0}")]
    Conflict(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

impl From<TransitionError> for StoreError {
    fn from(err: TransitionError) -> Self {
        Self::InvalidState(err.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Server records
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ServerStore: Send + Sync {
    async fn find_by_id(&self, id: ServerId) -> StoreResult<Option<ServerDescriptor>>;

    async fn find_by_name(&self, name: &str) -> StoreResult<Option<ServerDescriptor>>;

    async fn list(&self) -> StoreResult<Vec<ServerDescriptor>>;

    /// Insert a new record; names are unique
    async fn create(&self, server: ServerDescriptor) -> StoreResult<ServerDescriptor>;

    async fn update(&self, server: ServerDescriptor) -> StoreResult<ServerDescriptor>;

    async fn update_connection_status(
        &self,
        id: ServerId,
        status: ConnectionStatus,
        server_info: Option<InitializeResult>,
        error_message: Option<String>,
    ) -> StoreResult<()>;

    /// Returns whether a record was removed
    async fn delete(&self, id: ServerId) -> StoreResult<bool>;
}

/// Tool records, replaced wholesale per server
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ToolStore: Send + Sync {
    async fn find_by_server_id(&self, server_id: ServerId) -> StoreResult<Vec<ToolDescriptor>>;

    /// Replace every tool of `server_id` with `tools`
    async fn sync_tools(
        &self,
        server_id: ServerId,
        tools: Vec<ToolDescriptor>,
    ) -> StoreResult<Vec<ToolDescriptor>>;

    async fn set_enabled(
        &self,
        server_id: ServerId,
        name: &str,
        enabled: bool,
    ) -> StoreResult<Option<ToolDescriptor>>;

    /// Returns the number of removed tools
    async fn delete_by_server_id(&self, server_id: ServerId) -> StoreResult<usize>;
}

/// Execution records
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn create(&self, execution: Execution) -> StoreResult<Execution>;

    async fn mark_started(&self, id: ExecutionId, at: DateTime<Utc>) -> StoreResult<Execution>;

    async fn mark_completed(
        &self,
        id: ExecutionId,
        result: Value,
        at: DateTime<Utc>,
    ) -> StoreResult<Execution>;

    async fn mark_failed(
        &self,
        id: ExecutionId,
        failure: ExecutionFailure,
        at: DateTime<Utc>,
    ) -> StoreResult<Execution>;

    async fn find_by_id(&self, id: ExecutionId) -> StoreResult<Option<Execution>>;

    /// Matching records, newest first
    async fn find_many(&self, filter: ExecutionFilter) -> StoreResult<Vec<Execution>>;
}
