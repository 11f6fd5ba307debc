//! In-process store implementations

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;

use super::{ExecutionStore, ServerStore, StoreError, StoreResult, ToolStore};
use crate::domain::{
    ConnectionStatus, Execution, ExecutionFailure, ExecutionFilter, ExecutionId, ServerDescriptor,
    ServerId, ToolDescriptor,
};
use crate::mcp::types::InitializeResult;

fn not_found(entity: &'static str, id: impl ToString) -> StoreError {
    StoreError::NotFound {
        entity,
        id: id.to_string(),
    }
}

/// Servers keyed by id, names unique
#[derive(Debug, Default)]
pub struct InMemoryServerStore {
    servers: RwLock<HashMap<ServerId, ServerDescriptor>>,
}

impl InMemoryServerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn name_taken(servers: &HashMap<ServerId, ServerDescriptor>, name: &str, except: ServerId) -> bool {
        servers
            .values()
            .any(|s| s.id != except && s.name.eq_ignore_ascii_case(name))
    }
}

#[async_trait]
impl ServerStore for InMemoryServerStore {
    async fn find_by_id(&self, id: ServerId) -> StoreResult<Option<ServerDescriptor>> {
        Ok(self.servers.read().get(&id).cloned())
    }

    async fn find_by_name(&self, name: &str) -> StoreResult<Option<ServerDescriptor>> {
        Ok(self
            .servers
            .read()
            .values()
            .find(|s| s.name.eq_ignore_ascii_case(name))
            .cloned())
    }

    async fn list(&self) -> StoreResult<Vec<ServerDescriptor>> {
        let mut servers: Vec<_> = self.servers.read().values().cloned().collect();
        servers.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.name.cmp(&b.name)));
        Ok(servers)
    }

    async fn create(&self, server: ServerDescriptor) -> StoreResult<ServerDescriptor> {
        let mut servers = self.servers.write();
        if servers.contains_key(&server.id) {
            return Err(StoreError::Conflict(format!("server id {}", server.id)));
        }
        if Self::name_taken(&servers, &server.name, server.id) {
            return Err(StoreError::Conflict(format!("server name '{}'", server.name)));
        }
        servers.insert(server.id, server.clone());
        Ok(server)
    }

    async fn update(&self, mut server: ServerDescriptor) -> StoreResult<ServerDescriptor> {
        let mut servers = self.servers.write();
        if !servers.contains_key(&server.id) {
            return Err(not_found("Server", server.id));
        }
        if Self::name_taken(&servers, &server.name, server.id) {
            return Err(StoreError::Conflict(format!("server name '{}'", server.name)));
        }
        server.updated_at = Utc::now();
        servers.insert(server.id, server.clone());
        Ok(server)
    }

    async fn update_connection_status(
        &self,
        id: ServerId,
        status: ConnectionStatus,
        server_info: Option<InitializeResult>,
        error_message: Option<String>,
    ) -> StoreResult<()> {
        let mut servers = self.servers.write();
        let server = servers.get_mut(&id).ok_or_else(|| not_found("Server", id))?;
        server.apply_connection_status(status, server_info, error_message);
        Ok(())
    }

    async fn delete(&self, id: ServerId) -> StoreResult<bool> {
        Ok(self.servers.write().remove(&id).is_some())
    }
}

/// Tools grouped by server
#[derive(Debug, Default)]
pub struct InMemoryToolStore {
    tools: RwLock<HashMap<ServerId, Vec<ToolDescriptor>>>,
}

impl InMemoryToolStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ToolStore for InMemoryToolStore {
    async fn find_by_server_id(&self, server_id: ServerId) -> StoreResult<Vec<ToolDescriptor>> {
        Ok(self
            .tools
            .read()
            .get(&server_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn sync_tools(
        &self,
        server_id: ServerId,
        tools: Vec<ToolDescriptor>,
    ) -> StoreResult<Vec<ToolDescriptor>> {
        let mut seen = std::collections::HashSet::new();
        for tool in &tools {
            if tool.server_id != server_id {
                return Err(StoreError::InvalidState(format!(
                    "tool '{}' belongs to server {}",
                    tool.name, tool.server_id
                )));
            }
            if !seen.insert(tool.name.as_str()) {
                return Err(StoreError::Conflict(format!("duplicate tool name '{}'", tool.name)));
            }
        }

        self.tools.write().insert(server_id, tools.clone());
        Ok(tools)
    }

    async fn set_enabled(
        &self,
        server_id: ServerId,
        name: &str,
        enabled: bool,
    ) -> StoreResult<Option<ToolDescriptor>> {
        let mut tools = self.tools.write();
        let updated = tools
            .get_mut(&server_id)
            .and_then(|list| list.iter_mut().find(|t| t.name == name))
            .map(|tool| {
                tool.enabled = enabled;
                tool.clone()
            });
        Ok(updated)
    }

    async fn delete_by_server_id(&self, server_id: ServerId) -> StoreResult<usize> {
        Ok(self
            .tools
            .write()
            .remove(&server_id)
            .map(|list| list.len())
            .unwrap_or(0))
    }
}

/// Executions keyed by id
#[derive(Debug, Default)]
pub struct InMemoryExecutionStore {
    executions: RwLock<HashMap<ExecutionId, Execution>>,
}

impl InMemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn modify(
        &self,
        id: ExecutionId,
        apply: impl FnOnce(&mut Execution) -> Result<(), crate::domain::TransitionError>,
    ) -> StoreResult<Execution> {
        let mut executions = self.executions.write();
        let execution = executions
            .get_mut(&id)
            .ok_or_else(|| not_found("Execution", id))?;
        apply(execution)?;
        Ok(execution.clone())
    }
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn create(&self, execution: Execution) -> StoreResult<Execution> {
        let mut executions = self.executions.write();
        if executions.contains_key(&execution.id) {
            return Err(StoreError::Conflict(format!("execution id {}", execution.id)));
        }
        executions.insert(execution.id, execution.clone());
        Ok(execution)
    }

    async fn mark_started(&self, id: ExecutionId, at: DateTime<Utc>) -> StoreResult<Execution> {
        self.modify(id, |e| e.start(at))
    }

    async fn mark_completed(
        &self,
        id: ExecutionId,
        result: Value,
        at: DateTime<Utc>,
    ) -> StoreResult<Execution> {
        self.modify(id, |e| e.complete(result, at))
    }

    async fn mark_failed(
        &self,
        id: ExecutionId,
        failure: ExecutionFailure,
        at: DateTime<Utc>,
    ) -> StoreResult<Execution> {
        self.modify(id, |e| e.fail(failure, at))
    }

    async fn find_by_id(&self, id: ExecutionId) -> StoreResult<Option<Execution>> {
        Ok(self.executions.read().get(&id).cloned())
    }

    async fn find_many(&self, filter: ExecutionFilter) -> StoreResult<Vec<Execution>> {
        let mut matching: Vec<Execution> = self
            .executions
            .read()
            .values()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = filter.limit {
            matching.truncate(limit);
        }
        Ok(matching)
    }
}
