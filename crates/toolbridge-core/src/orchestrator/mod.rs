//! Execution orchestrator
//!
//! Service-level API over the pool and the persistence ports: server
//! registration and maintenance, tool discovery, and tool execution in
//! synchronous or background mode.

pub mod requests;
pub mod validation;

pub use requests::{
    ConnectionTestResult, ExecuteToolRequest, RegisterServerRequest, ServerStatusReport,
    UpdateServerRequest,
};

use chrono::Utc;
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

use crate::config::{BridgeConfig, ExecutionConfig};
use crate::domain::{
    Execution, ExecutionFailure, ExecutionFilter, ExecutionId, ExecutionStatus, ServerDescriptor,
    ServerId, ServerStatus, ToolDescriptor,
};
use crate::error::{BridgeError, BridgeResult};
use crate::events::{BridgeEvent, EventBus};
use crate::mcp::protocol::{McpRequest, methods};
use crate::mcp::transport::{DefaultTransportFactory, TransportFactory};
use crate::mcp::types::{ListToolsResult, McpToolResult};
use crate::mcp::McpError;
use crate::pool::ConnectionPool;
use crate::store::{
    ExecutionStore, InMemoryExecutionStore, InMemoryServerStore, InMemoryToolStore, ServerStore,
    ToolStore,
};

/// Upper bound on `tools/list` pages followed in one discovery run
const MAX_DISCOVERY_PAGES: usize = 100;

/// Coordinates servers, tools and executions
#[derive(Clone)]
pub struct ExecutionOrchestrator {
    servers: Arc<dyn ServerStore>,
    tools: Arc<dyn ToolStore>,
    executions: Arc<dyn ExecutionStore>,
    pool: ConnectionPool,
    events: EventBus,
    config: ExecutionConfig,
}

impl ExecutionOrchestrator {
    pub fn new(
        servers: Arc<dyn ServerStore>,
        tools: Arc<dyn ToolStore>,
        executions: Arc<dyn ExecutionStore>,
        pool: ConnectionPool,
        config: ExecutionConfig,
    ) -> Self {
        let events = pool.events().clone();
        Self {
            servers,
            tools,
            executions,
            pool,
            events,
            config,
        }
    }

    /// In-process stores and the built-in transports
    pub fn in_memory(config: &BridgeConfig) -> Self {
        let factory = Arc::new(DefaultTransportFactory::new(config.transport_options()));
        Self::in_memory_with_factory(config, factory)
    }

    /// In-process stores and a caller-supplied transport factory
    pub fn in_memory_with_factory(config: &BridgeConfig, factory: Arc<dyn TransportFactory>) -> Self {
        let servers: Arc<dyn ServerStore> = Arc::new(InMemoryServerStore::new());
        let pool = ConnectionPool::new(
            Arc::clone(&servers),
            factory,
            config.pool.clone(),
            EventBus::default(),
        );
        Self::new(
            servers,
            Arc::new(InMemoryToolStore::new()),
            Arc::new(InMemoryExecutionStore::new()),
            pool,
            config.execution.clone(),
        )
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    // ========== Servers ==========

    /// Validate and persist a server, then connect and discover in the background.
    ///
    /// Connection failures after persistence do not fail registration.
    #[instrument(skip(self, request), fields(server = %request.name))]
    pub async fn register_server(&self, request: RegisterServerRequest) -> BridgeResult<ServerDescriptor> {
        validation::validate_server_name(&request.name)?;
        validation::validate_transport(&request.transport)?;

        let name = request.name.trim().to_string();
        if self.servers.find_by_name(&name).await?.is_some() {
            return Err(BridgeError::AlreadyExists(format!("server name '{}'", name)));
        }

        let mut server = ServerDescriptor::new(name, request.transport);
        server.description = request.description.filter(|d| !d.trim().is_empty());
        server.metadata = request.metadata;
        let server = self.servers.create(server).await?;
        info!(server_id = %server.id, kind = %server.transport_kind(), "server registered");

        if self.config.discover_on_register {
            self.spawn_initial_discovery(server.id);
        }
        Ok(server)
    }

    fn spawn_initial_discovery(&self, server_id: ServerId) {
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(e) = this.pool.get_connection(server_id).await {
                warn!(server_id = %server_id, error = %e, "initial connection failed");
                return;
            }
            if let Err(e) = this.discover_tools(server_id).await {
                warn!(server_id = %server_id, error = %e, "initial tool discovery failed");
            }
        });
    }

    /// Apply a partial update. A new transport or `inactive` status drops the
    /// live connection.
    #[instrument(skip(self, request), fields(server_id = %server_id))]
    pub async fn update_server(
        &self,
        server_id: ServerId,
        request: UpdateServerRequest,
    ) -> BridgeResult<ServerDescriptor> {
        let mut server = self.require_server(server_id).await?;
        let mut drop_connection = false;

        if let Some(name) = request.name {
            validation::validate_server_name(&name)?;
            let name = name.trim().to_string();
            if let Some(existing) = self.servers.find_by_name(&name).await? {
                if existing.id != server_id {
                    return Err(BridgeError::AlreadyExists(format!("server name '{}'", name)));
                }
            }
            server.name = name;
        }
        if let Some(description) = request.description {
            server.description = Some(description).filter(|d| !d.trim().is_empty());
        }
        if let Some(metadata) = request.metadata {
            server.metadata = metadata;
        }
        if let Some(transport) = request.transport {
            validation::validate_transport(&transport)?;
            if transport != server.transport {
                server.transport = transport;
                drop_connection = true;
            }
        }
        if let Some(status) = request.status {
            if status == ServerStatus::Inactive && server.status != ServerStatus::Inactive {
                drop_connection = true;
            }
            server.status = status;
        }

        let updated = self.servers.update(server).await?;
        if drop_connection {
            self.pool.remove(server_id).await;
        }
        info!(dropped_connection = drop_connection, "server updated");
        Ok(updated)
    }

    /// Remove records now; disconnect in the background
    #[instrument(skip(self), fields(server_id = %server_id))]
    pub async fn delete_server(&self, server_id: ServerId) -> BridgeResult<()> {
        self.require_server(server_id).await?;
        // Server first: a discovery that syncs after this point sees it gone
        self.servers.delete(server_id).await?;
        let removed_tools = self.tools.delete_by_server_id(server_id).await?;
        info!(removed_tools, "server deleted");

        let pool = self.pool.clone();
        tokio::spawn(async move {
            pool.remove(server_id).await;
        });
        Ok(())
    }

    /// Acquire a connection and ping it.
    ///
    /// Carrier-level failures are reported in the result. A JSON-RPC error
    /// reply to `ping` still proves the server is reachable.
    #[instrument(skip(self), fields(server_id = %server_id))]
    pub async fn test_connection(&self, server_id: ServerId) -> BridgeResult<ConnectionTestResult> {
        self.require_server(server_id).await?;
        let started = Instant::now();

        let transport = match self.pool.get_connection(server_id).await {
            Ok(transport) => transport,
            Err(e) if e.is_not_found() => return Err(e),
            Err(e) => return Ok(ConnectionTestResult::failed(started.elapsed(), e.to_string())),
        };

        match transport.call(methods::PING, None).await {
            Ok(_) | Err(McpError::Server { .. }) => Ok(ConnectionTestResult::succeeded(
                started.elapsed(),
                transport.server_info(),
            )),
            Err(e) => Ok(ConnectionTestResult::failed(started.elapsed(), e.to_string())),
        }
    }

    // ========== Tools ==========

    /// Run `tools/list` and replace the stored tool set
    #[instrument(skip(self), fields(server_id = %server_id))]
    pub async fn discover_tools(&self, server_id: ServerId) -> BridgeResult<Vec<ToolDescriptor>> {
        let transport = self.pool.get_connection(server_id).await?;

        let mut listed = Vec::new();
        let mut cursor: Option<String> = None;
        let mut seen_cursors = HashSet::new();
        for _ in 0..MAX_DISCOVERY_PAGES {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let result = transport
                .call(methods::TOOLS_LIST, params)
                .await
                .map_err(|e| BridgeError::from_mcp(server_id, e))?;
            let page: ListToolsResult = serde_json::from_value(result)
                .map_err(|e| BridgeError::Protocol(format!("invalid tools/list result: {}", e)))?;
            listed.extend(page.tools);

            match page.next_cursor.filter(|c| !c.is_empty()) {
                Some(next) if seen_cursors.insert(next.clone()) => cursor = Some(next),
                Some(next) => {
                    warn!(cursor = %next, "tools/list repeated a cursor; stopping pagination");
                    break;
                }
                None => break,
            }
        }

        let previous = self.tools.find_by_server_id(server_id).await?;
        let version = previous.iter().map(|t| t.version).max().unwrap_or(0) + 1;
        let enabled: HashMap<&str, bool> = previous
            .iter()
            .map(|t| (t.name.as_str(), t.enabled))
            .collect();

        let mut names = HashSet::new();
        let mut descriptors = Vec::with_capacity(listed.len());
        for tool in listed {
            if !names.insert(tool.name.clone()) {
                warn!(tool = %tool.name, "duplicate tool name in listing; keeping the first");
                continue;
            }
            let mut descriptor = ToolDescriptor::from_listing(server_id, tool, version);
            if let Some(&was_enabled) = enabled.get(descriptor.name.as_str()) {
                descriptor.enabled = was_enabled;
            }
            descriptors.push(descriptor);
        }

        let stored = self.tools.sync_tools(server_id, descriptors).await?;
        if self.servers.find_by_id(server_id).await?.is_none() {
            let dropped = self.tools.delete_by_server_id(server_id).await?;
            debug!(dropped, "server deleted during discovery; tools discarded");
            return Err(BridgeError::server_not_found(server_id));
        }
        info!(count = stored.len(), version, "tools discovered");
        self.events.publish(BridgeEvent::ToolsDiscovered {
            server_id,
            tools: stored.iter().map(|t| t.name.clone()).collect(),
        });
        Ok(stored)
    }

    pub async fn set_tool_enabled(
        &self,
        server_id: ServerId,
        tool_name: &str,
        enabled: bool,
    ) -> BridgeResult<ToolDescriptor> {
        self.tools
            .set_enabled(server_id, tool_name, enabled)
            .await?
            .ok_or_else(|| BridgeError::NotFound {
                entity: "Tool",
                id: format!("{}/{}", server_id, tool_name),
            })
    }

    // ========== Executions ==========

    /// Record and run one tool call.
    ///
    /// Synchronous calls return the finished execution, or an `Execution`
    /// error when it failed. Asynchronous calls return the pending record.
    #[instrument(skip(self, request), fields(server_id = %request.server_id, tool = %request.tool_name))]
    pub async fn execute_tool(&self, request: ExecuteToolRequest) -> BridgeResult<Execution> {
        validation::validate_arguments(&request.arguments)?;
        let server_id = request.server_id;

        let server = self.require_server(server_id).await?;
        if server.status == ServerStatus::Inactive {
            return Err(BridgeError::validation(format!(
                "server '{}' is inactive",
                server.name
            )));
        }

        let tools = self.tools.find_by_server_id(server_id).await?;
        let tool = tools
            .iter()
            .find(|t| t.name == request.tool_name)
            .ok_or_else(|| {
                BridgeError::validation(format!(
                    "tool '{}' is not available on server '{}'",
                    request.tool_name, server.name
                ))
            })?;
        if !tool.enabled {
            return Err(BridgeError::validation(format!(
                "tool '{}' is disabled on server '{}'",
                tool.name, server.name
            )));
        }

        let arguments = match request.arguments {
            Value::Null => json!({}),
            other => other,
        };
        let execution = self
            .executions
            .create(Execution::new(server_id, request.tool_name, arguments, request.is_async))
            .await?;
        let timeout = request.timeout.or(self.config.default_timeout);
        debug!(execution_id = %execution.id, is_async = request.is_async, "execution created");

        if request.is_async {
            let this = self.clone();
            let pending = execution.clone();
            tokio::spawn(async move {
                let execution_id = pending.id;
                if let Err(e) = this.run_execution(pending, timeout).await {
                    warn!(execution_id = %execution_id, error = %e, "background execution could not be recorded");
                }
            });
            return Ok(execution);
        }

        let finished = self.run_execution(execution, timeout).await?;
        match (&finished.status, &finished.error) {
            (ExecutionStatus::Failed, Some(failure)) => Err(BridgeError::Execution {
                execution_id: finished.id,
                code: failure.code,
                message: failure.message.clone(),
            }),
            _ => Ok(finished),
        }
    }

    async fn run_execution(&self, execution: Execution, timeout: Option<Duration>) -> BridgeResult<Execution> {
        let running = self.executions.mark_started(execution.id, Utc::now()).await?;
        self.events.publish(BridgeEvent::ExecutionStarted {
            execution_id: running.id,
            server_id: running.server_id,
            tool_name: running.tool_name.clone(),
        });

        let outcome = self
            .call_tool(
                running.server_id,
                &running.tool_name,
                running.arguments.clone(),
                timeout,
            )
            .await
            .and_then(Self::check_tool_result);

        let finished = match outcome {
            Ok(result) => {
                let done = self
                    .executions
                    .mark_completed(running.id, result, Utc::now())
                    .await?;
                info!(execution_id = %done.id, duration_ms = ?done.duration_ms, "execution completed");
                self.events.publish(BridgeEvent::ExecutionCompleted {
                    execution_id: done.id,
                    server_id: done.server_id,
                    duration_ms: done.duration_ms,
                });
                done
            }
            Err(failure) => {
                let message = failure.message.clone();
                let failed = self
                    .executions
                    .mark_failed(running.id, failure, Utc::now())
                    .await?;
                warn!(execution_id = %failed.id, error = %message, "execution failed");
                self.events.publish(BridgeEvent::ExecutionFailed {
                    execution_id: failed.id,
                    server_id: failed.server_id,
                    error: message,
                });
                failed
            }
        };
        Ok(finished)
    }

    async fn call_tool(
        &self,
        server_id: ServerId,
        tool_name: &str,
        arguments: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, ExecutionFailure> {
        let transport = self
            .pool
            .get_connection(server_id)
            .await
            .map_err(|e| ExecutionFailure::new(e.to_string()))?;

        let request = McpRequest::new(methods::TOOLS_CALL)
            .with_params(json!({ "name": tool_name, "arguments": arguments }));
        let response = match timeout {
            Some(timeout) => transport.send_with_timeout(request, timeout).await,
            None => transport.send(request).await,
        }
        .map_err(Self::transport_failure)?;

        response.into_result().map_err(|rpc| {
            let failure = ExecutionFailure::new(rpc.message).with_code(rpc.code);
            match rpc.data {
                Some(data) => failure.with_data(data),
                None => failure,
            }
        })
    }

    /// A result flagged `isError` counts as a failed execution
    fn check_tool_result(result: Value) -> Result<Value, ExecutionFailure> {
        let flagged = result
            .get("isError")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if !flagged {
            return Ok(result);
        }

        let text = serde_json::from_value::<McpToolResult>(result.clone())
            .map(|r| r.text())
            .unwrap_or_default();
        let message = if text.trim().is_empty() {
            "tool reported an error".to_string()
        } else {
            text
        };
        Err(ExecutionFailure::new(message).with_data(result))
    }

    fn transport_failure(err: McpError) -> ExecutionFailure {
        match err {
            McpError::Server {
                code,
                message,
                data,
            } => {
                let failure = ExecutionFailure::new(message).with_code(code);
                match data {
                    Some(data) => failure.with_data(data),
                    None => failure,
                }
            }
            other => ExecutionFailure::new(other.to_string()),
        }
    }

    // ========== Queries ==========

    pub async fn get_server(&self, server_id: ServerId) -> BridgeResult<ServerDescriptor> {
        self.require_server(server_id).await
    }

    pub async fn list_servers(&self) -> BridgeResult<Vec<ServerDescriptor>> {
        Ok(self.servers.list().await?)
    }

    pub async fn list_tools(&self, server_id: ServerId) -> BridgeResult<Vec<ToolDescriptor>> {
        self.require_server(server_id).await?;
        Ok(self.tools.find_by_server_id(server_id).await?)
    }

    pub async fn get_execution(&self, execution_id: ExecutionId) -> BridgeResult<Execution> {
        self.executions
            .find_by_id(execution_id)
            .await?
            .ok_or_else(|| BridgeError::execution_not_found(execution_id))
    }

    /// Matching executions, newest first
    pub async fn list_executions(&self, filter: ExecutionFilter) -> BridgeResult<Vec<Execution>> {
        Ok(self.executions.find_many(filter).await?)
    }

    pub async fn get_server_status(&self, server_id: ServerId) -> BridgeResult<ServerStatusReport> {
        let server = self.require_server(server_id).await?;
        let tool_count = self.tools.find_by_server_id(server_id).await?.len();
        Ok(ServerStatusReport {
            server,
            connection: self.pool.snapshot(server_id),
            tool_count,
        })
    }

    async fn require_server(&self, server_id: ServerId) -> BridgeResult<ServerDescriptor> {
        self.servers
            .find_by_id(server_id)
            .await?
            .ok_or_else(|| BridgeError::server_not_found(server_id))
    }
}
