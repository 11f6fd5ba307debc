//! Orchestrator flows over scripted transports

mod common;

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use common::{ScriptedFactory, ScriptedPeer, next_event};
use toolbridge_core::config::PoolConfig;
use toolbridge_core::domain::StdioConfig;
use toolbridge_core::mcp::protocol::{McpRpcError, methods};
use toolbridge_core::store::{InMemoryExecutionStore, InMemoryServerStore, InMemoryToolStore};
use toolbridge_core::{
    BridgeConfig, BridgeError, BridgeEvent, CloseReason, ConnectionPool, ConnectionStatus,
    EventBus, ExecuteToolRequest, ExecutionFilter, ExecutionOrchestrator, ExecutionStatus,
    RegisterServerRequest, ServerId, ToolStore, TransportConfig, UpdateServerRequest,
};

const WAIT: Duration = Duration::from_secs(30);

fn orchestrator(discover_on_register: bool) -> (ExecutionOrchestrator, ScriptedPeer, Arc<ScriptedFactory>) {
    let mut config = BridgeConfig::default();
    config.execution.discover_on_register = discover_on_register;
    let peer = ScriptedPeer::new();
    let factory = Arc::new(ScriptedFactory::new(peer.clone()));
    let orchestrator = ExecutionOrchestrator::in_memory_with_factory(&config, factory.clone());
    (orchestrator, peer, factory)
}

async fn register(orchestrator: &ExecutionOrchestrator, name: &str) -> ServerId {
    let request = RegisterServerRequest::new(
        name,
        TransportConfig::Stdio(StdioConfig::new("scripted-peer")),
    );
    orchestrator.register_server(request).await.unwrap().id
}

async fn ready(orchestrator: &ExecutionOrchestrator) -> ServerId {
    let server_id = register(orchestrator, "scripted").await;
    orchestrator.discover_tools(server_id).await.unwrap();
    server_id
}

#[tokio::test]
async fn test_registration_discovers_tools_in_background() {
    let (orchestrator, _peer, _factory) = orchestrator(true);
    let mut events = orchestrator.events().subscribe();

    let server_id = register(&orchestrator, "scripted").await;

    let event = next_event(&mut events, WAIT, |e| {
        matches!(e, BridgeEvent::ToolsDiscovered { .. })
    })
    .await;
    match event {
        BridgeEvent::ToolsDiscovered { server_id: id, tools } => {
            assert_eq!(id, server_id);
            assert_eq!(tools, vec!["echo", "list_processes", "explode"]);
        }
        other => panic!("unexpected event {:?}", other),
    }

    let tools = orchestrator.list_tools(server_id).await.unwrap();
    assert_eq!(tools.len(), 3);
    assert!(tools.iter().all(|t| t.version == 1 && t.enabled));

    let server = orchestrator.get_server(server_id).await.unwrap();
    assert_eq!(server.connection_status, ConnectionStatus::Connected);
    assert_eq!(server.server_info.unwrap().server_info.name, "scripted");
}

#[tokio::test]
async fn test_rediscovery_bumps_version_and_keeps_enabled_flag() {
    let (orchestrator, _peer, _factory) = orchestrator(false);
    let server_id = ready(&orchestrator).await;

    let disabled = orchestrator
        .set_tool_enabled(server_id, "explode", false)
        .await
        .unwrap();
    assert!(!disabled.enabled);

    let tools = orchestrator.discover_tools(server_id).await.unwrap();
    assert!(tools.iter().all(|t| t.version == 2));
    let explode = tools.iter().find(|t| t.name == "explode").unwrap();
    assert!(!explode.enabled);
    let echo = tools.iter().find(|t| t.name == "echo").unwrap();
    assert!(echo.enabled);
    assert_eq!(echo.description.as_deref(), Some("Echo a message"));
}

#[tokio::test]
async fn test_sync_execution_returns_completed_record() {
    let (orchestrator, peer, _factory) = orchestrator(false);
    let server_id = ready(&orchestrator).await;
    let mut events = orchestrator.events().subscribe();

    let execution = orchestrator
        .execute_tool(ExecuteToolRequest::new(server_id, "echo", json!({"message": "hi"})))
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.result_text().as_deref(), Some("Echo: hi"));
    assert!(execution.started_at.is_some());
    assert!(execution.completed_at.is_some());
    assert!(execution.duration_ms.is_some());
    assert!(!execution.is_async);

    let call = &peer.requests(methods::TOOLS_CALL)[0];
    assert_eq!(call["params"], json!({"name": "echo", "arguments": {"message": "hi"}}));

    next_event(&mut events, WAIT, |e| {
        matches!(e, BridgeEvent::ExecutionStarted { .. })
    })
    .await;
    next_event(&mut events, WAIT, |e| {
        matches!(e, BridgeEvent::ExecutionCompleted { .. })
    })
    .await;

    let stored = orchestrator.get_execution(execution.id).await.unwrap();
    assert_eq!(stored, execution);
}

#[tokio::test]
async fn test_null_arguments_become_empty_object() {
    let (orchestrator, peer, _factory) = orchestrator(false);
    let server_id = ready(&orchestrator).await;

    let execution = orchestrator
        .execute_tool(ExecuteToolRequest::new(
            server_id,
            "list_processes",
            serde_json::Value::Null,
        ))
        .await
        .unwrap();

    assert_eq!(execution.arguments, json!({}));
    assert_eq!(peer.requests(methods::TOOLS_CALL)[0]["params"]["arguments"], json!({}));
}

#[tokio::test]
async fn test_async_execution_completes_in_background() {
    let (orchestrator, peer, _factory) = orchestrator(false);
    let server_id = ready(&orchestrator).await;
    peer.hold(methods::TOOLS_CALL);

    let pending = orchestrator
        .execute_tool(
            ExecuteToolRequest::new(server_id, "echo", json!({"message": "later"})).asynchronous(),
        )
        .await
        .unwrap();
    assert_eq!(pending.status, ExecutionStatus::Pending);
    assert!(pending.is_async);

    let call = peer.wait_for_requests(methods::TOOLS_CALL, 1).await.remove(0);
    let running = orchestrator.get_execution(pending.id).await.unwrap();
    assert_eq!(running.status, ExecutionStatus::Running);

    peer.respond(
        &call["id"],
        json!({"content": [{"type": "text", "text": "Echo: later"}]}),
    );

    let finished = tokio::time::timeout(WAIT, async {
        loop {
            let execution = orchestrator.get_execution(pending.id).await.unwrap();
            if execution.status.is_terminal() {
                return execution;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(finished.status, ExecutionStatus::Completed);
    assert_eq!(finished.result_text().as_deref(), Some("Echo: later"));
}

#[tokio::test]
async fn test_tool_reported_error_fails_execution() {
    let (orchestrator, _peer, _factory) = orchestrator(false);
    let server_id = ready(&orchestrator).await;

    let err = orchestrator
        .execute_tool(ExecuteToolRequest::new(server_id, "explode", json!({})))
        .await
        .unwrap_err();

    let execution_id = match err {
        BridgeError::Execution {
            execution_id,
            message,
            ..
        } => {
            assert_eq!(message, "tool exploded");
            execution_id
        }
        other => panic!("expected execution error, got {:?}", other),
    };

    let failed = orchestrator.get_execution(execution_id).await.unwrap();
    assert_eq!(failed.status, ExecutionStatus::Failed);
    assert_eq!(failed.error.unwrap().message, "tool exploded");
    assert!(failed.result.is_none());
}

#[tokio::test]
async fn test_rpc_error_keeps_code_and_data() {
    let (orchestrator, peer, _factory) = orchestrator(false);
    let server_id = ready(&orchestrator).await;
    peer.fail_method(
        methods::TOOLS_CALL,
        McpRpcError::new(-32602, "message is required").with_data(json!({"field": "message"})),
    );

    let err = orchestrator
        .execute_tool(ExecuteToolRequest::new(server_id, "echo", json!({})))
        .await
        .unwrap_err();

    match err {
        BridgeError::Execution {
            execution_id, code, ..
        } => {
            assert_eq!(code, Some(-32602));
            let failure = orchestrator
                .get_execution(execution_id)
                .await
                .unwrap()
                .error
                .unwrap();
            assert_eq!(failure.code, Some(-32602));
            assert_eq!(failure.data, Some(json!({"field": "message"})));
        }
        other => panic!("expected execution error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_execution_timeout_fails_execution() {
    let (orchestrator, peer, _factory) = orchestrator(false);
    let server_id = ready(&orchestrator).await;
    peer.hold(methods::TOOLS_CALL);

    let err = orchestrator
        .execute_tool(
            ExecuteToolRequest::new(server_id, "echo", json!({"message": "slow"}))
                .with_timeout(Duration::from_millis(50)),
        )
        .await
        .unwrap_err();

    assert!(err.to_string().contains("timeout"), "{}", err);
    let executions = orchestrator
        .list_executions(ExecutionFilter::for_server(server_id))
        .await
        .unwrap();
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].status, ExecutionStatus::Failed);
}

#[tokio::test]
async fn test_disabled_tool_is_refused() {
    let (orchestrator, peer, _factory) = orchestrator(false);
    let server_id = ready(&orchestrator).await;
    orchestrator
        .set_tool_enabled(server_id, "echo", false)
        .await
        .unwrap();

    let err = orchestrator
        .execute_tool(ExecuteToolRequest::new(server_id, "echo", json!({"message": "hi"})))
        .await
        .unwrap_err();

    assert!(matches!(err, BridgeError::Validation(_)));
    assert!(peer.requests(methods::TOOLS_CALL).is_empty());
    assert!(
        orchestrator
            .list_executions(ExecutionFilter::default())
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn test_connection_test_reports_server_info() {
    let (orchestrator, peer, _factory) = orchestrator(false);
    let server_id = register(&orchestrator, "scripted").await;

    let result = orchestrator.test_connection(server_id).await.unwrap();

    assert!(result.success);
    assert!(result.error.is_none());
    assert_eq!(result.server_info.unwrap().server_info.name, "scripted");
    assert_eq!(peer.requests(methods::PING).len(), 1);
}

#[tokio::test]
async fn test_update_transport_drops_connection() {
    let (orchestrator, _peer, factory) = orchestrator(false);
    let server_id = ready(&orchestrator).await;
    let mut events = orchestrator.events().subscribe();
    assert!(orchestrator.pool().is_connected(server_id));

    let update = UpdateServerRequest {
        transport: Some(TransportConfig::Stdio(
            StdioConfig::new("scripted-peer").with_args(["--verbose"]),
        )),
        ..Default::default()
    };
    orchestrator.update_server(server_id, update).await.unwrap();

    next_event(&mut events, WAIT, |e| {
        matches!(
            e,
            BridgeEvent::ConnectionClosed {
                reason: CloseReason::Removed,
                ..
            }
        )
    })
    .await;
    assert!(!orchestrator.pool().is_connected(server_id));

    orchestrator.discover_tools(server_id).await.unwrap();
    assert_eq!(factory.created(), 2);
}

#[tokio::test]
async fn test_delete_closes_connection_and_forgets_server() {
    let (orchestrator, peer, _factory) = orchestrator(false);
    let server_id = ready(&orchestrator).await;
    let mut events = orchestrator.events().subscribe();

    orchestrator.delete_server(server_id).await.unwrap();

    next_event(&mut events, WAIT, |e| {
        matches!(e, BridgeEvent::ConnectionClosed { .. })
    })
    .await;
    assert!(!peer.is_attached());
    assert!(orchestrator.get_server(server_id).await.unwrap_err().is_not_found());
    assert!(orchestrator.list_tools(server_id).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_discovery_finishing_after_delete_leaves_no_tools() {
    let mut config = BridgeConfig::default();
    config.execution.discover_on_register = false;
    let peer = ScriptedPeer::new();
    let servers = Arc::new(InMemoryServerStore::new());
    let tools = Arc::new(InMemoryToolStore::new());
    let pool = ConnectionPool::new(
        servers.clone(),
        Arc::new(ScriptedFactory::new(peer.clone())),
        PoolConfig::default(),
        EventBus::default(),
    );
    let orchestrator = ExecutionOrchestrator::new(
        servers,
        tools.clone(),
        Arc::new(InMemoryExecutionStore::new()),
        pool,
        config.execution.clone(),
    );
    let server_id = register(&orchestrator, "scripted").await;
    peer.hold(methods::TOOLS_LIST);

    let discovery = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.discover_tools(server_id).await }
    });
    let listed = peer.wait_for_requests(methods::TOOLS_LIST, 1).await;

    // The listing arrives, then the server is deleted before discovery stores it
    peer.respond(
        &listed[0]["id"],
        json!({ "tools": [{ "name": "echo", "inputSchema": { "type": "object" } }] }),
    );
    orchestrator.delete_server(server_id).await.unwrap();

    let err = discovery.await.unwrap().unwrap_err();
    assert!(err.is_not_found());
    assert!(tools.find_by_server_id(server_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_server_status_report() {
    let (orchestrator, _peer, _factory) = orchestrator(false);
    let server_id = ready(&orchestrator).await;

    let report = orchestrator.get_server_status(server_id).await.unwrap();

    assert_eq!(report.server.id, server_id);
    assert_eq!(report.tool_count, 3);
    let connection = report.connection.unwrap();
    assert_eq!(connection.status, ConnectionStatus::Connected);
    assert_eq!(connection.server_info.unwrap().name, "scripted");
}
