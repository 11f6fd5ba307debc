//! Scripted in-process MCP peer shared by the integration tests
//!
//! A [`ScriptedPeer`] plays the server side of every carrier created from it.
//! It answers `initialize`, `ping`, `tools/list` and `tools/call` on its own
//! unless a method is held (then the test answers by hand) or scripted to fail.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{broadcast, watch};

use toolbridge_core::config::PoolConfig;
use toolbridge_core::domain::{ServerDescriptor, StdioConfig, TransportConfig, TransportKind};
use toolbridge_core::mcp::MCP_PROTOCOL_VERSION;
use toolbridge_core::mcp::protocol::{McpRpcError, methods};
use toolbridge_core::mcp::transport::{
    Carrier, InboundSink, SessionTransport, TransportFactory, TransportOptions,
};
use toolbridge_core::store::{InMemoryServerStore, ServerStore};
use toolbridge_core::{BridgeEvent, ConnectionPool, EventBus, McpError, ServerId, Transport};

struct PeerState {
    /// Sink of the most recently opened carrier, tagged with its carrier id
    sink: Mutex<Option<(u64, InboundSink)>>,
    received: Mutex<Vec<Value>>,
    received_count: watch::Sender<usize>,
    held: Mutex<HashSet<String>>,
    failing: Mutex<HashMap<String, McpRpcError>>,
    delayed: Mutex<HashMap<String, Duration>>,
    refuse: AtomicBool,
    next_carrier: AtomicU64,
    opened: AtomicUsize,
}

/// Server side of the scripted carriers
#[derive(Clone)]
pub struct ScriptedPeer {
    state: Arc<PeerState>,
}

impl Default for ScriptedPeer {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedPeer {
    pub fn new() -> Self {
        let (received_count, _) = watch::channel(0);
        Self {
            state: Arc::new(PeerState {
                sink: Mutex::new(None),
                received: Mutex::new(Vec::new()),
                received_count,
                held: Mutex::new(HashSet::new()),
                failing: Mutex::new(HashMap::new()),
                delayed: Mutex::new(HashMap::new()),
                refuse: AtomicBool::new(false),
                next_carrier: AtomicU64::new(1),
                opened: AtomicUsize::new(0),
            }),
        }
    }

    /// A fresh carrier talking to this peer
    pub fn carrier(&self) -> ScriptedCarrier {
        ScriptedCarrier {
            peer: self.clone(),
            id: self.state.next_carrier.fetch_add(1, Ordering::SeqCst),
            closed: AtomicBool::new(false),
        }
    }

    /// Stop answering `method`; the test replies with [`respond`](Self::respond)
    pub fn hold(&self, method: &str) {
        self.state.held.lock().insert(method.to_string());
    }

    pub fn release(&self, method: &str) {
        self.state.held.lock().remove(method);
    }

    /// Answer `method` with a JSON-RPC error
    pub fn fail_method(&self, method: &str, error: McpRpcError) {
        self.state.failing.lock().insert(method.to_string(), error);
    }

    /// Answer the next `method` request only after `delay`, on the carrier
    /// that sent it
    pub fn delay_once(&self, method: &str, delay: Duration) {
        self.state.delayed.lock().insert(method.to_string(), delay);
    }

    /// Make subsequent carrier opens fail
    pub fn refuse_connections(&self, refuse: bool) {
        self.state.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Number of carriers successfully opened
    pub fn opened(&self) -> usize {
        self.state.opened.load(Ordering::SeqCst)
    }

    pub fn is_attached(&self) -> bool {
        self.state.sink.lock().is_some()
    }

    /// Every request received for `method`, across connections
    pub fn requests(&self, method: &str) -> Vec<Value> {
        self.state
            .received
            .lock()
            .iter()
            .filter(|m| m.get("method").and_then(Value::as_str) == Some(method))
            .cloned()
            .collect()
    }

    /// Wait until at least `count` requests for `method` arrived
    pub async fn wait_for_requests(&self, method: &str, count: usize) -> Vec<Value> {
        let mut changes = self.state.received_count.subscribe();
        loop {
            let seen = self.requests(method);
            if seen.len() >= count {
                return seen;
            }
            if changes.changed().await.is_err() {
                return seen;
            }
        }
    }

    /// Send a success response for `id`
    pub fn respond(&self, id: &Value, result: Value) {
        let frame = json!({ "jsonrpc": "2.0", "id": id, "result": result });
        self.push_line(&frame);
    }

    /// Send a JSON value followed by a newline
    pub fn push_line(&self, message: &Value) {
        let mut line = message.to_string();
        line.push('\n');
        self.push_raw(line.as_bytes());
    }

    /// Raw bytes, delivered as the carrier would read them
    pub fn push_raw(&self, bytes: &[u8]) {
        let sink = self.state.sink.lock().as_ref().map(|(_, sink)| sink.clone());
        if let Some(sink) = sink {
            sink.push_bytes(bytes);
        }
    }

    /// Close the current carrier from the server side
    pub fn hang_up(&self) {
        let sink = self.state.sink.lock().take();
        if let Some((_, sink)) = sink {
            sink.closed("peer hung up");
        }
    }

    fn attach(&self, carrier_id: u64, sink: InboundSink) {
        *self.state.sink.lock() = Some((carrier_id, sink));
        self.state.opened.fetch_add(1, Ordering::SeqCst);
    }

    fn detach(&self, carrier_id: u64) {
        let mut sink = self.state.sink.lock();
        if sink.as_ref().is_some_and(|(id, _)| *id == carrier_id) {
            *sink = None;
        }
    }

    fn receive(&self, message: Value) {
        self.state.received.lock().push(message.clone());
        self.state.received_count.send_modify(|count| *count += 1);

        let Some(id) = message.get("id").filter(|id| !id.is_null()).cloned() else {
            return;
        };
        let method = message
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if self.state.held.lock().contains(&method) {
            return;
        }

        let scripted = self.state.failing.lock().get(&method).cloned();
        let outcome = match scripted {
            Some(error) => Err(error),
            None => auto_reply(&method, message.get("params")),
        };
        let frame = match outcome {
            Ok(result) => json!({ "jsonrpc": "2.0", "id": id, "result": result }),
            Err(error) => json!({ "jsonrpc": "2.0", "id": id, "error": error }),
        };

        let delay = self.state.delayed.lock().remove(&method);
        match delay {
            Some(delay) => {
                let sink = self.state.sink.lock().as_ref().map(|(_, sink)| sink.clone());
                let line = format!("{}\n", frame);
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if let Some(sink) = sink {
                        sink.push_bytes(line.as_bytes());
                    }
                });
            }
            None => self.push_line(&frame),
        }
    }
}

fn auto_reply(method: &str, params: Option<&Value>) -> Result<Value, McpRpcError> {
    match method {
        methods::INITIALIZE => Ok(json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": { "tools": { "listChanged": false } },
            "serverInfo": { "name": "scripted", "version": "1.0.0" }
        })),
        methods::PING => Ok(json!({})),
        methods::TOOLS_LIST => Ok(json!({
            "tools": [
                { "name": "echo", "description": "Echo a message", "inputSchema": { "type": "object" } },
                { "name": "list_processes", "inputSchema": { "type": "object" } },
                { "name": "explode", "description": "Always reports a tool error", "inputSchema": { "type": "object" } }
            ]
        })),
        methods::TOOLS_CALL => {
            let params = params.cloned().unwrap_or(Value::Null);
            let name = params.get("name").and_then(Value::as_str).unwrap_or_default();
            match name {
                "echo" => {
                    let message = params
                        .pointer("/arguments/message")
                        .and_then(Value::as_str)
                        .unwrap_or_default();
                    Ok(json!({
                        "content": [{ "type": "text", "text": format!("Echo: {}", message) }],
                        "isError": false
                    }))
                }
                "list_processes" => Ok(json!({
                    "content": [{ "type": "text", "text": "pid=1 name=scripted" }]
                })),
                "explode" => Ok(json!({
                    "content": [{ "type": "text", "text": "tool exploded" }],
                    "isError": true
                })),
                other => Err(McpRpcError::new(-32602, format!("Unknown tool: {}", other))),
            }
        }
        _ => Err(McpRpcError::method_not_found()),
    }
}

/// In-memory carrier backed by a [`ScriptedPeer`]
pub struct ScriptedCarrier {
    peer: ScriptedPeer,
    id: u64,
    closed: AtomicBool,
}

#[async_trait]
impl Carrier for ScriptedCarrier {
    fn describe(&self) -> String {
        format!("scripted#{}", self.id)
    }

    async fn open(&self, sink: InboundSink) -> Result<(), McpError> {
        if self.peer.state.refuse.load(Ordering::SeqCst) {
            return Err(McpError::connection("connection refused"));
        }
        self.peer.attach(self.id, sink);
        Ok(())
    }

    async fn send_raw(&self, frame: String) -> Result<Vec<String>, McpError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(McpError::transport("carrier closed"));
        }
        let message: Value = serde_json::from_str(&frame)?;
        self.peer.receive(message);
        Ok(Vec::new())
    }

    async fn close(&self) -> Result<(), McpError> {
        self.closed.store(true, Ordering::SeqCst);
        self.peer.detach(self.id);
        Ok(())
    }
}

/// Factory handing out scripted transports for every server
pub struct ScriptedFactory {
    peer: ScriptedPeer,
    options: TransportOptions,
    created: AtomicUsize,
}

impl ScriptedFactory {
    pub fn new(peer: ScriptedPeer) -> Self {
        Self::with_options(peer, TransportOptions::default())
    }

    pub fn with_options(peer: ScriptedPeer, options: TransportOptions) -> Self {
        Self {
            peer,
            options,
            created: AtomicUsize::new(0),
        }
    }

    /// Transports created so far
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl TransportFactory for ScriptedFactory {
    fn create(&self, server: &ServerDescriptor) -> Result<Arc<dyn Transport>, McpError> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(SessionTransport::new(
            server.transport_kind(),
            server.name.clone(),
            self.peer.carrier(),
            &self.options,
        )))
    }
}

/// Unconnected transport over a fresh scripted carrier
pub fn scripted_transport(
    peer: &ScriptedPeer,
    options: &TransportOptions,
) -> SessionTransport<ScriptedCarrier> {
    SessionTransport::new(TransportKind::Stdio, "scripted", peer.carrier(), options)
}

/// Server record whose transport the scripted factory ignores
pub fn scripted_server(name: &str) -> ServerDescriptor {
    ServerDescriptor::new(
        name,
        TransportConfig::Stdio(StdioConfig::new("scripted-peer")),
    )
}

/// Pool over an in-memory store holding one scripted server
pub struct PoolFixture {
    pub pool: ConnectionPool,
    pub servers: Arc<InMemoryServerStore>,
    pub factory: Arc<ScriptedFactory>,
    pub peer: ScriptedPeer,
    pub server_id: ServerId,
}

impl PoolFixture {
    pub async fn new(config: PoolConfig) -> Self {
        let peer = ScriptedPeer::new();
        let servers = Arc::new(InMemoryServerStore::new());
        let server = servers
            .create(scripted_server("scripted"))
            .await
            .expect("create server");
        let factory = Arc::new(ScriptedFactory::new(peer.clone()));
        let pool = ConnectionPool::new(
            servers.clone(),
            factory.clone(),
            config,
            EventBus::default(),
        );
        Self {
            pool,
            servers,
            factory,
            peer,
            server_id: server.id,
        }
    }

    pub async fn stored(&self) -> ServerDescriptor {
        self.servers
            .find_by_id(self.server_id)
            .await
            .expect("store")
            .expect("server present")
    }
}

/// Next event matching `wanted`, skipping others
pub async fn next_event<F>(
    events: &mut broadcast::Receiver<BridgeEvent>,
    within: Duration,
    wanted: F,
) -> BridgeEvent
where
    F: Fn(&BridgeEvent) -> bool,
{
    tokio::time::timeout(within, async {
        loop {
            match events.recv().await {
                Ok(event) if wanted(&event) => return event,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}
