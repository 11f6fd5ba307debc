//! Correlation layer shared by all carriers

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot, watch};
use tracing::{debug, info, instrument, trace, warn};

use super::framing::LineBuffer;
use super::{Carrier, Transport, TransportOptions};
use crate::domain::{ConnectionStatus, TransportKind};
use crate::mcp::error::McpError;
use crate::mcp::protocol::{
    InboundMessage, InboundNotification, McpNotification, McpRequest, McpResponse, RequestId,
    methods,
};
use crate::mcp::types::{ClientInfo, InitializeParams, InitializeResult};

type PendingSender = oneshot::Sender<Result<McpResponse, McpError>>;

/// Pending requests, status and notification fan-out for one transport
pub(crate) struct RpcSession {
    label: String,
    pending: Mutex<HashMap<String, PendingSender>>,
    next_id: AtomicI64,
    status: watch::Sender<ConnectionStatus>,
    notifications: broadcast::Sender<InboundNotification>,
    server_info: RwLock<Option<InitializeResult>>,
}

impl RpcSession {
    fn new(label: String, notification_capacity: usize) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);
        let (notifications, _) = broadcast::channel(notification_capacity.max(1));
        Self {
            label,
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicI64::new(1),
            status,
            notifications,
            server_info: RwLock::new(None),
        }
    }

    fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    fn begin_connecting(&self) -> bool {
        self.status.send_if_modified(|current| {
            if *current == ConnectionStatus::Disconnected {
                *current = ConnectionStatus::Connecting;
                true
            } else {
                false
            }
        })
    }

    fn mark_connected(&self, info: InitializeResult) -> bool {
        *self.server_info.write() = Some(info);
        self.status.send_if_modified(|current| {
            if *current == ConnectionStatus::Connecting {
                *current = ConnectionStatus::Connected;
                true
            } else {
                false
            }
        })
    }

    /// Move to a final state and reject everything in flight.
    ///
    /// Returns whether this call performed the transition.
    pub(crate) fn terminate(&self, status: ConnectionStatus, reason: &str) -> bool {
        let changed = self.status.send_if_modified(|current| match *current {
            ConnectionStatus::Connecting | ConnectionStatus::Connected => {
                *current = status;
                true
            }
            _ => false,
        });

        let drained: Vec<PendingSender> = self.pending.lock().drain().map(|(_, tx)| tx).collect();
        if !drained.is_empty() {
            debug!(server = %self.label, count = drained.len(), "rejecting pending requests");
        }
        for tx in drained {
            let _ = tx.send(Err(McpError::connection(reason)));
        }

        if changed {
            debug!(server = %self.label, status = %status, reason, "transport closed");
        }
        changed
    }

    fn next_request_id(&self) -> RequestId {
        RequestId::Number(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn forget(&self, key: &str) -> bool {
        self.pending.lock().remove(key).is_some()
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    async fn request<C: Carrier + ?Sized>(
        &self,
        carrier: &C,
        mut request: McpRequest,
        timeout: Duration,
    ) -> Result<McpResponse, McpError> {
        let id = request
            .id
            .get_or_insert_with(|| self.next_request_id())
            .clone();
        let key = id.to_string();

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock();
            if pending.contains_key(&key) {
                return Err(McpError::invalid_request(format!(
                    "request id {} is already in flight",
                    id
                )));
            }
            pending.insert(key.clone(), tx);
        }

        let frame = match serde_json::to_string(&request) {
            Ok(frame) => frame,
            Err(e) => {
                self.forget(&key);
                return Err(e.into());
            }
        };
        trace!(server = %self.label, method = %request.method, request_id = %id, "sending request");

        let exchange = async {
            let replies = carrier.send_raw(frame).await?;
            for reply in &replies {
                self.dispatch(reply);
            }
            rx.await
                .map_err(|_| McpError::connection("transport closed before a response arrived"))?
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => {
                self.forget(&key);
                Err(e)
            }
            Err(_) => {
                self.forget(&key);
                warn!(
                    server = %self.label,
                    method = %request.method,
                    request_id = %id,
                    timeout_ms = timeout.as_millis() as u64,
                    "request timed out"
                );
                Err(McpError::timeout(timeout))
            }
        }
    }

    /// Route one complete inbound message
    pub(crate) fn dispatch(&self, payload: &str) {
        let value: Value = match serde_json::from_str(payload) {
            Ok(value) => value,
            Err(e) => {
                warn!(server = %self.label, error = %e, "skipping unparseable message");
                return;
            }
        };

        match value {
            Value::Array(items) => {
                for item in items {
                    self.dispatch_value(item);
                }
            }
            other => self.dispatch_value(other),
        }
    }

    fn dispatch_value(&self, value: Value) {
        match InboundMessage::classify(value) {
            Ok(InboundMessage::Response(response)) => {
                let key = response.id.to_string();
                let waiter = self.pending.lock().remove(&key);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(Ok(response));
                    }
                    None => {
                        warn!(server = %self.label, request_id = %key, "response for unknown or expired request");
                    }
                }
            }
            Ok(InboundMessage::Notification(notification)) => {
                trace!(server = %self.label, method = ?notification.method, "notification received");
                let _ = self.notifications.send(notification);
            }
            Ok(InboundMessage::Request { id, method }) => {
                warn!(server = %self.label, request_id = %id, %method, "ignoring server-initiated request");
            }
            Err(e) => {
                warn!(server = %self.label, error = %e, "skipping malformed message");
            }
        }
    }
}

/// Handle carriers use to deliver inbound data and report closure
#[derive(Clone)]
pub struct InboundSink {
    session: Arc<RpcSession>,
    buffer: Arc<Mutex<LineBuffer>>,
}

impl InboundSink {
    fn new(session: Arc<RpcSession>, max_line_bytes: usize) -> Self {
        Self {
            session,
            buffer: Arc::new(Mutex::new(LineBuffer::new(max_line_bytes))),
        }
    }

    /// Newline-framed bytes, possibly a partial line
    pub fn push_bytes(&self, chunk: &[u8]) {
        let framed = self.buffer.lock().push(chunk);
        self.deliver(framed);
    }

    /// A whole frame from a message-oriented carrier.
    ///
    /// Framed like [`push_bytes`](Self::push_bytes); an unterminated remainder
    /// that is already a complete JSON document is delivered as well.
    pub fn push_frame(&self, frame: &[u8]) {
        let framed = {
            let mut buffer = self.buffer.lock();
            buffer.push(frame).map(|mut lines| {
                lines.extend(buffer.take_complete_remainder());
                lines
            })
        };
        self.deliver(framed);
    }

    /// The peer closed the carrier
    pub fn closed(&self, reason: &str) {
        self.session.terminate(ConnectionStatus::Disconnected, reason);
    }

    /// The carrier failed
    pub fn failed(&self, error: &McpError) {
        warn!(server = %self.session.label, error = %error, "carrier failed");
        self.session
            .terminate(ConnectionStatus::Error, &error.to_string());
    }

    pub fn is_open(&self) -> bool {
        matches!(
            self.session.status(),
            ConnectionStatus::Connecting | ConnectionStatus::Connected
        )
    }

    fn deliver(&self, framed: Result<Vec<String>, McpError>) {
        match framed {
            Ok(lines) => {
                for line in &lines {
                    self.session.dispatch(line);
                }
            }
            Err(e) => self.failed(&e),
        }
    }
}

/// [`Transport`] built from a [`Carrier`] plus the shared correlation layer
pub struct SessionTransport<C: Carrier> {
    kind: TransportKind,
    carrier: C,
    session: Arc<RpcSession>,
    request_timeout: Duration,
    max_line_bytes: usize,
    client_info: ClientInfo,
    used: AtomicBool,
}

impl<C: Carrier> SessionTransport<C> {
    pub fn new(
        kind: TransportKind,
        label: impl Into<String>,
        carrier: C,
        options: &TransportOptions,
    ) -> Self {
        Self {
            kind,
            carrier,
            session: Arc::new(RpcSession::new(label.into(), options.notification_capacity)),
            request_timeout: options.request_timeout,
            max_line_bytes: options.max_line_bytes,
            client_info: options.client_info.clone(),
            used: AtomicBool::new(false),
        }
    }

    pub fn carrier(&self) -> &C {
        &self.carrier
    }

    /// Requests awaiting a response
    pub fn pending_requests(&self) -> usize {
        self.session.pending_count()
    }

    async fn handshake(&self) -> Result<InitializeResult, McpError> {
        let params = serde_json::to_value(InitializeParams::new(self.client_info.clone()))?;
        let request = McpRequest::new(methods::INITIALIZE).with_params(params);
        let response = self
            .session
            .request(&self.carrier, request, self.request_timeout)
            .await?;

        let result = response
            .into_result()
            .map_err(|e| McpError::connection(format!("initialize rejected: {}", e)))?;
        let info: InitializeResult = serde_json::from_value(result)
            .map_err(|e| McpError::protocol(format!("invalid initialize result: {}", e)))?;

        let initialized = serde_json::to_string(&McpNotification::new(methods::INITIALIZED))?;
        for reply in self.carrier.send_raw(initialized).await? {
            self.session.dispatch(&reply);
        }

        if !self.session.mark_connected(info.clone()) {
            return Err(McpError::connection("carrier closed during handshake"));
        }
        Ok(info)
    }
}

#[async_trait]
impl<C: Carrier> Transport for SessionTransport<C> {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    #[instrument(skip(self), fields(server = %self.session.label, kind = %self.kind, endpoint = %self.carrier.describe()))]
    async fn connect(&self) -> Result<InitializeResult, McpError> {
        if self.used.swap(true, Ordering::SeqCst) || !self.session.begin_connecting() {
            return Err(McpError::invalid_request(
                "transport instances are single-use; create a new one to reconnect",
            ));
        }

        let sink = InboundSink::new(Arc::clone(&self.session), self.max_line_bytes);
        if let Err(e) = self.carrier.open(sink).await {
            warn!(error = %e, "failed to open carrier");
            self.session.terminate(ConnectionStatus::Error, &e.to_string());
            return Err(e);
        }

        match self.handshake().await {
            Ok(info) => {
                info!(
                    server_name = %info.server_info.name,
                    server_version = %info.server_info.version,
                    protocol = %info.protocol_version,
                    "transport connected"
                );
                Ok(info)
            }
            Err(e) => {
                warn!(error = %e, "handshake failed");
                self.session.terminate(ConnectionStatus::Error, &e.to_string());
                if let Err(close_err) = self.carrier.close().await {
                    debug!(error = %close_err, "error closing carrier after failed handshake");
                }
                Err(e)
            }
        }
    }

    async fn disconnect(&self) -> Result<(), McpError> {
        self.session
            .terminate(ConnectionStatus::Disconnected, "transport disconnected");
        if !self.used.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.carrier.close().await
    }

    async fn send(&self, request: McpRequest) -> Result<McpResponse, McpError> {
        self.send_with_timeout(request, self.request_timeout).await
    }

    async fn send_with_timeout(
        &self,
        request: McpRequest,
        timeout: Duration,
    ) -> Result<McpResponse, McpError> {
        if self.session.status() != ConnectionStatus::Connected {
            return Err(McpError::NotConnected);
        }
        self.session.request(&self.carrier, request, timeout).await
    }

    async fn notify(&self, notification: McpNotification) -> Result<(), McpError> {
        if self.session.status() != ConnectionStatus::Connected {
            return Err(McpError::NotConnected);
        }
        let frame = serde_json::to_string(&notification)?;
        for reply in self.carrier.send_raw(frame).await? {
            self.session.dispatch(&reply);
        }
        Ok(())
    }

    fn status(&self) -> ConnectionStatus {
        self.session.status()
    }

    fn server_info(&self) -> Option<InitializeResult> {
        self.session.server_info.read().clone()
    }

    fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.session.status.subscribe()
    }

    fn notifications(&self) -> broadcast::Receiver<InboundNotification> {
        self.session.notifications.subscribe()
    }
}
