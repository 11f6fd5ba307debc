//! Connection pool
//!
//! Holds at most one live [`Transport`] per server. Concurrent callers asking
//! for the same unconnected server share one connection attempt. Established
//! connections are watched: an unexpected close schedules reconnects with
//! exponential backoff until the attempt budget is spent, and a recurring
//! health check evicts connections that sat idle for too long.
//!
//! Slot state lives in a [`DashMap`] keyed by server id. Shard guards are never
//! held across an await point.

pub mod backoff;

pub use backoff::ReconnectBackoff;

use dashmap::DashMap;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::PoolConfig;
use crate::domain::{ConnectionStatus, ServerId, ServerStatus};
use crate::error::{BridgeError, BridgeResult};
use crate::events::{BridgeEvent, CloseReason, EventBus};
use crate::mcp::transport::{Transport, TransportFactory};
use crate::mcp::types::{InitializeResult, McpServerInfo};
use crate::store::{ServerStore, StoreError};

type ConnectAttempt = Shared<BoxFuture<'static, BridgeResult<Arc<dyn Transport>>>>;

struct LiveConnection {
    transport: Arc<dyn Transport>,
    last_activity: Instant,
    connected_at: Instant,
    generation: u64,
    monitor: JoinHandle<()>,
}

#[derive(Default)]
struct ServerSlot {
    live: Option<LiveConnection>,
    attempt: Option<ConnectAttempt>,
    /// Consecutive failed reconnects since the last successful connection
    failures: u32,
    retry: Option<JoinHandle<()>>,
    generation: u64,
    /// Token of the attempt allowed to install into this slot
    attempt_token: u64,
}

impl ServerSlot {
    fn is_vacant(&self) -> bool {
        self.live.is_none() && self.attempt.is_none() && self.retry.is_none()
    }
}

/// Point-in-time view of one server's pool entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionSnapshot {
    pub server_id: ServerId,
    pub status: ConnectionStatus,
    pub connecting: bool,
    pub reconnect_pending: bool,
    pub consecutive_failures: u32,
    #[serde(with = "humantime_serde")]
    pub idle_for: Option<Duration>,
    #[serde(with = "humantime_serde")]
    pub connected_for: Option<Duration>,
    pub server_info: Option<McpServerInfo>,
}

struct PoolInner {
    servers: Arc<dyn ServerStore>,
    factory: Arc<dyn TransportFactory>,
    config: PoolConfig,
    backoff: ReconnectBackoff,
    events: EventBus,
    slots: DashMap<ServerId, ServerSlot>,
    next_attempt: AtomicU64,
    shutdown: CancellationToken,
    health_task: Mutex<Option<JoinHandle<()>>>,
}

/// Shared handle to the pool; clones refer to the same connections
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    pub fn new(
        servers: Arc<dyn ServerStore>,
        factory: Arc<dyn TransportFactory>,
        config: PoolConfig,
        events: EventBus,
    ) -> Self {
        let backoff = ReconnectBackoff::from(&config);
        Self {
            inner: Arc::new(PoolInner {
                servers,
                factory,
                config,
                backoff,
                events,
                slots: DashMap::new(),
                next_attempt: AtomicU64::new(1),
                shutdown: CancellationToken::new(),
                health_task: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    /// Start the periodic health check. A stopped pool cannot be restarted.
    pub fn start(&self) {
        let mut task = self.inner.health_task.lock();
        if task.is_some() || self.inner.shutdown.is_cancelled() {
            return;
        }

        let pool = Arc::downgrade(&self.inner);
        let token = self.inner.shutdown.clone();
        let interval = self.inner.config.health_check_interval;
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(inner) = pool.upgrade() else { break };
                        ConnectionPool { inner }.run_health_check().await;
                    }
                }
            }
            debug!("health check stopped");
        }));
        info!(interval_secs = interval.as_secs(), "connection pool started");
    }

    /// Cancel timers and pending reconnects, then close every connection
    pub async fn stop(&self) {
        self.inner.shutdown.cancel();
        let task = self.inner.health_task.lock().take();
        if let Some(task) = task {
            task.abort();
        }

        let ids: Vec<ServerId> = self.inner.slots.iter().map(|entry| *entry.key()).collect();
        for server_id in ids {
            if let Some((_, slot)) = self.inner.slots.remove(&server_id) {
                PoolInner::close_slot(&self.inner, server_id, slot, CloseReason::Shutdown).await;
            }
        }
        info!("connection pool stopped");
    }

    /// A connected transport for `server_id`, connecting on demand
    #[instrument(skip(self), fields(server_id = %server_id))]
    pub async fn get_connection(&self, server_id: ServerId) -> BridgeResult<Arc<dyn Transport>> {
        if self.inner.shutdown.is_cancelled() {
            return Err(BridgeError::connection(Some(server_id), "connection pool is stopped"));
        }

        let attempt = {
            let mut slot = self.inner.slots.entry(server_id).or_default();
            if let Some(live) = slot.live.as_mut() {
                if live.transport.status() == ConnectionStatus::Connected {
                    live.last_activity = Instant::now();
                    return Ok(Arc::clone(&live.transport));
                }
            }
            if let Some(stale) = slot.live.take() {
                debug!(status = %stale.transport.status(), "discarding stale connection");
                stale.monitor.abort();
                tokio::spawn(async move {
                    let _ = stale.transport.disconnect().await;
                });
            }

            let pending = slot.attempt.clone();
            match pending {
                Some(attempt) => attempt,
                None => {
                    let token = self.inner.next_attempt.fetch_add(1, Ordering::Relaxed);
                    slot.attempt_token = token;
                    let handle = tokio::spawn(PoolInner::establish(
                        Arc::clone(&self.inner),
                        server_id,
                        token,
                    ));
                    let attempt = async move {
                        handle.await.unwrap_or_else(|e| {
                            Err(BridgeError::connection(
                                Some(server_id),
                                format!("connection task failed: {}", e),
                            ))
                        })
                    }
                    .boxed()
                    .shared();
                    slot.attempt = Some(attempt.clone());
                    attempt
                }
            }
        };

        attempt.await
    }

    /// Drop and disconnect one server's connection.
    ///
    /// An attempt still in flight is orphaned: it disconnects its own
    /// transport when it finishes and never installs it. Returns whether a
    /// live connection was closed.
    pub async fn remove(&self, server_id: ServerId) -> bool {
        match self.inner.slots.remove(&server_id) {
            Some((_, slot)) => {
                PoolInner::close_slot(&self.inner, server_id, slot, CloseReason::Removed).await
            }
            None => false,
        }
    }

    /// Evict connections idle longer than `max_idle_time`.
    ///
    /// Returns the number of evicted connections.
    pub async fn run_health_check(&self) -> usize {
        let now = Instant::now();
        let max_idle = self.inner.config.max_idle_time;

        let mut evicted = Vec::new();
        for mut entry in self.inner.slots.iter_mut() {
            let idle = entry
                .live
                .as_ref()
                .is_some_and(|live| now.duration_since(live.last_activity) > max_idle);
            if idle {
                if let Some(live) = entry.live.take() {
                    evicted.push((*entry.key(), live));
                }
            }
        }

        let count = evicted.len();
        for (server_id, live) in evicted {
            info!(
                server_id = %server_id,
                idle_secs = now.duration_since(live.last_activity).as_secs(),
                "evicting idle connection"
            );
            PoolInner::close_live(&self.inner, server_id, live, CloseReason::Idle).await;
        }

        self.inner.slots.retain(|_, slot| !slot.is_vacant());
        count
    }

    /// Snapshot of every pool entry
    pub fn get_connection_status(&self) -> Vec<ConnectionSnapshot> {
        let now = Instant::now();
        let mut snapshots: Vec<ConnectionSnapshot> = self
            .inner
            .slots
            .iter()
            .map(|entry| Self::snapshot_of(*entry.key(), entry.value(), now))
            .collect();
        snapshots.sort_by_key(|s| s.server_id);
        snapshots
    }

    pub fn snapshot(&self, server_id: ServerId) -> Option<ConnectionSnapshot> {
        self.inner
            .slots
            .get(&server_id)
            .map(|slot| Self::snapshot_of(server_id, slot.value(), Instant::now()))
    }

    pub fn is_connected(&self, server_id: ServerId) -> bool {
        self.inner.slots.get(&server_id).is_some_and(|slot| {
            slot.live
                .as_ref()
                .is_some_and(|live| live.transport.status() == ConnectionStatus::Connected)
        })
    }

    /// Number of live connections
    pub fn connection_count(&self) -> usize {
        self.inner
            .slots
            .iter()
            .filter(|entry| entry.live.is_some())
            .count()
    }

    fn snapshot_of(server_id: ServerId, slot: &ServerSlot, now: Instant) -> ConnectionSnapshot {
        let live = slot.live.as_ref();
        let status = match live {
            Some(live) => live.transport.status(),
            None if slot.attempt.is_some() => ConnectionStatus::Connecting,
            None => ConnectionStatus::Disconnected,
        };
        ConnectionSnapshot {
            server_id,
            status,
            connecting: slot.attempt.is_some(),
            reconnect_pending: slot.retry.is_some(),
            consecutive_failures: slot.failures,
            idle_for: live.map(|l| now.duration_since(l.last_activity)),
            connected_for: live.map(|l| now.duration_since(l.connected_at)),
            server_info: live
                .and_then(|l| l.transport.server_info())
                .map(|info| info.server_info),
        }
    }
}

enum RetryDecision {
    Scheduled { attempt: u32, delay: Duration },
    Exhausted { attempts: u32 },
}

impl PoolInner {
    async fn establish(
        inner: Arc<PoolInner>,
        server_id: ServerId,
        token: u64,
    ) -> BridgeResult<Arc<dyn Transport>> {
        match Self::open_transport(&inner, server_id, token).await {
            Ok((transport, info)) => Self::install(&inner, server_id, token, transport, info).await,
            Err(e) => {
                if let Some(mut slot) = inner.slots.get_mut(&server_id) {
                    if slot.attempt_token == token {
                        slot.attempt = None;
                    }
                }
                inner.slots.remove_if(&server_id, |_, slot| slot.is_vacant());
                Err(e)
            }
        }
    }

    /// Whether `token` is still the attempt the slot is waiting on
    fn owns_attempt(&self, server_id: ServerId, token: u64) -> bool {
        self.slots
            .get(&server_id)
            .is_some_and(|slot| slot.attempt.is_some() && slot.attempt_token == token)
    }

    async fn open_transport(
        inner: &Arc<PoolInner>,
        server_id: ServerId,
        token: u64,
    ) -> BridgeResult<(Arc<dyn Transport>, InitializeResult)> {
        let server = inner
            .servers
            .find_by_id(server_id)
            .await?
            .ok_or_else(|| BridgeError::server_not_found(server_id))?;
        if server.status == ServerStatus::Inactive {
            return Err(BridgeError::validation(format!(
                "server '{}' is inactive",
                server.name
            )));
        }

        if inner.owns_attempt(server_id, token) {
            inner
                .persist(server_id, ConnectionStatus::Connecting, None, None)
                .await;
        }

        let transport = match inner.factory.create(&server) {
            Ok(transport) => transport,
            Err(e) => {
                let message = e.to_string();
                if inner.owns_attempt(server_id, token) {
                    inner
                        .persist(server_id, ConnectionStatus::Error, None, Some(message.clone()))
                        .await;
                }
                return Err(BridgeError::connection(Some(server_id), message));
            }
        };

        debug!(server = %server.name, kind = %transport.kind(), "connecting");
        match transport.connect().await {
            Ok(info) => Ok((transport, info)),
            Err(e) => {
                let message = e.to_string();
                warn!(server = %server.name, error = %message, "connection attempt failed");
                if let Err(close_err) = transport.disconnect().await {
                    debug!(error = %close_err, "error releasing failed transport");
                }
                if inner.owns_attempt(server_id, token) {
                    inner
                        .persist(server_id, ConnectionStatus::Error, None, Some(message.clone()))
                        .await;
                }
                Err(BridgeError::connection(Some(server_id), message))
            }
        }
    }

    async fn install(
        inner: &Arc<PoolInner>,
        server_id: ServerId,
        token: u64,
        transport: Arc<dyn Transport>,
        info: InitializeResult,
    ) -> BridgeResult<Arc<dyn Transport>> {
        if inner.owns_attempt(server_id, token) {
            inner
                .persist(server_id, ConnectionStatus::Connected, Some(info.clone()), None)
                .await;
        }

        let installed = match inner.slots.get_mut(&server_id) {
            Some(mut slot) if slot.attempt.is_some() && slot.attempt_token == token => {
                slot.generation += 1;
                let generation = slot.generation;
                let monitor = tokio::spawn(Self::monitor(
                    Arc::downgrade(inner),
                    server_id,
                    generation,
                    Arc::clone(&transport),
                ));
                let now = Instant::now();
                slot.live = Some(LiveConnection {
                    transport: Arc::clone(&transport),
                    last_activity: now,
                    connected_at: now,
                    generation,
                    monitor,
                });
                slot.attempt = None;
                slot.failures = 0;
                slot.retry = None;
                true
            }
            _ => false,
        };

        if !installed {
            debug!(server_id = %server_id, token, "connection attempt orphaned by remove");
            if let Err(e) = transport.disconnect().await {
                debug!(error = %e, "error closing orphaned transport");
            }
            if !inner.slots.contains_key(&server_id) {
                inner
                    .persist(server_id, ConnectionStatus::Disconnected, None, None)
                    .await;
            }
            return Err(BridgeError::connection(
                Some(server_id),
                "server was removed from the pool while connecting",
            ));
        }

        inner.events.publish(BridgeEvent::ServerConnected {
            server_id,
            server_info: info,
        });
        Ok(transport)
    }

    /// Follow one established transport until it leaves `connected`
    async fn monitor(
        pool: Weak<PoolInner>,
        server_id: ServerId,
        generation: u64,
        transport: Arc<dyn Transport>,
    ) {
        let mut status = transport.watch_status();
        let mut notifications = transport.notifications();
        drop(transport);

        loop {
            let current = *status.borrow_and_update();
            if matches!(current, ConnectionStatus::Disconnected | ConnectionStatus::Error) {
                if let Some(inner) = pool.upgrade() {
                    Self::handle_lost(&inner, server_id, generation, current).await;
                }
                return;
            }

            tokio::select! {
                changed = status.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
                received = notifications.recv() => match received {
                    Ok(notification) => {
                        let Some(inner) = pool.upgrade() else { return };
                        inner.events.publish(BridgeEvent::ServerNotification {
                            server_id,
                            notification,
                        });
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(server_id = %server_id, skipped, "notification forwarding lagged");
                    }
                    Err(RecvError::Closed) => return,
                },
            }
        }
    }

    async fn handle_lost(
        inner: &Arc<PoolInner>,
        server_id: ServerId,
        generation: u64,
        status: ConnectionStatus,
    ) {
        let lost = {
            let Some(mut slot) = inner.slots.get_mut(&server_id) else {
                return;
            };
            let current = slot.live.as_ref().is_some_and(|live| live.generation == generation);
            if current { slot.live.take() } else { None }
        };
        let Some(lost) = lost else { return };

        let reason = format!("transport reported {}", status);
        warn!(server_id = %server_id, %reason, "connection lost");
        if let Err(e) = lost.transport.disconnect().await {
            debug!(error = %e, "error releasing lost transport");
        }
        inner
            .persist(server_id, status, None, Some(reason.clone()))
            .await;
        inner
            .events
            .publish(BridgeEvent::ServerDisconnected { server_id, reason });

        Self::schedule_retry(inner, server_id);
    }

    fn schedule_retry(inner: &Arc<PoolInner>, server_id: ServerId) {
        if inner.shutdown.is_cancelled() {
            return;
        }

        let decision = {
            let Some(mut slot) = inner.slots.get_mut(&server_id) else {
                return;
            };
            if inner.backoff.allows(slot.failures) {
                let delay = inner.backoff.delay_for_attempt(slot.failures);
                slot.failures += 1;
                slot.retry = Some(tokio::spawn(Self::reconnect_after(
                    Arc::downgrade(inner),
                    server_id,
                    delay,
                )));
                RetryDecision::Scheduled {
                    attempt: slot.failures,
                    delay,
                }
            } else {
                let attempts = slot.failures;
                slot.failures = 0;
                slot.retry = None;
                RetryDecision::Exhausted { attempts }
            }
        };

        match decision {
            RetryDecision::Scheduled { attempt, delay } => {
                info!(
                    server_id = %server_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "reconnect scheduled"
                );
                inner.events.publish(BridgeEvent::ReconnectScheduled {
                    server_id,
                    attempt,
                    delay,
                });
            }
            RetryDecision::Exhausted { attempts } => {
                inner.slots.remove_if(&server_id, |_, slot| slot.is_vacant());
                warn!(server_id = %server_id, attempts, "reconnect attempts exhausted");
                inner
                    .events
                    .publish(BridgeEvent::ConnectionLost { server_id, attempts });
            }
        }
    }

    async fn reconnect_after(pool: Weak<PoolInner>, server_id: ServerId, delay: Duration) {
        tokio::time::sleep(delay).await;
        let Some(inner) = pool.upgrade() else { return };
        if inner.shutdown.is_cancelled() {
            return;
        }

        let pool = ConnectionPool {
            inner: Arc::clone(&inner),
        };
        match pool.get_connection(server_id).await {
            Ok(_) => info!(server_id = %server_id, "reconnected"),
            Err(e) if e.is_not_found() || matches!(e, BridgeError::Validation(_)) => {
                debug!(server_id = %server_id, error = %e, "abandoning reconnect");
                if let Some(mut slot) = inner.slots.get_mut(&server_id) {
                    slot.retry = None;
                    slot.failures = 0;
                }
                inner.slots.remove_if(&server_id, |_, slot| slot.is_vacant());
            }
            Err(e) => {
                warn!(server_id = %server_id, error = %e, "reconnect failed");
                Self::schedule_retry(&inner, server_id);
            }
        }
    }

    /// Returns whether the slot held a live connection
    async fn close_slot(
        inner: &Arc<PoolInner>,
        server_id: ServerId,
        slot: ServerSlot,
        reason: CloseReason,
    ) -> bool {
        if let Some(retry) = slot.retry {
            retry.abort();
        }
        match slot.live {
            Some(live) => {
                Self::close_live(inner, server_id, live, reason).await;
                true
            }
            None => false,
        }
    }

    async fn close_live(
        inner: &Arc<PoolInner>,
        server_id: ServerId,
        live: LiveConnection,
        reason: CloseReason,
    ) {
        live.monitor.abort();
        if let Err(e) = live.transport.disconnect().await {
            warn!(server_id = %server_id, error = %e, "error disconnecting transport");
        }
        inner
            .persist(server_id, ConnectionStatus::Disconnected, None, None)
            .await;
        debug!(server_id = %server_id, reason = reason.as_str(), "connection closed");
        inner
            .events
            .publish(BridgeEvent::ConnectionClosed { server_id, reason });
    }

    /// Status writes are best effort; a deleted server is not an error here
    async fn persist(
        &self,
        server_id: ServerId,
        status: ConnectionStatus,
        info: Option<InitializeResult>,
        error: Option<String>,
    ) {
        match self
            .servers
            .update_connection_status(server_id, status, info, error)
            .await
        {
            Ok(()) => {}
            Err(StoreError::NotFound { .. }) => {
                debug!(server_id = %server_id, %status, "server record gone; status not persisted");
            }
            Err(e) => {
                warn!(server_id = %server_id, %status, error = %e, "failed to persist connection status");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ServerDescriptor, StdioConfig, TransportConfig};
    use crate::mcp::McpError;
    use crate::store::MockServerStore;

    struct NoTransports;

    impl TransportFactory for NoTransports {
        fn create(&self, _server: &ServerDescriptor) -> Result<Arc<dyn Transport>, McpError> {
            Err(McpError::connection("no carrier available"))
        }
    }

    #[tokio::test]
    async fn test_failed_initial_connect_persists_error_without_retry() {
        let server = ServerDescriptor::new("files", TransportConfig::Stdio(StdioConfig::new("mcp")));
        let server_id = server.id;

        let mut store = MockServerStore::new();
        store
            .expect_find_by_id()
            .returning(move |_| Ok(Some(server.clone())));
        store
            .expect_update_connection_status()
            .withf(|_, status, _, _| *status == ConnectionStatus::Connecting)
            .times(1)
            .returning(|_, _, _, _| Ok(()));
        store
            .expect_update_connection_status()
            .withf(|_, status, _, error| {
                *status == ConnectionStatus::Error
                    && error.as_deref().is_some_and(|e| e.contains("no carrier"))
            })
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        let pool = ConnectionPool::new(
            Arc::new(store),
            Arc::new(NoTransports),
            PoolConfig::default(),
            EventBus::default(),
        );

        let err = pool.get_connection(server_id).await.err().unwrap();
        assert_eq!(err.error_code(), "CONNECTION_ERROR");
        assert!(pool.get_connection_status().is_empty());
        assert!(!pool.is_connected(server_id));
    }

    #[tokio::test]
    async fn test_unknown_server_is_not_found() {
        let mut store = MockServerStore::new();
        store.expect_find_by_id().returning(|_| Ok(None));

        let pool = ConnectionPool::new(
            Arc::new(store),
            Arc::new(NoTransports),
            PoolConfig::default(),
            EventBus::default(),
        );

        let err = pool.get_connection(ServerId::new()).await.err().unwrap();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_inactive_server_is_refused() {
        let mut server = ServerDescriptor::new("files", TransportConfig::Stdio(StdioConfig::new("mcp")));
        server.status = ServerStatus::Inactive;
        let server_id = server.id;

        let mut store = MockServerStore::new();
        store
            .expect_find_by_id()
            .returning(move |_| Ok(Some(server.clone())));
        store.expect_update_connection_status().never();

        let pool = ConnectionPool::new(
            Arc::new(store),
            Arc::new(NoTransports),
            PoolConfig::default(),
            EventBus::default(),
        );

        let err = pool.get_connection(server_id).await.err().unwrap();
        assert!(matches!(err, BridgeError::Validation(_)));
    }

    #[tokio::test]
    async fn test_stopped_pool_refuses_connections() {
        let pool = ConnectionPool::new(
            Arc::new(MockServerStore::new()),
            Arc::new(NoTransports),
            PoolConfig::default(),
            EventBus::default(),
        );
        pool.start();
        pool.stop().await;

        let err = pool.get_connection(ServerId::new()).await.err().unwrap();
        assert_eq!(err.error_code(), "CONNECTION_ERROR");
        assert!(!pool.remove(ServerId::new()).await);
    }
}
