// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Connection to one tool-server.
//!
//! A [`Connection`] owns one transport at a time and runs two kinds of
//! background task:
//!
//! - a **supervisor** that opens the transport, performs the handshake
//!   (`initialize`, `notifications/initialized`, paginated `tools/list`),
//!   waits for failure, and schedules reconnects with backoff;
//! - a **reader** per transport generation that decodes inbound frames,
//!   completes pending requests, answers server requests, and publishes
//!   notifications.
//!
//! Every state change is published as a [`ConnectionEvent`] and bumps the
//! bridge-wide epoch when the connection enters or leaves Ready. The state is
//! always written before the epoch moves, so an observer that sees the new
//! epoch also sees the new state.

pub mod backoff;
pub mod events;
pub mod pending;
pub mod state;

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant as StdInstant};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use crate::config::{BridgeSettings, ServerConfig};
use crate::error::{BridgeError, BridgeResult};
use crate::protocol::{self, methods, CorrelationId, CorrelationIdGenerator, Incoming, RpcError};
use crate::telemetry::Metrics;
use crate::transport::{
    event_channel, EventReceiver, EventSender, Transport, TransportError, TransportEvent,
    TransportSettings,
};
use crate::types::{ServerInfo, ToolDefinition};

pub use backoff::Backoff;
pub use events::ConnectionEvent;
pub use pending::{PendingOutcome, PendingTable, PendingTicket};
pub use state::ConnectionState;

/// Capacity of each connection's event channel.
pub const EVENT_CAPACITY: usize = 64;

/// Bridge-wide pieces every connection shares.
#[derive(Clone)]
pub struct ConnectionContext {
    pub settings: Arc<BridgeSettings>,
    pub ids: Arc<CorrelationIdGenerator>,
    /// Bumped on every Ready/non-Ready transition and tool list change.
    pub epoch: Arc<AtomicU64>,
    /// Orders Ready transitions across connections.
    pub ready_clock: Arc<AtomicU64>,
    pub metrics: Arc<Metrics>,
}

impl ConnectionContext {
    pub fn new(settings: BridgeSettings) -> Self {
        Self {
            settings: Arc::new(settings),
            ids: Arc::new(CorrelationIdGenerator::new()),
            epoch: Arc::new(AtomicU64::new(0)),
            ready_clock: Arc::new(AtomicU64::new(0)),
            metrics: Arc::new(Metrics::new()),
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    fn bump_epoch(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }
}

/// Counters kept per connection.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStats {
    pub frames_sent: u64,
    pub reconnect_attempts: u64,
    pub last_error: Option<String>,
    pub last_ready_at: Option<DateTime<Utc>>,
    pub in_flight: usize,
}

/// One transport generation.
struct Link {
    transport: Transport,
    /// Sender side of this generation's event channel, used to report send
    /// failures the transport itself did not observe.
    events: EventSender,
    cancel: CancellationToken,
    generation: u64,
}

struct Failure {
    generation: u64,
    error: TransportError,
}

struct Shared {
    config: Arc<ServerConfig>,
    ctx: ConnectionContext,
    state: RwLock<ConnectionState>,
    tools: RwLock<Vec<ToolDefinition>>,
    info: RwLock<Option<ServerInfo>>,
    link: RwLock<Option<Arc<Link>>>,
    pending: PendingTable,
    events: broadcast::Sender<ConnectionEvent>,
    failures: mpsc::Sender<Failure>,
    cancel: CancellationToken,
    frames_sent: AtomicU64,
    reconnect_attempts: AtomicU64,
    ready_stamp: AtomicU64,
    last_error: RwLock<Option<String>>,
    last_ready_at: RwLock<Option<DateTime<Utc>>>,
}

/// A live connection to one tool-server.
pub struct Connection {
    shared: Arc<Shared>,
    failures_rx: Mutex<Option<mpsc::Receiver<Failure>>>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    /// Create a connection in `Disconnected`. Nothing happens until
    /// [`start`](Self::start).
    pub fn new(config: ServerConfig, ctx: ConnectionContext) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (failures, failures_rx) = mpsc::channel(8);
        Self {
            shared: Arc::new(Shared {
                config: Arc::new(config),
                ctx,
                state: RwLock::new(ConnectionState::Disconnected),
                tools: RwLock::new(Vec::new()),
                info: RwLock::new(None),
                link: RwLock::new(None),
                pending: PendingTable::new(),
                events,
                failures,
                cancel: CancellationToken::new(),
                frames_sent: AtomicU64::new(0),
                reconnect_attempts: AtomicU64::new(0),
                ready_stamp: AtomicU64::new(0),
                last_error: RwLock::new(None),
                last_ready_at: RwLock::new(None),
            }),
            failures_rx: Mutex::new(Some(failures_rx)),
            supervisor: Mutex::new(None),
        }
    }

    /// Spawn the supervisor. Calling it twice is a no-op.
    pub fn start(&self) {
        let Some(failures_rx) = self.failures_rx.lock().take() else {
            return;
        };
        let handle = tokio::spawn(supervise(Arc::clone(&self.shared), failures_rx));
        *self.supervisor.lock() = Some(handle);
    }

    pub fn id(&self) -> &str {
        &self.shared.config.id
    }

    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.read()
    }

    pub fn is_ready(&self) -> bool {
        self.state().is_ready()
    }

    /// Advertised tools; empty unless Ready.
    pub fn tools(&self) -> Vec<ToolDefinition> {
        if !self.is_ready() {
            return Vec::new();
        }
        self.shared.tools.read().clone()
    }

    pub fn server_info(&self) -> Option<ServerInfo> {
        self.shared.info.read().clone()
    }

    /// Monotonic stamp of the last Ready transition; higher is more recent.
    pub fn ready_stamp(&self) -> u64 {
        self.shared.ready_stamp.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.shared.events.subscribe()
    }

    pub fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            frames_sent: self.shared.frames_sent.load(Ordering::Relaxed),
            reconnect_attempts: self.shared.reconnect_attempts.load(Ordering::Relaxed),
            last_error: self.shared.last_error.read().clone(),
            last_ready_at: *self.shared.last_ready_at.read(),
            in_flight: self.shared.pending.len(),
        }
    }

    /// Invoke a tool on this server.
    ///
    /// The owner must be Ready. The call is sent once; a transport failure
    /// while in flight surfaces as a retryable error, never a silent retry.
    #[cfg_attr(feature = "telemetry", instrument(skip(self, arguments), fields(server = %self.id())))]
    pub async fn call_tool(
        &self,
        tool: &str,
        arguments: &Value,
        timeout: Duration,
    ) -> BridgeResult<Value> {
        let link = self.shared.ready_link()?;
        let params = methods::tools_call_params(tool, arguments);
        match self
            .shared
            .request(&link, methods::TOOLS_CALL, Some(params), timeout)
            .await
        {
            Err(BridgeError::Timeout { timeout_ms, .. }) => Err(BridgeError::Timeout {
                method: tool.to_string(),
                timeout_ms,
            }),
            other => other,
        }
    }

    /// Wait until the connection reaches `target`, or give up after
    /// `timeout`. Returns the state observed last.
    pub async fn wait_for_state(
        &self,
        target: ConnectionState,
        timeout: Duration,
    ) -> ConnectionState {
        let mut events = self.subscribe();
        let deadline = Instant::now() + timeout;
        loop {
            let current = self.state();
            if current == target || (current.is_terminal() && target != current) {
                return current;
            }
            match tokio::time::timeout_at(deadline, events.recv()).await {
                Err(_) => return self.state(),
                Ok(Err(broadcast::error::RecvError::Closed)) => return self.state(),
                Ok(_) => continue,
            }
        }
    }

    /// Close the transport, fail in-flight calls, and move to Closed.
    pub async fn shutdown(&self) {
        self.shared.cancel.cancel();
        let handle = self.supervisor.lock().take();
        match handle {
            Some(handle) => {
                if let Err(e) = handle.await {
                    warn!(server = %self.id(), "Supervisor task failed: {}", e);
                }
            }
            None => {
                self.shared
                    .teardown(TransportError::Closed("connection shut down".into()))
                    .await;
                self.shared.transition(ConnectionState::Closed, None);
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

impl Shared {
    fn id(&self) -> &str {
        &self.config.id
    }

    fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Move to `to`. Returns false when the move is not permitted.
    fn transition(&self, to: ConnectionState, error: Option<String>) -> bool {
        let from = {
            let mut state = self.state.write();
            let from = *state;
            if !from.can_transition_to(to) {
                return false;
            }
            *state = to;
            from
        };

        if to.is_ready() {
            let stamp = self.ctx.ready_clock.fetch_add(1, Ordering::SeqCst) + 1;
            self.ready_stamp.store(stamp, Ordering::SeqCst);
            *self.last_ready_at.write() = Some(Utc::now());
        }
        if let Some(message) = &error {
            *self.last_error.write() = Some(message.clone());
        }
        if from.is_ready() || to.is_ready() {
            self.ctx.bump_epoch();
        }

        match &error {
            Some(message) => info!(server = %self.id(), from = %from, state = %to, "Connection state changed: {}", message),
            None => info!(server = %self.id(), from = %from, state = %to, "Connection state changed"),
        }
        let _ = self.events.send(ConnectionEvent::StateChanged {
            server_id: self.config.id.clone(),
            from,
            to,
            error,
        });
        true
    }

    fn ready_link(&self) -> BridgeResult<Arc<Link>> {
        let state = self.state();
        if !state.is_ready() {
            return Err(BridgeError::NotReady {
                server: self.config.id.clone(),
                state,
            });
        }
        self.link.read().clone().ok_or_else(|| BridgeError::NotReady {
            server: self.config.id.clone(),
            state,
        })
    }

    async fn send_frame(&self, link: &Link, frame: Vec<u8>) -> Result<(), TransportError> {
        if let Err(e) = link.transport.send(frame).await {
            // Let the reader drive the degrade path.
            let _ = link.events.try_send(TransportEvent::Closed(e.clone()));
            return Err(e);
        }
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Send a request on `link` and wait for its outcome.
    async fn request(
        &self,
        link: &Link,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> BridgeResult<Value> {
        let id = self.ctx.ids.next_id();
        let deadline = Instant::now() + timeout;
        let mut ticket = self
            .pending
            .register(id.clone(), method, deadline)
            .map_err(|e| BridgeError::transport(self.id(), e))?;

        let frame = protocol::encode_request(&id, method, params.as_ref())?;
        trace!(server = %self.id(), id = %id, method, "Sending request");
        self.send_frame(link, frame)
            .await
            .map_err(|e| BridgeError::transport(self.id(), e))?;

        match ticket.wait_until(deadline).await {
            None => {
                debug!(server = %self.id(), id = %id, method, "Request timed out");
                Err(BridgeError::Timeout {
                    method: method.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
            Some(PendingOutcome::Response(Ok(result))) => Ok(result),
            Some(PendingOutcome::Response(Err(error))) => Err(BridgeError::ServerError {
                server: self.config.id.clone(),
                code: error.code,
                message: error.message,
                data: error.data,
            }),
            Some(PendingOutcome::Failed(error)) => Err(BridgeError::transport(self.id(), error)),
        }
    }

    async fn notify(&self, link: &Link, method: &str, params: Option<Value>) -> BridgeResult<()> {
        let frame = protocol::encode_notification(method, params.as_ref())?;
        self.send_frame(link, frame)
            .await
            .map_err(|e| BridgeError::transport(self.id(), e))
    }

    /// Open a new transport generation and run the handshake on it.
    async fn establish(
        self: &Arc<Self>,
        generation: u64,
        failures: &mut mpsc::Receiver<Failure>,
    ) -> BridgeResult<()> {
        self.pending.reopen();
        let settings = TransportSettings::new(&self.config, &self.ctx.settings);
        let (events_tx, events_rx) = event_channel();
        let transport = Transport::open(&self.config, &settings, events_tx.clone())
            .await
            .map_err(|e| BridgeError::transport(self.id(), e))?;

        let link = Arc::new(Link {
            transport,
            events: events_tx,
            cancel: CancellationToken::new(),
            generation,
        });
        *self.link.write() = Some(Arc::clone(&link));
        tokio::spawn(read_loop(
            Arc::clone(self),
            Arc::clone(&link),
            events_rx,
            self.failures.clone(),
        ));

        tokio::select! {
            biased;
            error = next_failure(failures, generation) => Err(BridgeError::transport(self.id(), error)),
            result = self.handshake(&link) => result,
        }
    }

    async fn handshake(&self, link: &Link) -> BridgeResult<()> {
        let timeout = self.ctx.settings.startup_timeout();
        let result = self
            .request(link, methods::INITIALIZE, Some(methods::initialize_params()), timeout)
            .await?;
        let info = methods::parse_initialize_result(&result)?;
        self.notify(link, methods::INITIALIZED, None).await?;

        let tools = self.fetch_tools(link).await?;
        info!(
            server = %self.id(),
            remote = %info.name,
            version = %info.version,
            tools = tools.len(),
            "Handshake complete"
        );
        *self.info.write() = Some(info);
        *self.tools.write() = tools;
        Ok(())
    }

    /// Page through `tools/list`, applying the allow-list and the per-server cap.
    async fn fetch_tools(&self, link: &Link) -> BridgeResult<Vec<ToolDefinition>> {
        let timeout = self.ctx.settings.startup_timeout();
        let max = self.ctx.settings.max_tools_per_server;
        let mut tools = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor: Option<String> = None;

        loop {
            let result = self
                .request(link, methods::TOOLS_LIST, methods::tools_list_params(cursor.as_deref()), timeout)
                .await?;
            let page = methods::parse_tools_page(&self.config.id, &result)?;
            if page.skipped > 0 {
                warn!(server = %self.id(), skipped = page.skipped, "Ignoring tools without a name");
            }

            for tool in page.tools {
                if !self.config.is_tool_allowed(&tool.name) {
                    debug!(server = %self.id(), tool = %tool.name, "Tool not in allow-list");
                    continue;
                }
                if !seen.insert(tool.name.clone()) {
                    warn!(server = %self.id(), tool = %tool.name, "Duplicate tool name; keeping the first");
                    continue;
                }
                if tools.len() >= max {
                    warn!(server = %self.id(), max, "Tool list truncated");
                    return Ok(tools);
                }
                tools.push(tool);
            }

            match page.next_cursor {
                Some(next) if cursor.as_deref() != Some(next.as_str()) => cursor = Some(next),
                _ => break,
            }
        }

        Ok(tools)
    }

    /// Re-fetch the tool list after a `list_changed` notification.
    async fn refresh_tools(&self, link: Arc<Link>) {
        let started = StdInstant::now();
        let tools = match self.fetch_tools(&link).await {
            Ok(tools) => tools,
            Err(e) => {
                warn!(server = %self.id(), "Tool refresh failed: {}", e);
                return;
            }
        };

        let current = self.link.read().as_ref().map(|l| l.generation);
        if current != Some(link.generation) || !self.state().is_ready() {
            return;
        }
        let count = tools.len();
        *self.tools.write() = tools;
        self.ctx.bump_epoch();
        self.ctx.metrics.record_operation("tool_refresh", started.elapsed());
        info!(server = %self.id(), tools = count, "Tool list refreshed");
        let _ = self.events.send(ConnectionEvent::ToolListChanged {
            server_id: self.config.id.clone(),
            tool_count: count,
        });
    }

    async fn handle_frame(self: &Arc<Self>, link: &Arc<Link>, frame: &[u8]) {
        let message = match protocol::decode(frame) {
            Ok(message) => message,
            Err(e) => {
                warn!(server = %self.id(), "Dropping malformed frame: {}", e);
                self.ctx.metrics.record_dropped_frame();
                return;
            }
        };
        trace!(server = %self.id(), kind = message.kind(), "Frame received");

        match message {
            Incoming::Response(response) => {
                if !self.pending.complete(&response.id, response.outcome) {
                    debug!(server = %self.id(), id = %response.id, "Dropping response with unknown id");
                    self.ctx.metrics.record_dropped_frame();
                }
            }
            Incoming::Notification(notification) => {
                if notification.method == methods::TOOLS_LIST_CHANGED && self.state().is_ready() {
                    let shared = Arc::clone(self);
                    let link = Arc::clone(link);
                    tokio::spawn(async move { shared.refresh_tools(link).await });
                }
                let _ = self.events.send(ConnectionEvent::Notification {
                    server_id: self.config.id.clone(),
                    method: notification.method,
                    params: notification.params,
                });
            }
            Incoming::Request(request) => {
                if !link.transport.supports_server_push() {
                    debug!(server = %self.id(), method = %request.method, "Cannot reply over this transport");
                    return;
                }
                let outcome = match request.method.as_str() {
                    methods::PING => Ok(json!({})),
                    other => Err(RpcError::method_not_found(other)),
                };
                self.reply(link, &request.id, &outcome).await;
            }
        }
    }

    async fn reply(&self, link: &Link, id: &CorrelationId, outcome: &Result<Value, RpcError>) {
        let frame = match protocol::encode_response(id, outcome) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(server = %self.id(), "Failed to encode reply: {}", e);
                return;
            }
        };
        if let Err(e) = self.send_frame(link, frame).await {
            debug!(server = %self.id(), id = %id, "Reply not sent: {}", e);
        }
    }

    /// Drop the current transport and fail everything in flight.
    async fn teardown(&self, error: TransportError) {
        let link = self.link.write().take();
        let failed = self.pending.fail_all(error);
        if failed > 0 {
            debug!(server = %self.id(), failed, "Failed in-flight requests");
        }
        if let Some(link) = link {
            link.cancel.cancel();
            link.transport.close().await;
        }
        self.tools.write().clear();
    }

    fn count_reconnect(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
        self.ctx.metrics.record_reconnect();
    }
}

/// Wait for a failure from `generation`, skipping stale ones.
async fn next_failure(failures: &mut mpsc::Receiver<Failure>, generation: u64) -> TransportError {
    loop {
        match failures.recv().await {
            Some(failure) if failure.generation == generation => return failure.error,
            Some(_) => continue,
            None => return TransportError::Closed("failure channel closed".into()),
        }
    }
}

async fn sleep_or_cancel(cancel: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

async fn supervise(shared: Arc<Shared>, mut failures: mpsc::Receiver<Failure>) {
    let mut backoff = Backoff::new(shared.ctx.settings.reconnect.clone());
    let startup = shared.ctx.settings.startup_timeout();
    let mut generation = 0u64;

    loop {
        if shared.cancel.is_cancelled() {
            break;
        }
        shared.transition(ConnectionState::Connecting, None);
        generation += 1;
        let started = StdInstant::now();

        let attempt = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => break,
            result = tokio::time::timeout(startup, shared.establish(generation, &mut failures)) => result,
        };
        let result = attempt.unwrap_or_else(|_| {
            Err(BridgeError::Timeout {
                method: "handshake".to_string(),
                timeout_ms: startup.as_millis() as u64,
            })
        });

        match result {
            Ok(()) => {
                backoff.reset();
                shared.ctx.metrics.record_operation("handshake", started.elapsed());
                shared.transition(ConnectionState::Ready, None);

                let error = tokio::select! {
                    biased;
                    _ = shared.cancel.cancelled() => break,
                    error = next_failure(&mut failures, generation) => error,
                };

                warn!(server = %shared.id(), "Transport failed: {}", error);
                shared.ctx.metrics.record_transport_failure();
                shared.transition(ConnectionState::Degraded, Some(error.to_string()));
                shared.teardown(error).await;

                shared.count_reconnect();
                if !sleep_or_cancel(&shared.cancel, backoff.degraded_delay()).await {
                    break;
                }
            }
            Err(e) => {
                let message = e.to_string();
                shared
                    .teardown(TransportError::Connect(message.clone()))
                    .await;

                match backoff.next_delay() {
                    None => {
                        warn!(server = %shared.id(), attempts = backoff.attempts(), "Giving up: {}", message);
                        shared.transition(ConnectionState::Closed, Some(message));
                        return;
                    }
                    Some(delay) => {
                        warn!(
                            server = %shared.id(),
                            attempt = backoff.attempts(),
                            delay_ms = delay.as_millis() as u64,
                            "Connect failed: {}",
                            message
                        );
                        shared.transition(ConnectionState::Disconnected, Some(message));
                        shared.count_reconnect();
                        if !sleep_or_cancel(&shared.cancel, delay).await {
                            break;
                        }
                    }
                }
            }
        }
    }

    shared
        .teardown(TransportError::Closed("connection shut down".into()))
        .await;
    shared.transition(ConnectionState::Closed, None);
}

async fn read_loop(
    shared: Arc<Shared>,
    link: Arc<Link>,
    mut events: EventReceiver,
    failures: mpsc::Sender<Failure>,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = link.cancel.cancelled() => return,
            event = events.recv() => event,
        };
        match event {
            Some(TransportEvent::Frame(frame)) => shared.handle_frame(&link, &frame).await,
            Some(TransportEvent::Closed(error)) => {
                let _ = failures
                    .send(Failure {
                        generation: link.generation,
                        error,
                    })
                    .await;
                return;
            }
            None => return,
        }
    }
}
