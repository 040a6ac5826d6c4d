/// BusClient - the client SDK connection manager
///
/// One background actor owns the socket and the connection state machine:
///
///   Disconnected -> Connecting -> Connected -> (loss) -> Reconnecting
///                                     |                      |
///                                     +---- Disconnected <---+ (ceiling hit)
///
/// While not connected, publishes queue locally (bounded) and flush in
/// original order once the connection is back. On every (re)connect the
/// actor re-issues the handshake, restores all registered subscriptions,
/// flushes the queue, and requests replay of events above its ack floor
/// before live delivery resumes.
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rand::Rng;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::arguments::is_debug_client_enabled;
use crate::broker::topic;
use crate::broker::Event;
use crate::logger::{self, LogTag};
use crate::webserver::ws::message::{ClientFrame, PROTOCOL_VERSION};

use super::handler::{EventHandler, HandlerOutcome};
use super::queue::{OutboundQueue, QueuedPublish};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// How long the welcome frame may take after hello
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Recently handled event ids kept for duplicate suppression
const HANDLED_CACHE_SIZE: usize = 1024;

// ============================================================================
// PUBLIC TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    #[error("local outbound queue full")]
    QueueFull,

    #[error("invalid pattern: {0}")]
    InvalidPattern(String),

    #[error("client closed")]
    Closed,
}

/// Connection options; defaults come from the client section of the config
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Broker endpoint, e.g. "ws://127.0.0.1:8650/ws"
    pub url: String,

    /// Stable identity from a previous session, if any
    pub client_id: Option<String>,

    pub reconnect_base_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
    pub reconnect_max_attempts: u32,
    pub outbound_queue_size: usize,
    pub heartbeat_secs: u64,
}

impl ClientOptions {
    pub fn new(url: impl Into<String>) -> Self {
        crate::config::with_config(|cfg| Self {
            url: url.into(),
            client_id: None,
            reconnect_base_delay_ms: cfg.client.reconnect_base_delay_ms,
            reconnect_max_delay_ms: cfg.client.reconnect_max_delay_ms,
            reconnect_max_attempts: cfg.client.reconnect_max_attempts,
            outbound_queue_size: cfg.client.outbound_queue_size,
            heartbeat_secs: cfg.client.heartbeat_secs,
        })
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }
}

/// Publish options
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    pub priority: Option<u8>,
    pub correlation_id: Option<String>,

    /// Set by handlers that publish from inside handle(); feeds the
    /// broker's recursion guard
    pub depth: u32,
}

/// Subscribe options
#[derive(Debug, Clone, Default)]
pub struct SubscribeOptions {
    pub filter: Option<crate::broker::PayloadFilter>,
    pub priority_filter: Option<u8>,
    pub durable: bool,
}

/// Out-of-band notifications for the owning process
#[derive(Debug, Clone)]
pub enum ClientNotification {
    Connected { client_id: String },
    ConnectionLost { reason: String },
    Reconnecting { attempt: u32 },
    /// Reconnect ceiling hit; the client is dead
    FatalConnectivity { reason: String },
}

// ============================================================================
// COMMANDS (public handle -> actor)
// ============================================================================

struct SubscriptionSpec {
    pattern: String,
    options: SubscribeOptions,
    handler: Arc<dyn EventHandler>,
}

enum Command {
    Publish {
        publish: QueuedPublish,
        reply: oneshot::Sender<Result<(), ClientError>>,
    },
    Subscribe {
        spec: SubscriptionSpec,
        reply: oneshot::Sender<String>,
    },
    Unsubscribe {
        local_id: String,
    },
    Disconnect,
}

/// Handler completion routed back to the actor for acking
struct HandlerDone {
    event_id: String,
    version: u64,
    outcome: HandlerOutcome,
}

// ============================================================================
// BUS CLIENT (public handle)
// ============================================================================

pub struct BusClient {
    cmd_tx: mpsc::Sender<Command>,
    state_rx: watch::Receiver<ClientState>,
    notifications: Mutex<Option<mpsc::Receiver<ClientNotification>>>,
    client_id: Arc<Mutex<Option<String>>>,
}

impl BusClient {
    /// Connect to the broker, retrying with backoff until the ceiling.
    pub async fn connect(options: ClientOptions) -> Result<Self, ClientError> {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (state_tx, state_rx) = watch::channel(ClientState::Disconnected);
        let (notify_tx, notify_rx) = mpsc::channel(64);
        let (ready_tx, ready_rx) = oneshot::channel();
        let client_id = Arc::new(Mutex::new(options.client_id.clone()));

        let actor = ClientActor {
            options,
            cmd_rx,
            state_tx,
            notify_tx,
            client_id: client_id.clone(),
            registrations: Vec::new(),
            pending_subscribes: VecDeque::new(),
            server_to_local: HashMap::new(),
            outbound: None,
            last_ack_version: 0,
            handled_ids: HashSet::new(),
            handled_order: VecDeque::new(),
            next_local_id: 0,
        };

        tokio::spawn(actor.run(Some(ready_tx)));

        ready_rx.await.map_err(|_| ClientError::Closed)??;

        Ok(Self {
            cmd_tx,
            state_rx,
            notifications: Mutex::new(Some(notify_rx)),
            client_id,
        })
    }

    /// Publish an event. Queued locally while disconnected; errs only on
    /// structural problems or a full local queue.
    pub async fn publish(
        &self,
        topic: impl Into<String>,
        payload: serde_json::Value,
        options: PublishOptions,
    ) -> Result<(), ClientError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Publish {
                publish: QueuedPublish {
                    topic: topic.into(),
                    payload,
                    priority: options.priority,
                    correlation_id: options.correlation_id,
                    depth: options.depth,
                },
                reply,
            })
            .await
            .map_err(|_| ClientError::Closed)?;
        rx.await.map_err(|_| ClientError::Closed)?
    }

    /// Register a handler for a pattern. Returns a local subscription id
    /// that stays valid across reconnects.
    pub async fn subscribe(
        &self,
        pattern: impl Into<String>,
        options: SubscribeOptions,
        handler: Arc<dyn EventHandler>,
    ) -> Result<String, ClientError> {
        let pattern = pattern.into();
        topic::validate_pattern(&pattern).map_err(|e| ClientError::InvalidPattern(e.to_string()))?;

        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Subscribe {
                spec: SubscriptionSpec {
                    pattern,
                    options,
                    handler,
                },
                reply,
            })
            .await
            .map_err(|_| ClientError::Closed)?;
        rx.await.map_err(|_| ClientError::Closed)
    }

    pub async fn unsubscribe(&self, local_id: impl Into<String>) -> Result<(), ClientError> {
        self.cmd_tx
            .send(Command::Unsubscribe {
                local_id: local_id.into(),
            })
            .await
            .map_err(|_| ClientError::Closed)
    }

    /// Close the connection and stop the actor
    pub async fn disconnect(&self) {
        let _ = self.cmd_tx.send(Command::Disconnect).await;
    }

    pub fn state(&self) -> ClientState {
        *self.state_rx.borrow()
    }

    /// The stable client id (known once connected)
    pub fn client_id(&self) -> Option<String> {
        self.client_id.lock().clone()
    }

    /// Take the notification stream (first caller wins)
    pub fn notifications(&self) -> Option<mpsc::Receiver<ClientNotification>> {
        self.notifications.lock().take()
    }
}

// ============================================================================
// ACTOR
// ============================================================================

struct Registration {
    local_id: String,
    spec: SubscriptionSpec,
    server_id: Option<String>,
}

enum SessionEnd {
    /// User asked to disconnect
    Closed,
    /// Socket lost; reconnect
    Lost(String),
}

struct ClientActor {
    options: ClientOptions,
    cmd_rx: mpsc::Receiver<Command>,
    state_tx: watch::Sender<ClientState>,
    notify_tx: mpsc::Sender<ClientNotification>,
    client_id: Arc<Mutex<Option<String>>>,

    registrations: Vec<Registration>,
    /// Local ids awaiting Subscribed frames, FIFO (server replies in order)
    pending_subscribes: VecDeque<String>,
    server_to_local: HashMap<String, String>,

    outbound: Option<OutboundQueue>,

    /// Highest version this client has acked
    last_ack_version: u64,

    /// Recently handled event ids: duplicates are re-acked, not re-handled
    handled_ids: HashSet<String>,
    handled_order: VecDeque<String>,

    next_local_id: u64,
}

impl ClientActor {
    async fn run(mut self, mut ready: Option<oneshot::Sender<Result<(), ClientError>>>) {
        self.outbound = Some(OutboundQueue::new(self.options.outbound_queue_size));
        let mut attempt: u32 = 0;

        loop {
            let state = if attempt == 0 && ready.is_some() {
                ClientState::Connecting
            } else {
                ClientState::Reconnecting
            };
            let _ = self.state_tx.send(state);

            match self.establish().await {
                Ok((ws_tx, ws_rx)) => {
                    attempt = 0;
                    let _ = self.state_tx.send(ClientState::Connected);
                    if let Some(ready) = ready.take() {
                        let _ = ready.send(Ok(()));
                    }
                    let connected_id = self.client_id.lock().clone().unwrap_or_default();
                    let _ = self
                        .notify_tx
                        .try_send(ClientNotification::Connected {
                            client_id: connected_id,
                        });

                    match self.session(ws_tx, ws_rx).await {
                        SessionEnd::Closed => {
                            let _ = self.state_tx.send(ClientState::Disconnected);
                            return;
                        }
                        SessionEnd::Lost(reason) => {
                            logger::warning(
                                LogTag::Client,
                                &format!("Connection lost: {} - reconnecting", reason),
                            );
                            let _ = self
                                .notify_tx
                                .try_send(ClientNotification::ConnectionLost { reason });
                        }
                    }
                }
                Err(e) => {
                    attempt += 1;
                    if attempt >= self.options.reconnect_max_attempts {
                        let reason = format!(
                            "gave up after {} attempts: {}",
                            attempt, e
                        );
                        logger::error(LogTag::Client, &reason);
                        let _ = self
                            .notify_tx
                            .try_send(ClientNotification::FatalConnectivity {
                                reason: reason.clone(),
                            });
                        if let Some(ready) = ready.take() {
                            let _ = ready.send(Err(ClientError::ConnectFailed(reason)));
                        }
                        let _ = self.state_tx.send(ClientState::Disconnected);
                        return;
                    }

                    let delay = backoff_with_jitter(
                        self.options.reconnect_base_delay_ms,
                        self.options.reconnect_max_delay_ms,
                        attempt,
                    );
                    if is_debug_client_enabled() {
                        logger::debug(
                            LogTag::Client,
                            &format!(
                                "Reconnect attempt {} failed ({}); retrying in {:?}",
                                attempt, e, delay
                            ),
                        );
                    }
                    let _ = self
                        .notify_tx
                        .try_send(ClientNotification::Reconnecting { attempt });

                    // Keep serving commands (queueing publishes) during backoff
                    if self.wait_with_commands(delay).await {
                        let _ = self.state_tx.send(ClientState::Disconnected);
                        return;
                    }
                }
            }
        }
    }

    /// Connect, handshake, restore subscriptions, flush the local queue,
    /// and request replay above the ack floor.
    async fn establish(&mut self) -> Result<(WsSink, WsSource), String> {
        let (ws, _) = connect_async(&self.options.url)
            .await
            .map_err(|e| format!("connect: {}", e))?;
        let (mut ws_tx, mut ws_rx) = ws.split();

        // Handshake
        let hello = ClientFrame::Hello {
            client_id: self.client_id.lock().clone(),
            proto: Some(PROTOCOL_VERSION),
        };
        send_client_frame(&mut ws_tx, &hello).await?;

        let welcome = tokio::time::timeout(HANDSHAKE_TIMEOUT, async {
            loop {
                match ws_rx.next().await {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<serde_json::Value>(&text) {
                            Ok(value) if value.get("type").and_then(|t| t.as_str()) == Some("welcome") => {
                                return Ok(value);
                            }
                            Ok(value) if value.get("type").and_then(|t| t.as_str()) == Some("error") => {
                                return Err(format!(
                                    "handshake rejected: {}",
                                    value.get("message").and_then(|m| m.as_str()).unwrap_or("?")
                                ));
                            }
                            _ => continue,
                        }
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return Err(format!("handshake read: {}", e)),
                    None => return Err("closed during handshake".to_string()),
                }
            }
        })
        .await
        .map_err(|_| "handshake timed out".to_string())??;

        let assigned = welcome
            .get("client_id")
            .and_then(|v| v.as_str())
            .ok_or("welcome missing client_id")?
            .to_string();
        let server_ack_floor = welcome
            .get("last_ack_version")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        self.last_ack_version = self.last_ack_version.max(server_ack_floor);
        *self.client_id.lock() = Some(assigned.clone());

        if is_debug_client_enabled() {
            logger::debug(
                LogTag::Client,
                &format!(
                    "Handshake complete (client {}, ack floor {})",
                    assigned, self.last_ack_version
                ),
            );
        }

        // Restore every registered subscription; Subscribed replies arrive
        // in order during the session loop.
        self.pending_subscribes.clear();
        self.server_to_local.clear();
        for registration in &mut self.registrations {
            registration.server_id = None;
            let frame = ClientFrame::Subscribe {
                pattern: registration.spec.pattern.clone(),
                filter: registration.spec.options.filter.clone(),
                priority_filter: registration.spec.options.priority_filter,
                durable: registration.spec.options.durable,
            };
            send_client_frame(&mut ws_tx, &frame).await?;
            self.pending_subscribes
                .push_back(registration.local_id.clone());
        }

        // Flush queued publishes in original order
        let queued = self.outbound.as_mut().map(|q| q.drain()).unwrap_or_default();
        if !queued.is_empty() {
            logger::info(
                LogTag::Client,
                &format!("Flushing {} queued publishes", queued.len()),
            );
        }
        for publish in queued {
            send_client_frame(&mut ws_tx, &publish_frame(&publish, assigned.clone())).await?;
        }

        // Ask for what we missed before live delivery
        if !self.registrations.is_empty() {
            send_client_frame(
                &mut ws_tx,
                &ClientFrame::Replay {
                    from_version: self.last_ack_version,
                },
            )
            .await?;
        }

        Ok((ws_tx, ws_rx))
    }

    /// Connected session loop
    async fn session(&mut self, mut ws_tx: WsSink, mut ws_rx: WsSource) -> SessionEnd {
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<HandlerDone>();
        let mut heartbeat =
            tokio::time::interval(Duration::from_secs(self.options.heartbeat_secs.max(1)));
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        heartbeat.reset();

        loop {
            tokio::select! {
                biased;

                Some(done) = done_rx.recv() => {
                    if let HandlerOutcome::Ok = done.outcome {
                        self.remember_handled(done.event_id.clone());
                        if send_client_frame(&mut ws_tx, &ClientFrame::Ack { event_id: done.event_id }).await.is_err() {
                            return SessionEnd::Lost("ack send failed".to_string());
                        }
                        self.last_ack_version = self.last_ack_version.max(done.version);
                    }
                }

                command = self.cmd_rx.recv() => {
                    match command {
                        None => return SessionEnd::Closed,
                        Some(Command::Disconnect) => {
                            let _ = ws_tx.send(Message::Close(None)).await;
                            return SessionEnd::Closed;
                        }
                        Some(Command::Publish { publish, reply }) => {
                            let source = self.client_id.lock().clone().unwrap_or_default();
                            let result = send_client_frame(&mut ws_tx, &publish_frame(&publish, source)).await;
                            match result {
                                Ok(()) => { let _ = reply.send(Ok(())); }
                                Err(e) => {
                                    // Failed send: queue it and reconnect
                                    let queued = self.queue_publish(publish);
                                    let _ = reply.send(queued);
                                    return SessionEnd::Lost(e);
                                }
                            }
                        }
                        Some(Command::Subscribe { spec, reply }) => {
                            let frame = ClientFrame::Subscribe {
                                pattern: spec.pattern.clone(),
                                filter: spec.options.filter.clone(),
                                priority_filter: spec.options.priority_filter,
                                durable: spec.options.durable,
                            };
                            let local_id = self.register_local(spec);
                            let _ = reply.send(local_id.clone());
                            if send_client_frame(&mut ws_tx, &frame).await.is_err() {
                                return SessionEnd::Lost("subscribe send failed".to_string());
                            }
                            self.pending_subscribes.push_back(local_id);
                        }
                        Some(Command::Unsubscribe { local_id }) => {
                            if let Some(server_id) = self.unregister_local(&local_id) {
                                if send_client_frame(&mut ws_tx, &ClientFrame::Unsubscribe { subscription_id: server_id }).await.is_err() {
                                    return SessionEnd::Lost("unsubscribe send failed".to_string());
                                }
                            }
                        }
                    }
                }

                frame = ws_rx.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            if let Err(end) = self.handle_server_frame(&text, &done_tx, &mut ws_tx).await {
                                return end;
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            if ws_tx.send(Message::Pong(data)).await.is_err() {
                                return SessionEnd::Lost("pong send failed".to_string());
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            return SessionEnd::Lost("server closed connection".to_string());
                        }
                        Some(Err(e)) => {
                            return SessionEnd::Lost(format!("socket error: {}", e));
                        }
                        Some(Ok(_)) => {}
                    }
                }

                _ = heartbeat.tick() => {
                    if send_client_frame(&mut ws_tx, &ClientFrame::Heartbeat).await.is_err() {
                        return SessionEnd::Lost("heartbeat send failed".to_string());
                    }
                }
            }
        }
    }

    /// Dispatch one server frame
    async fn handle_server_frame(
        &mut self,
        text: &str,
        done_tx: &mpsc::UnboundedSender<HandlerDone>,
        ws_tx: &mut WsSink,
    ) -> Result<(), SessionEnd> {
        let value: serde_json::Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                logger::warning(LogTag::Client, &format!("Unparseable frame: {}", e));
                return Ok(());
            }
        };

        match value.get("type").and_then(|t| t.as_str()) {
            Some("event") => {
                let subscription_id = value
                    .get("subscription_id")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                let event: Event = match value
                    .get("event")
                    .cloned()
                    .map(serde_json::from_value)
                {
                    Some(Ok(event)) => event,
                    _ => {
                        logger::warning(LogTag::Client, "Event frame without a valid event");
                        return Ok(());
                    }
                };

                // Duplicate retry of something already processed: re-ack only
                if self.handled_ids.contains(&event.id) {
                    if send_client_frame(
                        ws_tx,
                        &ClientFrame::Ack {
                            event_id: event.id.clone(),
                        },
                    )
                    .await
                    .is_err()
                    {
                        return Err(SessionEnd::Lost("ack send failed".to_string()));
                    }
                    return Ok(());
                }

                let handler = self
                    .server_to_local
                    .get(&subscription_id)
                    .and_then(|local_id| {
                        self.registrations
                            .iter()
                            .find(|r| &r.local_id == local_id)
                            .map(|r| r.spec.handler.clone())
                    });

                match handler {
                    Some(handler) => {
                        let done_tx = done_tx.clone();
                        tokio::spawn(async move {
                            let outcome = handler.handle(&event).await;
                            let _ = done_tx.send(HandlerDone {
                                event_id: event.id,
                                version: event.version,
                                outcome,
                            });
                        });
                    }
                    None => {
                        // Subscription mapping not established yet; do not
                        // ack, the broker retry will find the handler later.
                        if is_debug_client_enabled() {
                            logger::debug(
                                LogTag::Client,
                                &format!(
                                    "Event {} for unknown subscription {}",
                                    event.id, subscription_id
                                ),
                            );
                        }
                    }
                }
            }

            Some("subscribed") => {
                if let Some(server_id) = value.get("subscription_id").and_then(|v| v.as_str()) {
                    if let Some(local_id) = self.pending_subscribes.pop_front() {
                        if let Some(registration) =
                            self.registrations.iter_mut().find(|r| r.local_id == local_id)
                        {
                            registration.server_id = Some(server_id.to_string());
                        }
                        self.server_to_local
                            .insert(server_id.to_string(), local_id);
                    }
                }
            }

            Some("replay_complete") => {
                if is_debug_client_enabled() {
                    let delivered = value.get("delivered").and_then(|v| v.as_u64()).unwrap_or(0);
                    logger::debug(
                        LogTag::Client,
                        &format!("Replay complete ({} events)", delivered),
                    );
                }
            }

            Some("published") | Some("unsubscribed") | Some("heartbeat_ack") | Some("welcome") => {}

            Some("error") => {
                logger::warning(
                    LogTag::Client,
                    &format!(
                        "Broker error {}: {}",
                        value.get("code").and_then(|v| v.as_str()).unwrap_or("?"),
                        value.get("message").and_then(|v| v.as_str()).unwrap_or("?"),
                    ),
                );
            }

            other => {
                logger::warning(
                    LogTag::Client,
                    &format!("Unknown frame type: {:?}", other),
                );
            }
        }

        Ok(())
    }

    /// Serve commands while waiting out a reconnect backoff.
    /// Returns true if a disconnect was requested.
    async fn wait_with_commands(&mut self, delay: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + delay;
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return false,
                command = self.cmd_rx.recv() => {
                    match command {
                        None | Some(Command::Disconnect) => return true,
                        Some(Command::Publish { publish, reply }) => {
                            let result = self.queue_publish(publish);
                            let _ = reply.send(result);
                        }
                        Some(Command::Subscribe { spec, reply }) => {
                            let local_id = self.register_local(spec);
                            let _ = reply.send(local_id);
                        }
                        Some(Command::Unsubscribe { local_id }) => {
                            self.unregister_local(&local_id);
                        }
                    }
                }
            }
        }
    }

    fn queue_publish(&mut self, publish: QueuedPublish) -> Result<(), ClientError> {
        match self.outbound.as_mut() {
            Some(queue) => queue.push(publish).map_err(|_| ClientError::QueueFull),
            None => Err(ClientError::Closed),
        }
    }

    fn register_local(&mut self, spec: SubscriptionSpec) -> String {
        self.next_local_id += 1;
        let local_id = format!("sub-{}", self.next_local_id);
        self.registrations.push(Registration {
            local_id: local_id.clone(),
            spec,
            server_id: None,
        });
        local_id
    }

    fn unregister_local(&mut self, local_id: &str) -> Option<String> {
        let index = self
            .registrations
            .iter()
            .position(|r| r.local_id == local_id)?;
        let registration = self.registrations.remove(index);
        if let Some(server_id) = &registration.server_id {
            self.server_to_local.remove(server_id);
        }
        registration.server_id
    }

    fn remember_handled(&mut self, event_id: String) {
        if self.handled_ids.insert(event_id.clone()) {
            self.handled_order.push_back(event_id);
            if self.handled_order.len() > HANDLED_CACHE_SIZE {
                if let Some(oldest) = self.handled_order.pop_front() {
                    self.handled_ids.remove(&oldest);
                }
            }
        }
    }
}

// ============================================================================
// HELPERS
// ============================================================================

fn publish_frame(publish: &QueuedPublish, source: String) -> ClientFrame {
    ClientFrame::Publish {
        topic: publish.topic.clone(),
        payload: publish.payload.clone(),
        priority: publish.priority,
        source: Some(source),
        correlation_id: publish.correlation_id.clone(),
        depth: publish.depth,
    }
}

async fn send_client_frame(ws_tx: &mut WsSink, frame: &ClientFrame) -> Result<(), String> {
    let json = serde_json::to_string(frame).map_err(|e| format!("encode: {}", e))?;
    ws_tx
        .send(Message::Text(json))
        .await
        .map_err(|e| format!("send: {}", e))
}

/// Exponential backoff with jitter: the delay lands uniformly in
/// [exp/2, exp] where exp = min(base * 2^(attempt-1), cap).
fn backoff_with_jitter(base_ms: u64, max_ms: u64, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    let exp = base_ms.saturating_mul(1u64 << exponent).min(max_ms).max(1);
    let half = exp / 2;
    let jitter = rand::thread_rng().gen_range(0..=exp - half);
    Duration::from_millis(half + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_stays_in_range() {
        for attempt in 1..12 {
            let exp = 500u64.saturating_mul(1 << (attempt - 1)).min(30_000);
            for _ in 0..20 {
                let delay = backoff_with_jitter(500, 30_000, attempt as u32);
                let ms = delay.as_millis() as u64;
                assert!(ms >= exp / 2, "attempt {}: {} < {}", attempt, ms, exp / 2);
                assert!(ms <= exp, "attempt {}: {} > {}", attempt, ms, exp);
            }
        }
    }

    #[test]
    fn test_backoff_caps() {
        let delay = backoff_with_jitter(500, 30_000, 30);
        assert!(delay.as_millis() as u64 <= 30_000);
    }
}
