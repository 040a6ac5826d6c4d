/// Client sessions
///
/// A session is the stable identity of one client across reconnects. It is
/// created at first handshake and outlives individual socket connections;
/// only the idle janitor destroys it. The per-connection outbound channel
/// lives here so the delivery engine can hand events to whichever socket
/// currently represents the client.
use super::event::Event;
use crate::logger::{self, LogTag};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

// ============================================================================
// SESSION TYPES
// ============================================================================

/// Connection state as tracked by the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

/// Message flowing from the delivery engine to a connection actor
#[derive(Debug)]
pub enum OutboundMessage {
    /// Deliver one event under one subscription
    Event {
        event: Event,
        subscription_id: String,
        replay: bool,
    },
    /// Replay finished; live delivery resumes
    ReplayComplete { delivered: usize },
}

/// Failure modes for handing a message to a session
#[derive(Debug, PartialEq, Eq)]
pub enum SessionSendError {
    /// No live connection for this session
    Disconnected,
    /// Per-connection buffer is full (backpressure)
    Full,
}

// ============================================================================
// CLIENT SESSION
// ============================================================================

pub struct ClientSession {
    pub client_id: String,

    /// Sender for the current connection, None while disconnected
    outbound: Mutex<Option<mpsc::Sender<OutboundMessage>>>,

    /// Flipped on connect/disconnect; delivery waits watch this to cancel
    connected: watch::Sender<bool>,

    /// Bumped on every attach; a detach from a superseded connection is a
    /// no-op so reconnecting cannot be undone by the old actor's cleanup
    connection_epoch: AtomicU64,

    /// Highest store version this client has acked
    last_ack_version: AtomicU64,

    /// When the current disconnected period began
    disconnected_at: Mutex<Option<DateTime<Utc>>>,

    pub created_at: DateTime<Utc>,
}

impl ClientSession {
    fn new(client_id: String) -> Self {
        let (connected, _) = watch::channel(false);
        Self {
            client_id,
            outbound: Mutex::new(None),
            connected,
            connection_epoch: AtomicU64::new(0),
            last_ack_version: AtomicU64::new(0),
            disconnected_at: Mutex::new(Some(Utc::now())),
            created_at: Utc::now(),
        }
    }

    /// Attach a new connection, returning the receiver for its actor and
    /// the epoch to present at detach time. Any previous connection's
    /// channel is dropped (its actor observes closure and exits).
    pub fn attach_connection(
        &self,
        buffer_size: usize,
    ) -> (mpsc::Receiver<OutboundMessage>, u64) {
        let (tx, rx) = mpsc::channel(buffer_size);
        let epoch = self.connection_epoch.fetch_add(1, Ordering::AcqRel) + 1;
        *self.outbound.lock() = Some(tx);
        *self.disconnected_at.lock() = None;
        let _ = self.connected.send(true);
        (rx, epoch)
    }

    /// Detach a connection (socket loss or clean close). Ignored when a
    /// newer connection has already taken over; returns whether the detach
    /// applied.
    pub fn detach_connection(&self, epoch: u64) -> bool {
        if self.connection_epoch.load(Ordering::Acquire) != epoch {
            return false;
        }
        *self.outbound.lock() = None;
        *self.disconnected_at.lock() = Some(Utc::now());
        let _ = self.connected.send(false);
        true
    }

    pub fn state(&self) -> ConnectionState {
        if *self.connected.borrow() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Watch handle used by delivery tasks to cancel on disconnect
    pub fn watch_connected(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }

    /// Hand a message to the live connection without blocking
    pub fn try_send(&self, message: OutboundMessage) -> Result<(), SessionSendError> {
        let guard = self.outbound.lock();
        match guard.as_ref() {
            None => Err(SessionSendError::Disconnected),
            Some(tx) => tx.try_send(message).map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => SessionSendError::Full,
                mpsc::error::TrySendError::Closed(_) => SessionSendError::Disconnected,
            }),
        }
    }

    pub fn last_ack_version(&self) -> u64 {
        self.last_ack_version.load(Ordering::Acquire)
    }

    /// Advance the ack floor (never moves backwards)
    pub fn record_ack(&self, version: u64) {
        self.last_ack_version.fetch_max(version, Ordering::AcqRel);
    }

    /// Seconds spent in the current disconnected period (None if connected)
    pub fn disconnected_secs(&self) -> Option<i64> {
        self.disconnected_at
            .lock()
            .map(|at| (Utc::now() - at).num_seconds())
    }
}

// ============================================================================
// SESSION MANAGER
// ============================================================================

#[derive(Default)]
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<ClientSession>>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a session for a handshake. A missing or unknown client id
    /// creates a fresh session (with a new id when none was presented).
    /// Returns (session, created).
    pub fn handshake(&self, client_id: Option<String>) -> (Arc<ClientSession>, bool) {
        if let Some(id) = &client_id {
            if let Some(existing) = self.sessions.read().get(id) {
                return (existing.clone(), false);
            }
        }

        let id = client_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let session = Arc::new(ClientSession::new(id.clone()));
        self.sessions.write().insert(id, session.clone());
        (session, true)
    }

    pub fn get(&self, client_id: &str) -> Option<Arc<ClientSession>> {
        self.sessions.read().get(client_id).cloned()
    }

    pub fn connected_count(&self) -> usize {
        self.sessions
            .read()
            .values()
            .filter(|s| s.is_connected())
            .count()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Destroy sessions idle-disconnected past the timeout, returning their
    /// client ids so the caller can drop their subscriptions.
    pub fn sweep_idle(&self, idle_timeout_secs: i64) -> Vec<String> {
        let doomed: Vec<String> = self
            .sessions
            .read()
            .values()
            .filter(|s| {
                s.disconnected_secs()
                    .map(|secs| secs >= idle_timeout_secs)
                    .unwrap_or(false)
            })
            .map(|s| s.client_id.clone())
            .collect();

        if !doomed.is_empty() {
            let mut sessions = self.sessions.write();
            for id in &doomed {
                sessions.remove(id);
            }
            logger::debug(
                LogTag::Session,
                &format!("Janitor destroyed {} idle sessions", doomed.len()),
            );
        }

        doomed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::event::Priority;
    use serde_json::json;

    fn event() -> Event {
        Event::accept("t.x".to_string(), json!({}), Priority::NORMAL, None, None)
    }

    #[test]
    fn test_handshake_reuses_known_id() {
        let manager = SessionManager::new();
        let (first, created) = manager.handshake(Some("agent-1".to_string()));
        assert!(created);

        let (second, created) = manager.handshake(Some("agent-1".to_string()));
        assert!(!created);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_handshake_assigns_id_when_absent() {
        let manager = SessionManager::new();
        let (session, created) = manager.handshake(None);
        assert!(created);
        assert!(!session.client_id.is_empty());
    }

    #[tokio::test]
    async fn test_send_requires_connection() {
        let manager = SessionManager::new();
        let (session, _) = manager.handshake(Some("c1".to_string()));

        let err = session
            .try_send(OutboundMessage::Event {
                event: event(),
                subscription_id: "s1".to_string(),
                replay: false,
            })
            .unwrap_err();
        assert_eq!(err, SessionSendError::Disconnected);

        let (mut rx, _) = session.attach_connection(4);
        session
            .try_send(OutboundMessage::Event {
                event: event(),
                subscription_id: "s1".to_string(),
                replay: false,
            })
            .unwrap();
        assert!(rx.recv().await.is_some());
    }

    #[test]
    fn test_backpressure_when_buffer_full() {
        let manager = SessionManager::new();
        let (session, _) = manager.handshake(Some("c1".to_string()));
        let (_rx, _) = session.attach_connection(1);

        session
            .try_send(OutboundMessage::ReplayComplete { delivered: 0 })
            .unwrap();
        let err = session
            .try_send(OutboundMessage::ReplayComplete { delivered: 0 })
            .unwrap_err();
        assert_eq!(err, SessionSendError::Full);
    }

    #[test]
    fn test_stale_detach_is_ignored() {
        let manager = SessionManager::new();
        let (session, _) = manager.handshake(Some("c1".to_string()));

        let (_old_rx, old_epoch) = session.attach_connection(4);
        let (_new_rx, _) = session.attach_connection(4);

        // The replaced connection's cleanup must not disconnect the session
        session.detach_connection(old_epoch);
        assert!(session.is_connected());
    }

    #[test]
    fn test_ack_floor_never_regresses() {
        let manager = SessionManager::new();
        let (session, _) = manager.handshake(Some("c1".to_string()));

        session.record_ack(10);
        session.record_ack(7);
        assert_eq!(session.last_ack_version(), 10);
    }

    #[test]
    fn test_sweep_destroys_only_idle_disconnected() {
        let manager = SessionManager::new();
        let (idle, _) = manager.handshake(Some("idle".to_string()));
        let (live, _) = manager.handshake(Some("live".to_string()));
        let (_rx, _) = live.attach_connection(4);

        // Both just created; idle has been disconnected since creation
        assert!(idle.disconnected_secs().is_some());

        let destroyed = manager.sweep_idle(0);
        assert_eq!(destroyed, vec!["idle".to_string()]);
        assert!(manager.get("idle").is_none());
        assert!(manager.get("live").is_some());
    }
}
