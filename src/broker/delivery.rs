/// Delivery engine
///
/// A small fixed pool of workers drains the priority queue. Each dequeued
/// event fans out into independent per-(event, client) delivery tasks, so
/// one client's slow ack never blocks delivery to another.
///
/// Per-attempt state machine: Pending -> Sent -> {Acked | TimedOut};
/// TimedOut -> Pending (retry with exponential backoff) until attempt_count
/// reaches max_retries, then TimedOut -> DeadLettered (terminal).
///
/// A client disconnect cancels only that client's outstanding waits; the
/// reconnect replay path covers whatever was in flight.
use super::dead_letter::DeadLetterHandler;
use super::event::Event;
use super::metrics::RouterMetrics;
use super::queue::{PriorityQueue, QueuedItem};
use super::registry::SubscriptionRegistry;
use super::session::{OutboundMessage, SessionManager, SessionSendError};
use super::subscription::Subscription;
use crate::arguments::is_debug_delivery_enabled;
use crate::logger::{self, LogTag};
use crate::shutdown::SHUTDOWN_MANAGER;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch, Notify};
use tokio::task::JoinHandle;

// ============================================================================
// ACK TABLE
// ============================================================================

struct AckEntry {
    version: u64,
    tx: oneshot::Sender<()>,
}

/// Pending acknowledgments keyed by (event_id, client_id)
///
/// Delivery tasks register before sending; the connection actor resolves
/// when the client's ACK frame arrives.
#[derive(Default)]
pub struct AckTable {
    pending: Mutex<HashMap<(String, String), AckEntry>>,
}

impl AckTable {
    fn register(&self, event_id: &str, client_id: &str, version: u64) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(
            (event_id.to_string(), client_id.to_string()),
            AckEntry { version, tx },
        );
        rx
    }

    fn cancel(&self, event_id: &str, client_id: &str) {
        self.pending
            .lock()
            .remove(&(event_id.to_string(), client_id.to_string()));
    }

    /// Resolve a pending ack, returning the event's store version
    pub fn resolve(&self, event_id: &str, client_id: &str) -> Option<u64> {
        let entry = self
            .pending
            .lock()
            .remove(&(event_id.to_string(), client_id.to_string()))?;
        let version = entry.version;
        let _ = entry.tx.send(());
        Some(version)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

// ============================================================================
// DELIVERY ENGINE
// ============================================================================

pub struct DeliveryEngine {
    queue: Arc<PriorityQueue>,
    registry: Arc<SubscriptionRegistry>,
    sessions: Arc<SessionManager>,
    dead_letters: Arc<DeadLetterHandler>,
    metrics: Arc<RouterMetrics>,
    acks: AckTable,
}

impl DeliveryEngine {
    pub fn new(
        queue: Arc<PriorityQueue>,
        registry: Arc<SubscriptionRegistry>,
        sessions: Arc<SessionManager>,
        dead_letters: Arc<DeadLetterHandler>,
        metrics: Arc<RouterMetrics>,
    ) -> Arc<Self> {
        Arc::new(Self {
            queue,
            registry,
            sessions,
            dead_letters,
            metrics,
            acks: AckTable::default(),
        })
    }

    pub fn acks(&self) -> &AckTable {
        &self.acks
    }

    /// Spawn the worker pool
    pub fn spawn_workers(self: &Arc<Self>, shutdown: Arc<Notify>) -> Vec<JoinHandle<()>> {
        let workers = crate::config::with_config(|cfg| cfg.delivery.workers).max(1);

        (0..workers)
            .map(|worker_id| {
                let engine = self.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    engine.worker_loop(worker_id, shutdown).await;
                })
            })
            .collect()
    }

    async fn worker_loop(self: Arc<Self>, worker_id: usize, shutdown: Arc<Notify>) {
        logger::debug(
            LogTag::Delivery,
            &format!("Delivery worker {} started", worker_id),
        );

        loop {
            if SHUTDOWN_MANAGER.is_shutdown_requested() {
                break;
            }

            tokio::select! {
                _ = shutdown.notified() => break,
                item = self.queue.dequeue() => {
                    self.dispatch(item);
                }
            }
        }

        logger::debug(
            LogTag::Delivery,
            &format!("Delivery worker {} stopped", worker_id),
        );
    }

    /// Fan an event out to its matching subscribers
    fn dispatch(self: &Arc<Self>, item: QueuedItem) {
        let matches = match &item.target {
            Some(client_id) => self
                .registry
                .find_matches_for_client(&item.event, client_id),
            None => self.registry.find_matches(&item.event),
        };

        if is_debug_delivery_enabled() {
            logger::debug(
                LogTag::Delivery,
                &format!(
                    "Event {} (topic {}, v{}) matched {} subscriptions",
                    item.event.id,
                    item.event.topic,
                    item.event.version,
                    matches.len()
                ),
            );
        }

        for subscription in matches {
            let engine = self.clone();
            let event = item.event.clone();
            tokio::spawn(async move {
                engine.deliver(event, subscription).await;
            });
        }
    }

    /// Drive one (event, client) pair through the attempt state machine
    async fn deliver(self: Arc<Self>, event: Event, subscription: Arc<Subscription>) {
        let _guard = SHUTDOWN_MANAGER.delivery_started();

        let (ack_timeout, max_retries, backoff_base, backoff_max) =
            crate::config::with_config(|cfg| {
                (
                    Duration::from_millis(cfg.delivery.ack_timeout_ms),
                    cfg.delivery.max_retries.max(1),
                    cfg.delivery.retry_backoff_base_ms,
                    cfg.delivery.retry_backoff_max_ms,
                )
            });

        let client_id = &subscription.client_id;
        let Some(session) = self.sessions.get(client_id) else {
            // Session destroyed between match and delivery
            return;
        };
        let mut connected = session.watch_connected();

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;

            // Pending -> Sent
            let ack_rx = self.acks.register(&event.id, client_id, event.version);
            let send_result = session.try_send(OutboundMessage::Event {
                event: event.clone(),
                subscription_id: subscription.subscription_id.clone(),
                replay: false,
            });

            match send_result {
                Ok(()) => {
                    tokio::select! {
                        _ = wait_disconnect(&mut connected) => {
                            // Disconnect cancels this wait; replay covers the gap
                            self.acks.cancel(&event.id, client_id);
                            return;
                        }
                        acked = tokio::time::timeout(ack_timeout, ack_rx) => {
                            if matches!(acked, Ok(Ok(()))) {
                                // Sent -> Acked (terminal)
                                self.metrics.event_delivered();
                                return;
                            }
                            // Sent -> TimedOut
                            self.acks.cancel(&event.id, client_id);
                        }
                    }
                }
                Err(SessionSendError::Disconnected) => {
                    self.acks.cancel(&event.id, client_id);
                    return;
                }
                Err(SessionSendError::Full) => {
                    // Outbound buffer full counts as a failed attempt
                    self.acks.cancel(&event.id, client_id);
                }
            }

            if attempt >= max_retries {
                // TimedOut -> DeadLettered (terminal)
                let error = format!("no ack after {} attempts", attempt);
                if let Err(e) = self
                    .dead_letters
                    .record(&event, client_id, attempt, &error)
                {
                    logger::error(
                        LogTag::Delivery,
                        &format!("Failed to record dead letter for event {}: {}", event.id, e),
                    );
                }
                self.metrics.event_dead_lettered();
                return;
            }

            // TimedOut -> Pending: back off before the next attempt
            self.metrics.delivery_retried();
            if is_debug_delivery_enabled() {
                logger::debug(
                    LogTag::Delivery,
                    &format!(
                        "Retrying event {} for client {} (attempt {}/{})",
                        event.id, client_id, attempt, max_retries
                    ),
                );
            }

            let backoff = backoff_delay(backoff_base, backoff_max, attempt);
            tokio::select! {
                _ = wait_disconnect(&mut connected) => {
                    return;
                }
                _ = tokio::time::sleep(backoff) => {}
            }
        }
    }
}

/// Exponential backoff: base * 2^(attempt-1), capped
fn backoff_delay(base_ms: u64, max_ms: u64, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    let delay = base_ms.saturating_mul(1u64 << exponent).min(max_ms);
    Duration::from_millis(delay)
}

/// Resolve when the session transitions to disconnected
async fn wait_disconnect(connected: &mut watch::Receiver<bool>) {
    loop {
        if !*connected.borrow() {
            return;
        }
        if connected.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::dead_letter::DeadLetterFilter;
    use crate::broker::event::Priority;
    use crate::broker::store::EventStore;
    use serde_json::json;

    struct Fixture {
        engine: Arc<DeliveryEngine>,
        queue: Arc<PriorityQueue>,
        registry: Arc<SubscriptionRegistry>,
        sessions: Arc<SessionManager>,
        dead_letters: Arc<DeadLetterHandler>,
        store: Arc<EventStore>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(EventStore::open_temporary().unwrap());
        let queue = PriorityQueue::new(10, 100);
        let registry = Arc::new(SubscriptionRegistry::new());
        let sessions = Arc::new(SessionManager::new());
        let dead_letters = Arc::new(DeadLetterHandler::new(store.clone(), queue.clone()));
        let metrics = Arc::new(RouterMetrics::new());
        let engine = DeliveryEngine::new(
            queue.clone(),
            registry.clone(),
            sessions.clone(),
            dead_letters.clone(),
            metrics,
        );
        Fixture {
            engine,
            queue,
            registry,
            sessions,
            dead_letters,
            store,
        }
    }

    fn stored_event(store: &EventStore, topic: &str) -> Event {
        let mut event = Event::accept(topic.to_string(), json!({}), Priority::HIGH, None, None);
        store.append(&mut event).unwrap();
        event
    }

    async fn fast_test_config() -> tokio::sync::MutexGuard<'static, ()> {
        let guard = crate::config::utils::lock_test_config().await;
        crate::config::set_config({
            let mut cfg = crate::config::Config::default();
            cfg.delivery.ack_timeout_ms = 30;
            cfg.delivery.max_retries = 3;
            cfg.delivery.retry_backoff_base_ms = 5;
            cfg.delivery.retry_backoff_max_ms = 10;
            cfg
        });
        guard
    }

    #[tokio::test]
    async fn test_acked_delivery_completes() {
        let _config = fast_test_config().await;
        let f = fixture();

        let (session, _) = f.sessions.handshake(Some("c1".to_string()));
        let (mut rx, _) = session.attach_connection(16);
        let sub = f.registry.add(
            Subscription::new("c1".to_string(), "task.*".to_string(), None, None, false).unwrap(),
        );

        let event = stored_event(&f.store, "task.created");
        let handle = tokio::spawn(f.engine.clone().deliver(event.clone(), sub));

        // Connection actor side: receive and ack
        let message = rx.recv().await.unwrap();
        match message {
            OutboundMessage::Event {
                event: delivered,
                subscription_id: _,
                replay,
            } => {
                assert_eq!(delivered.id, event.id);
                assert!(!replay);
            }
            other => panic!("unexpected message: {:?}", other),
        }

        let version = f.engine.acks().resolve(&event.id, "c1").unwrap();
        assert_eq!(version, event.version);

        handle.await.unwrap();
        assert_eq!(f.engine.acks().pending_count(), 0);
    }

    #[tokio::test]
    async fn test_never_acked_dead_letters_with_attempt_count() {
        let _config = fast_test_config().await;
        let f = fixture();

        let (session, _) = f.sessions.handshake(Some("c1".to_string()));
        let (mut rx, _) = session.attach_connection(16);
        let sub = f.registry.add(
            Subscription::new("c1".to_string(), "task.*".to_string(), None, None, false).unwrap(),
        );

        let event = stored_event(&f.store, "task.created");
        f.engine.clone().deliver(event.clone(), sub).await;

        // The pair lands in the dead letter list with
        // attempt_count == max_retries
        let entries = f.dead_letters.list(&DeadLetterFilter::default()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].attempt_count, 3);
        assert_eq!(entries[0].client_id, "c1");
        assert_eq!(entries[0].event_id, event.id);

        // Each attempt re-sent the frame
        let mut sent = 0;
        while rx.try_recv().is_ok() {
            sent += 1;
        }
        assert_eq!(sent, 3);
    }

    #[tokio::test]
    async fn test_disconnect_cancels_without_dead_letter() {
        let _config = fast_test_config().await;
        let f = fixture();

        let (session, _) = f.sessions.handshake(Some("c1".to_string()));
        let (_rx, epoch) = session.attach_connection(16);
        let sub = f.registry.add(
            Subscription::new("c1".to_string(), "task.*".to_string(), None, None, false).unwrap(),
        );

        let event = stored_event(&f.store, "task.created");
        let handle = tokio::spawn(f.engine.clone().deliver(event.clone(), sub));

        tokio::time::sleep(Duration::from_millis(5)).await;
        session.detach_connection(epoch);

        handle.await.unwrap();
        assert!(f
            .dead_letters
            .list(&DeadLetterFilter::default())
            .unwrap()
            .is_empty());
        assert_eq!(f.engine.acks().pending_count(), 0);
    }

    #[tokio::test]
    async fn test_targeted_item_reaches_only_target() {
        let _config = fast_test_config().await;
        let f = fixture();

        for client in ["c1", "c2"] {
            let (session, _) = f.sessions.handshake(Some(client.to_string()));
            let (_, _) = session.attach_connection(16);
            f.registry.add(
                Subscription::new(client.to_string(), "task.*".to_string(), None, None, false)
                    .unwrap(),
            );
        }

        let event = stored_event(&f.store, "task.created");
        let item = QueuedItem::targeted(event, "c2".to_string());
        let matches = f
            .registry
            .find_matches_for_client(&item.event, item.target.as_deref().unwrap());

        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].client_id, "c2");
    }

    #[test]
    fn test_backoff_schedule() {
        assert_eq!(backoff_delay(500, 30_000, 1), Duration::from_millis(500));
        assert_eq!(backoff_delay(500, 30_000, 2), Duration::from_millis(1_000));
        assert_eq!(backoff_delay(500, 30_000, 3), Duration::from_millis(2_000));
        // Capped
        assert_eq!(backoff_delay(500, 30_000, 10), Duration::from_millis(30_000));
        // Large attempts do not overflow
        assert_eq!(backoff_delay(500, 30_000, 60), Duration::from_millis(30_000));
    }
}
