/// Router - the explicit broker instance
///
/// Owns the queue, registry, store, sessions, delivery engine, and dead
/// letter handler, and is injected into the webserver state rather than
/// living behind a global. The publish path here is the acceptance
/// contract: every publish gets a definitive accept (event id + version)
/// or reject, and acceptance happens only after the store append.
use super::dead_letter::{DeadLetterFilter, DeadLetterHandler};
use super::delivery::DeliveryEngine;
use super::event::{Event, Priority};
use super::filter::PayloadFilter;
use super::metrics::{MetricsCounters, RouterMetrics};
use super::queue::{PriorityQueue, QueuedItem};
use super::registry::SubscriptionRegistry;
use super::session::SessionManager;
use super::store::{EventStore, ReadFilter};
use super::subscription::Subscription;
use super::topic;
use crate::arguments::is_debug_router_enabled;
use crate::errors::RouterError;
use crate::logger::{self, LogTag};
use crate::shutdown::SHUTDOWN_MANAGER;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

// ============================================================================
// PUBLISH TYPES
// ============================================================================

/// An incoming publish, from the wire or the HTTP surface
#[derive(Debug, Clone, Deserialize)]
pub struct PublishRequest {
    pub topic: String,
    pub payload: serde_json::Value,

    #[serde(default)]
    pub priority: Option<u8>,

    #[serde(default)]
    pub source: Option<String>,

    #[serde(default)]
    pub correlation_id: Option<String>,

    /// Handler-originated publish depth (recursion guard)
    #[serde(default)]
    pub depth: u32,
}

/// Definitive accept for a publish
#[derive(Debug, Clone, Serialize)]
pub struct PublishReceipt {
    pub event_id: String,
    pub version: u64,
}

/// Full snapshot for the metrics endpoint
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    #[serde(flatten)]
    pub counters: MetricsCounters,
    pub queue_depth: usize,
    pub connected_clients: usize,
    pub sessions: usize,
    pub subscriptions: usize,
    pub dead_letter_backlog: u64,
    pub latest_version: u64,
}

// ============================================================================
// ROUTER
// ============================================================================

pub struct Router {
    queue: Arc<PriorityQueue>,
    registry: Arc<SubscriptionRegistry>,
    store: Arc<EventStore>,
    sessions: Arc<SessionManager>,
    dead_letters: Arc<DeadLetterHandler>,
    metrics: Arc<RouterMetrics>,
    engine: Arc<DeliveryEngine>,
}

impl Router {
    pub fn new(store: Arc<EventStore>) -> Arc<Self> {
        let (priority_levels, queue_max_size) =
            crate::config::with_config(|cfg| (cfg.broker.priority_levels, cfg.broker.queue_max_size));

        let queue = PriorityQueue::new(priority_levels, queue_max_size);
        let registry = Arc::new(SubscriptionRegistry::new());
        let sessions = Arc::new(SessionManager::new());
        let dead_letters = Arc::new(DeadLetterHandler::new(store.clone(), queue.clone()));
        let metrics = Arc::new(RouterMetrics::new());
        let engine = DeliveryEngine::new(
            queue.clone(),
            registry.clone(),
            sessions.clone(),
            dead_letters.clone(),
            metrics.clone(),
        );

        Arc::new(Self {
            queue,
            registry,
            store,
            sessions,
            dead_letters,
            metrics,
            engine,
        })
    }

    /// Spawn the delivery workers, session janitor, and store maintenance
    pub fn start(self: &Arc<Self>, shutdown: Arc<Notify>) -> Vec<JoinHandle<()>> {
        let mut handles = self.engine.spawn_workers(shutdown.clone());
        handles.push(self.spawn_session_janitor(shutdown.clone()));
        handles.push(self.spawn_store_maintenance(shutdown));

        logger::info(
            LogTag::Router,
            &format!("Router started ({} tasks)", handles.len()),
        );

        handles
    }

    // =========================================================================
    // PUBLISH PATH
    // =========================================================================

    /// Validate, persist, and enqueue one event.
    ///
    /// Order matters: the queue slot is reserved before the append so an
    /// event that reached the store is never bounced by backpressure, and
    /// the receipt is only returned after the append (the durability
    /// boundary).
    pub async fn publish(&self, request: PublishRequest) -> Result<PublishReceipt, RouterError> {
        let result = self.publish_inner(request).await;
        if result.is_err() {
            self.metrics.publish_rejected();
        }
        result
    }

    async fn publish_inner(&self, request: PublishRequest) -> Result<PublishReceipt, RouterError> {
        if !SHUTDOWN_MANAGER.should_accept_publishes() {
            return Err(RouterError::PublishRejected("broker shutting down".to_string()));
        }

        let (levels, default_priority, max_payload, max_depth, accept_timeout_ms) =
            crate::config::with_config(|cfg| {
                (
                    cfg.broker.priority_levels,
                    cfg.broker.default_priority,
                    cfg.broker.max_payload_bytes,
                    cfg.broker.max_publish_depth,
                    cfg.broker.accept_timeout_ms,
                )
            });

        topic::validate_topic(&request.topic)?;

        if request.depth > max_depth {
            return Err(RouterError::PublishRejected(format!(
                "publish depth {} exceeds limit {}",
                request.depth, max_depth
            )));
        }

        let priority = Priority(request.priority.unwrap_or(default_priority));
        if !priority.is_valid(levels) {
            return Err(RouterError::PublishRejected(format!(
                "priority {} outside 0..{}",
                priority, levels
            )));
        }

        let payload_size = serde_json::to_vec(&request.payload)
            .map_err(|e| RouterError::PublishRejected(format!("unserializable payload: {}", e)))?
            .len();
        if payload_size > max_payload {
            return Err(RouterError::PublishRejected(format!(
                "payload {} bytes exceeds limit {}",
                payload_size, max_payload
            )));
        }

        // Backpressure check precedes the append
        let permit = self.queue.try_reserve()?;

        let event = Event::accept(
            request.topic,
            request.payload,
            priority,
            request.source,
            request.correlation_id,
        );

        // Durability boundary: the receipt waits on the append
        let store = self.store.clone();
        let append_input = event.clone();
        let append = tokio::task::spawn_blocking(move || {
            let mut event = append_input;
            store.append(&mut event).map(|version| (event, version))
        });

        let (event, version) = tokio::time::timeout(
            Duration::from_millis(accept_timeout_ms),
            append,
        )
        .await
        .map_err(|_| RouterError::StoreAppendFailure("append timed out".to_string()))?
        .map_err(|e| RouterError::StoreAppendFailure(format!("append task failed: {}", e)))??;

        self.queue.enqueue(permit, QueuedItem::broadcast(event.clone()));
        self.metrics.event_published();

        if is_debug_router_enabled() {
            logger::debug(
                LogTag::Router,
                &format!(
                    "Accepted event {} (topic {}, priority {}, v{})",
                    event.id, event.topic, event.priority, version
                ),
            );
        }

        Ok(PublishReceipt {
            event_id: event.id,
            version,
        })
    }

    // =========================================================================
    // SUBSCRIPTIONS
    // =========================================================================

    pub fn subscribe(
        &self,
        client_id: String,
        pattern: String,
        filter: Option<PayloadFilter>,
        priority_filter: Option<Priority>,
        durable: bool,
    ) -> Result<Arc<Subscription>, RouterError> {
        // A reconnecting client re-issues its subscriptions; durable ones
        // survived the disconnect, so hand the existing record back instead
        // of double-subscribing.
        if let Some(existing) =
            self.registry
                .find_equivalent(&client_id, &pattern, &filter, priority_filter, durable)
        {
            return Ok(existing);
        }

        let subscription = Subscription::new(client_id, pattern, filter, priority_filter, durable)?;

        if is_debug_router_enabled() {
            logger::debug(
                LogTag::Router,
                &format!(
                    "Subscription {} registered (client {}, pattern {})",
                    subscription.subscription_id, subscription.client_id, subscription.pattern
                ),
            );
        }

        Ok(self.registry.add(subscription))
    }

    pub fn unsubscribe(&self, subscription_id: &str) -> Result<(), RouterError> {
        self.registry.remove(subscription_id)
    }

    // =========================================================================
    // ACKS & REPLAY
    // =========================================================================

    /// Resolve a client's ack and advance its session ack floor.
    ///
    /// Acks for replayed events (no pending delivery entry) fall back to a
    /// store lookup so the ack floor still advances and the next reconnect
    /// does not replay them again.
    pub fn ack(&self, client_id: &str, event_id: &str) {
        let version = self
            .engine
            .acks()
            .resolve(event_id, client_id)
            .or_else(|| self.store.version_of(event_id).ok().flatten());

        if let Some(version) = version {
            if let Some(session) = self.sessions.get(client_id) {
                session.record_ack(version);
            }
        }
    }

    /// Events a client missed: everything above `from_version` matching its
    /// current subscriptions, paired with the subscription that wants each.
    /// Version-ordered, at-least-once (the client dedups by version).
    pub fn replay_for_client(
        &self,
        client_id: &str,
        from_version: u64,
        limit: Option<usize>,
    ) -> Result<Vec<(Event, String)>, RouterError> {
        let subscriptions = self.registry.for_client(client_id);
        if subscriptions.is_empty() {
            return Ok(Vec::new());
        }

        let stored = self.store.read_range(&ReadFilter {
            from_version: Some(from_version),
            limit,
            ..Default::default()
        })?;

        let mut replayed = Vec::new();
        for event in stored {
            if let Some(subscription) = subscriptions.iter().find(|s| s.wants(&event)) {
                replayed.push((event, subscription.subscription_id.clone()));
            }
        }

        self.metrics.events_replayed(replayed.len() as u64);
        Ok(replayed)
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    pub fn store(&self) -> &Arc<EventStore> {
        &self.store
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    pub fn dead_letters(&self) -> &Arc<DeadLetterHandler> {
        &self.dead_letters
    }

    pub fn list_dead_letters(
        &self,
        filter: &DeadLetterFilter,
    ) -> Result<Vec<super::dead_letter::DeadLetterEntry>, RouterError> {
        self.dead_letters.list(filter)
    }

    pub fn retry_dead_letter(&self, entry_id: i64) -> Result<(), RouterError> {
        self.dead_letters.retry(entry_id)
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            counters: self.metrics.snapshot(),
            queue_depth: self.queue.depth(),
            connected_clients: self.sessions.connected_count(),
            sessions: self.sessions.session_count(),
            subscriptions: self.registry.len(),
            dead_letter_backlog: self.store.dead_letter_count().unwrap_or(0),
            latest_version: self.store.latest_version().unwrap_or(0),
        }
    }

    // =========================================================================
    // BACKGROUND TASKS
    // =========================================================================

    fn spawn_session_janitor(self: &Arc<Self>, shutdown: Arc<Notify>) -> JoinHandle<()> {
        let router = self.clone();
        tokio::spawn(async move {
            let (idle_timeout, sweep_interval) = crate::config::with_config(|cfg| {
                (
                    cfg.webserver.session_idle_timeout_secs as i64,
                    Duration::from_secs(cfg.webserver.session_sweep_interval_secs),
                )
            });

            loop {
                tokio::select! {
                    _ = shutdown.notified() => break,
                    _ = tokio::time::sleep(sweep_interval) => {
                        for client_id in router.sessions.sweep_idle(idle_timeout) {
                            let removed = router.registry.remove_by_client(&client_id);
                            logger::info(
                                LogTag::Session,
                                &format!(
                                    "Destroyed idle session {} ({} subscriptions dropped)",
                                    client_id, removed
                                ),
                            );
                        }
                    }
                }
            }
        })
    }

    fn spawn_store_maintenance(self: &Arc<Self>, shutdown: Arc<Notify>) -> JoinHandle<()> {
        let router = self.clone();
        tokio::spawn(async move {
            let (interval, retention, dl_retention) = crate::config::with_config(|cfg| {
                (
                    Duration::from_secs(cfg.store.maintenance_interval_secs),
                    cfg.store.retention_days,
                    cfg.store.dead_letter_retention_days,
                )
            });

            loop {
                tokio::select! {
                    _ = shutdown.notified() => break,
                    _ = tokio::time::sleep(interval) => {
                        let store = router.store.clone();
                        let result = tokio::task::spawn_blocking(move || {
                            store.purge_expired(retention, dl_retention)
                        })
                        .await;

                        match result {
                            Ok(Ok((events, dead_letters))) if events > 0 || dead_letters > 0 => {
                                logger::info(
                                    LogTag::Store,
                                    &format!(
                                        "Maintenance purged {} events, {} dead letters",
                                        events, dead_letters
                                    ),
                                );
                            }
                            Ok(Ok(_)) => {}
                            Ok(Err(e)) => {
                                logger::warning(
                                    LogTag::Store,
                                    &format!("Maintenance sweep failed: {}", e),
                                );
                            }
                            Err(e) => {
                                logger::warning(
                                    LogTag::Store,
                                    &format!("Maintenance task panicked: {}", e),
                                );
                            }
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn router() -> Arc<Router> {
        let store = Arc::new(EventStore::open_temporary().unwrap());
        Router::new(store)
    }

    fn request(topic: &str, priority: Option<u8>) -> PublishRequest {
        PublishRequest {
            topic: topic.to_string(),
            payload: json!({"n": 1}),
            priority,
            source: None,
            correlation_id: None,
            depth: 0,
        }
    }

    #[tokio::test]
    async fn test_publish_accepts_and_versions() {
        let router = router();

        let r1 = router.publish(request("task.created", None)).await.unwrap();
        let r2 = router.publish(request("task.created", None)).await.unwrap();

        assert_eq!(r1.version, 1);
        assert_eq!(r2.version, 2);
        assert_ne!(r1.event_id, r2.event_id);
    }

    #[tokio::test]
    async fn test_publish_rejects_invalid_topic() {
        let router = router();
        let result = router.publish(request("", None)).await;
        assert!(matches!(result, Err(RouterError::InvalidTopicPattern(_))));

        let result = router.publish(request("task.*", None)).await;
        assert!(matches!(result, Err(RouterError::InvalidTopicPattern(_))));
    }

    #[tokio::test]
    async fn test_publish_rejects_out_of_range_priority() {
        let router = router();
        let result = router.publish(request("task.created", Some(99))).await;
        assert!(matches!(result, Err(RouterError::PublishRejected(_))));
    }

    #[tokio::test]
    async fn test_publish_rejects_excess_depth() {
        let router = router();
        let mut req = request("task.created", None);
        req.depth = 1_000;
        let result = router.publish(req).await;
        assert!(matches!(result, Err(RouterError::PublishRejected(_))));
    }

    #[tokio::test]
    async fn test_subscribe_and_replay_range() {
        let router = router();

        router
            .subscribe("c1".to_string(), "task.*".to_string(), None, None, false)
            .unwrap();

        for i in 0..15 {
            router
                .publish(request(&format!("task.n{}", i), None))
                .await
                .unwrap();
        }

        // Acked through version 10: replay yields 11..latest only
        let replayed = router.replay_for_client("c1", 10, None).unwrap();
        let versions: Vec<u64> = replayed.iter().map(|(e, _)| e.version).collect();
        assert_eq!(versions, vec![11, 12, 13, 14, 15]);
    }

    #[tokio::test]
    async fn test_replay_respects_subscription_patterns() {
        let router = router();

        router
            .subscribe("c1".to_string(), "task.*".to_string(), None, None, false)
            .unwrap();

        router.publish(request("task.created", None)).await.unwrap();
        router.publish(request("agent.ready", None)).await.unwrap();
        router.publish(request("task.done", None)).await.unwrap();

        let replayed = router.replay_for_client("c1", 0, None).unwrap();
        let topics: Vec<&str> = replayed.iter().map(|(e, _)| e.topic.as_str()).collect();
        assert_eq!(topics, vec!["task.created", "task.done"]);
    }

    #[tokio::test]
    async fn test_reissued_durable_subscription_is_not_duplicated() {
        let router = router();

        let first = router
            .subscribe("c1".to_string(), "task.*".to_string(), None, None, true)
            .unwrap();
        let second = router
            .subscribe("c1".to_string(), "task.*".to_string(), None, None, true)
            .unwrap();

        assert_eq!(first.subscription_id, second.subscription_id);
        assert_eq!(router.metrics_snapshot().subscriptions, 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_unknown_id() {
        let router = router();
        assert!(matches!(
            router.unsubscribe("nope"),
            Err(RouterError::SubscriptionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_publish_reaches_matching_subscriber() {
        use crate::broker::session::OutboundMessage;

        // Hold the config lock so the fast delivery-test config cannot
        // shrink the ack timeout under this test
        let _config = crate::config::utils::lock_test_config().await;
        crate::config::set_config(crate::config::Config::default());

        let router = router();
        let shutdown = Arc::new(Notify::new());
        let handles = router.start(shutdown.clone());

        let (session, _) = router.sessions().handshake(Some("c1".to_string()));
        let (mut rx, _) = session.attach_connection(16);
        router
            .subscribe("c1".to_string(), "task.*".to_string(), None, None, false)
            .unwrap();

        // One publish matching one subscription: exactly one event frame
        let receipt = router
            .publish(request("task.created", Some(7)))
            .await
            .unwrap();

        let message = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("delivery timed out")
            .expect("channel closed");

        match message {
            OutboundMessage::Event { event, replay, .. } => {
                assert_eq!(event.id, receipt.event_id);
                assert_eq!(event.topic, "task.created");
                assert_eq!(event.version, receipt.version);
                assert!(!replay);
                router.ack("c1", &event.id);
            }
            other => panic!("unexpected message: {:?}", other),
        }

        // Acked: nothing further arrives for this event
        assert!(
            tokio::time::timeout(Duration::from_millis(100), rx.recv())
                .await
                .is_err()
        );
        assert_eq!(session.last_ack_version(), receipt.version);

        shutdown.notify_waiters();
        for handle in handles {
            handle.abort();
        }
    }

    #[tokio::test]
    async fn test_metrics_snapshot_gauges() {
        let router = router();
        router
            .subscribe("c1".to_string(), "task.*".to_string(), None, None, false)
            .unwrap();
        router.publish(request("task.created", None)).await.unwrap();

        let snapshot = router.metrics_snapshot();
        assert_eq!(snapshot.counters.events_published, 1);
        assert_eq!(snapshot.subscriptions, 1);
        assert_eq!(snapshot.latest_version, 1);
        assert_eq!(snapshot.queue_depth, 1);
    }
}
