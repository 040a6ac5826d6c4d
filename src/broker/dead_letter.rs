/// Dead letter handling
///
/// An event/client pair lands here after delivery retries are exhausted.
/// Entries persist in the store until retried or purged by the retention
/// sweep. Retry re-enqueues the original event addressed only to the
/// originally failing client, never re-broadcast to subscribers that
/// already acked.
use super::event::{Event, Priority};
use super::queue::{PriorityQueue, QueuedItem};
use super::store::EventStore;
use crate::errors::RouterError;
use crate::logger::{self, LogTag};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

/// A permanently failed event/client delivery
#[derive(Debug, Clone, Serialize)]
pub struct DeadLetterEntry {
    pub entry_id: i64,
    pub event_id: String,
    pub event_version: u64,
    pub topic: String,
    pub payload: serde_json::Value,
    pub priority: Priority,
    pub client_id: String,
    pub attempt_count: u32,
    pub last_error: String,
    pub dead_lettered_at: DateTime<Utc>,
}

impl DeadLetterEntry {
    /// Reconstruct the original event for redelivery
    fn to_event(&self) -> Event {
        Event {
            id: self.event_id.clone(),
            topic: self.topic.clone(),
            payload: self.payload.clone(),
            priority: self.priority,
            source: None,
            correlation_id: None,
            created_at: self.dead_lettered_at,
            version: self.event_version,
        }
    }
}

/// Listing filter
#[derive(Debug, Clone, Default)]
pub struct DeadLetterFilter {
    pub client_id: Option<String>,
    pub topic: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

pub struct DeadLetterHandler {
    store: Arc<EventStore>,
    queue: Arc<PriorityQueue>,
}

impl DeadLetterHandler {
    pub fn new(store: Arc<EventStore>, queue: Arc<PriorityQueue>) -> Self {
        Self { store, queue }
    }

    /// Record a terminal delivery failure
    pub fn record(
        &self,
        event: &Event,
        client_id: &str,
        attempt_count: u32,
        error: &str,
    ) -> Result<i64, RouterError> {
        let entry_id = self
            .store
            .dead_letter_insert(event, client_id, attempt_count, error)?;

        logger::warning(
            LogTag::Delivery,
            &format!(
                "Dead-lettered event {} (topic {}) for client {} after {} attempts: {}",
                event.id, event.topic, client_id, attempt_count, error
            ),
        );

        Ok(entry_id)
    }

    /// List entries for inspection
    pub fn list(&self, filter: &DeadLetterFilter) -> Result<Vec<DeadLetterEntry>, RouterError> {
        self.store.dead_letter_list(filter)
    }

    /// Re-enqueue an entry's event, targeted at the originally failing
    /// client. The entry is deleted only after the enqueue succeeds.
    pub fn retry(&self, entry_id: i64) -> Result<(), RouterError> {
        let entry = self.store.dead_letter_get(entry_id)?;

        let permit = self.queue.try_reserve()?;
        self.queue.enqueue(
            permit,
            QueuedItem::targeted(entry.to_event(), entry.client_id.clone()),
        );

        self.store.dead_letter_delete(entry_id)?;

        logger::info(
            LogTag::Delivery,
            &format!(
                "Retrying dead letter {} (event {}) for client {}",
                entry_id, entry.event_id, entry.client_id
            ),
        );

        Ok(())
    }

    pub fn count(&self) -> Result<u64, RouterError> {
        self.store.dead_letter_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn handler() -> (DeadLetterHandler, Arc<EventStore>, Arc<PriorityQueue>) {
        let store = Arc::new(EventStore::open_temporary().unwrap());
        let queue = PriorityQueue::new(10, 100);
        (
            DeadLetterHandler::new(store.clone(), queue.clone()),
            store,
            queue,
        )
    }

    fn stored_event(store: &EventStore) -> Event {
        let mut event = Event::accept(
            "task.created".to_string(),
            json!({"n": 1}),
            Priority::HIGH,
            None,
            None,
        );
        store.append(&mut event).unwrap();
        event
    }

    #[test]
    fn test_record_and_list() {
        let (handler, store, _queue) = handler();
        let event = stored_event(&store);

        handler.record(&event, "c1", 5, "ack timeout").unwrap();

        let entries = handler.list(&DeadLetterFilter::default()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].attempt_count, 5);
        assert_eq!(entries[0].event_id, event.id);
    }

    #[test]
    fn test_retry_targets_failing_client_only() {
        let (handler, store, queue) = handler();
        let event = stored_event(&store);

        let entry_id = handler.record(&event, "c1", 5, "ack timeout").unwrap();
        handler.retry(entry_id).unwrap();

        // Entry is gone and the queue holds a targeted item
        assert_eq!(handler.count().unwrap(), 0);
        let item = queue.try_dequeue().unwrap();
        assert_eq!(item.target.as_deref(), Some("c1"));
        assert_eq!(item.event.id, event.id);
        assert_eq!(item.event.version, event.version);
    }

    #[test]
    fn test_retry_unknown_entry() {
        let (handler, _store, _queue) = handler();
        assert!(matches!(
            handler.retry(999),
            Err(RouterError::DeadLetterNotFound(999))
        ));
    }
}
