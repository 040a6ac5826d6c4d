/// Error taxonomy for the router core
///
/// Structural errors (invalid pattern, malformed publish) are rejected
/// synchronously to the caller. Transient errors (timeouts, queue full,
/// connection loss) are retried with backoff and only surface once retries
/// are exhausted. A store append failure is fatal for that publish and is
/// always surfaced, never dropped.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RouterError {
    /// Topic or subscription pattern failed validation
    #[error("invalid topic pattern: {0}")]
    InvalidTopicPattern(String),

    /// Publish rejected before acceptance (oversized/malformed payload,
    /// recursion depth exceeded)
    #[error("publish rejected: {0}")]
    PublishRejected(String),

    /// Priority queue at capacity; publisher should back off
    #[error("queue full (capacity {capacity})")]
    QueueFull { capacity: usize },

    /// Unknown subscription id
    #[error("subscription not found: {0}")]
    SubscriptionNotFound(String),

    /// Delivery attempt timed out waiting for ack (recoverable, retried)
    #[error("delivery timed out for event {event_id} to client {client_id}")]
    DeliveryTimeout { event_id: String, client_id: String },

    /// Event/client pair exhausted retries (terminal)
    #[error("event {event_id} dead-lettered for client {client_id}")]
    DeadLettered { event_id: String, client_id: String },

    /// Connection to the broker lost (recoverable via reconnection)
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// Event store append failed; the publish was not accepted
    #[error("store append failed: {0}")]
    StoreAppendFailure(String),

    /// Event store read failed
    #[error("store query failed: {0}")]
    StoreQueryFailure(String),

    /// Dead letter entry id not found
    #[error("dead letter entry not found: {0}")]
    DeadLetterNotFound(i64),
}

impl RouterError {
    /// Stable snake_case code carried in ERROR wire frames
    pub fn code(&self) -> &'static str {
        match self {
            RouterError::InvalidTopicPattern(_) => "invalid_topic_pattern",
            RouterError::PublishRejected(_) => "publish_rejected",
            RouterError::QueueFull { .. } => "queue_full",
            RouterError::SubscriptionNotFound(_) => "subscription_not_found",
            RouterError::DeliveryTimeout { .. } => "delivery_timeout",
            RouterError::DeadLettered { .. } => "dead_lettered",
            RouterError::ConnectionLost(_) => "connection_lost",
            RouterError::StoreAppendFailure(_) => "store_append_failure",
            RouterError::StoreQueryFailure(_) => "store_query_failure",
            RouterError::DeadLetterNotFound(_) => "dead_letter_not_found",
        }
    }

    /// Whether local retry with backoff is appropriate
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RouterError::QueueFull { .. }
                | RouterError::DeliveryTimeout { .. }
                | RouterError::ConnectionLost(_)
        )
    }
}

impl From<rusqlite::Error> for RouterError {
    fn from(e: rusqlite::Error) -> Self {
        RouterError::StoreQueryFailure(e.to_string())
    }
}

impl From<r2d2::Error> for RouterError {
    fn from(e: r2d2::Error) -> Self {
        RouterError::StoreQueryFailure(format!("connection pool: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_snake_case() {
        let errors = [
            RouterError::InvalidTopicPattern("x".into()),
            RouterError::QueueFull { capacity: 1 },
            RouterError::StoreAppendFailure("disk".into()),
        ];
        for e in &errors {
            assert!(e.code().chars().all(|c| c.is_ascii_lowercase() || c == '_'));
        }
    }

    #[test]
    fn test_transient_classification() {
        assert!(RouterError::QueueFull { capacity: 1 }.is_transient());
        assert!(RouterError::ConnectionLost("peer reset".into()).is_transient());
        assert!(!RouterError::InvalidTopicPattern("".into()).is_transient());
        assert!(!RouterError::StoreAppendFailure("disk".into()).is_transient());
    }
}
