/// Subscription record
///
/// A subscription binds one client to a topic pattern, with optional payload
/// and priority filters. It is owned by exactly one client; non-durable
/// subscriptions are removed when that client disconnects, durable ones
/// survive until the session itself is destroyed.
use super::event::{Event, Priority};
use super::filter::PayloadFilter;
use super::topic;
use crate::errors::RouterError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    /// Unique per registration
    pub subscription_id: String,

    /// Owning client
    pub client_id: String,

    /// Topic pattern (validated at construction)
    pub pattern: String,

    /// Optional payload predicate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<PayloadFilter>,

    /// Optional minimum priority threshold
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority_filter: Option<Priority>,

    /// Survives disconnect (until session destruction)
    #[serde(default)]
    pub durable: bool,
}

impl Subscription {
    /// Create a subscription, validating the pattern up front
    pub fn new(
        client_id: String,
        pattern: String,
        filter: Option<PayloadFilter>,
        priority_filter: Option<Priority>,
        durable: bool,
    ) -> Result<Self, RouterError> {
        topic::validate_pattern(&pattern)?;

        Ok(Self {
            subscription_id: uuid::Uuid::new_v4().to_string(),
            client_id,
            pattern,
            filter,
            priority_filter,
            durable,
        })
    }

    /// Whether this subscription wants the event
    ///
    /// Checks short-circuit cheapest-first: topic match, then priority
    /// threshold, then the payload predicate.
    pub fn wants(&self, event: &Event) -> bool {
        if !topic::pattern_matches(&self.pattern, &event.topic) {
            return false;
        }

        if let Some(min) = self.priority_filter {
            if event.priority < min {
                return false;
            }
        }

        if let Some(filter) = &self.filter {
            if !filter.matches(&event.payload) {
                return false;
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::filter::{FilterCondition, FilterOp};
    use serde_json::json;

    fn event(topic: &str, priority: Priority, payload: serde_json::Value) -> Event {
        Event::accept(topic.to_string(), payload, priority, None, None)
    }

    #[test]
    fn test_invalid_pattern_rejected_at_construction() {
        let result = Subscription::new("c1".to_string(), "".to_string(), None, None, false);
        assert!(matches!(result, Err(RouterError::InvalidTopicPattern(_))));
    }

    #[test]
    fn test_wants_topic_only() {
        let sub = Subscription::new("c1".to_string(), "task.*".to_string(), None, None, false)
            .unwrap();
        assert!(sub.wants(&event("task.created", Priority::NORMAL, json!({}))));
        assert!(!sub.wants(&event("agent.ready", Priority::NORMAL, json!({}))));
    }

    #[test]
    fn test_wants_priority_threshold() {
        let sub = Subscription::new(
            "c1".to_string(),
            "task.*".to_string(),
            None,
            Some(Priority::HIGH),
            false,
        )
        .unwrap();

        assert!(sub.wants(&event("task.created", Priority::HIGH, json!({}))));
        assert!(sub.wants(&event("task.created", Priority::SYSTEM, json!({}))));
        assert!(!sub.wants(&event("task.created", Priority::NORMAL, json!({}))));
    }

    #[test]
    fn test_wants_payload_filter() {
        let filter = PayloadFilter::new(vec![FilterCondition {
            field: "assignee".to_string(),
            op: FilterOp::Eq,
            value: json!("w1"),
        }]);
        let sub = Subscription::new(
            "c1".to_string(),
            "task.*".to_string(),
            Some(filter),
            None,
            false,
        )
        .unwrap();

        assert!(sub.wants(&event("task.created", Priority::NORMAL, json!({"assignee": "w1"}))));
        assert!(!sub.wants(&event("task.created", Priority::NORMAL, json!({"assignee": "w2"}))));
    }
}
