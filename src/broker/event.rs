/// Event model - the unit of routing
///
/// An event is immutable once accepted: the router assigns `id` and
/// `created_at` at acceptance and the store assigns `version` on append;
/// nothing rewrites it afterwards.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// PRIORITY
// ============================================================================

/// Ordinal delivery precedence. Higher drains first.
///
/// The level count is configuration (`broker.priority_levels`, default 10);
/// the named constants below are the conventional points on the default
/// 10-level scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(pub u8);

impl Priority {
    pub const LOWEST: Priority = Priority(0);
    pub const LOW: Priority = Priority(2);
    pub const NORMAL: Priority = Priority(4);
    pub const HIGH: Priority = Priority(7);
    pub const CRITICAL: Priority = Priority(8);
    pub const SYSTEM: Priority = Priority(9);

    pub fn level(&self) -> u8 {
        self.0
    }

    /// Whether this priority exists on a scale with `levels` levels
    pub fn is_valid(&self, levels: u8) -> bool {
        self.0 < levels
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// EVENT
// ============================================================================

/// A routed event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Globally unique id, assigned at acceptance
    pub id: String,

    /// Dot-separated hierarchical topic (e.g. "task.created")
    pub topic: String,

    /// Opaque structured payload; the router only checks size
    pub payload: serde_json::Value,

    /// Delivery precedence
    pub priority: Priority,

    /// Optional tracing metadata
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,

    /// Assigned by the router at acceptance
    pub created_at: DateTime<Utc>,

    /// Store sequence number; 0 until appended
    #[serde(default)]
    pub version: u64,
}

impl Event {
    /// Build an accepted event: id and timestamp assigned here, version
    /// assigned later by the store append.
    pub fn accept(
        topic: String,
        payload: serde_json::Value,
        priority: Priority,
        source: Option<String>,
        correlation_id: Option<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            topic,
            payload,
            priority,
            source,
            correlation_id,
            created_at: Utc::now(),
            version: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::SYSTEM > Priority::CRITICAL);
        assert!(Priority::CRITICAL > Priority::HIGH);
        assert!(Priority::HIGH > Priority::NORMAL);
        assert!(Priority::NORMAL > Priority::LOWEST);
    }

    #[test]
    fn test_priority_validity() {
        assert!(Priority::SYSTEM.is_valid(10));
        assert!(!Priority(10).is_valid(10));
        assert!(Priority(0).is_valid(1));
    }

    #[test]
    fn test_accept_assigns_identity() {
        let a = Event::accept(
            "task.created".to_string(),
            serde_json::json!({"n": 1}),
            Priority::NORMAL,
            None,
            None,
        );
        let b = Event::accept(
            "task.created".to_string(),
            serde_json::json!({"n": 1}),
            Priority::NORMAL,
            None,
            None,
        );

        assert_ne!(a.id, b.id);
        assert_eq!(a.version, 0);
    }

    #[test]
    fn test_event_serde_roundtrip() {
        let event = Event::accept(
            "agent.status.changed".to_string(),
            serde_json::json!({"state": "busy"}),
            Priority::HIGH,
            Some("agent-7".to_string()),
            Some("corr-1".to_string()),
        );

        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();

        assert_eq!(back.id, event.id);
        assert_eq!(back.topic, event.topic);
        assert_eq!(back.payload, event.payload);
        assert_eq!(back.priority, event.priority);
    }
}
