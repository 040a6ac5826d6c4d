/// Wire protocol frames
///
/// All frames are JSON with a snake_case `type` tag. Client frames arrive
/// over the persistent WebSocket; server frames go back on the same socket.
/// The handshake is the first frame: a connection that sends anything
/// before `hello` is rejected.
use crate::broker::event::{Event, Priority};
use crate::broker::filter::PayloadFilter;
use serde::{Deserialize, Serialize};

// ============================================================================
// PROTOCOL VERSION
// ============================================================================

pub const PROTOCOL_VERSION: u8 = 1;

// ============================================================================
// CLIENT FRAMES (Client → Server)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Handshake. A returning client presents its stable id; a new client
    /// omits it and receives one in the welcome frame.
    Hello {
        #[serde(default)]
        client_id: Option<String>,
        #[serde(default)]
        proto: Option<u8>,
    },

    /// Publish an event
    Publish {
        topic: String,
        payload: serde_json::Value,
        #[serde(default)]
        priority: Option<u8>,
        #[serde(default)]
        source: Option<String>,
        #[serde(default)]
        correlation_id: Option<String>,
        /// Handler-originated publish depth (recursion guard)
        #[serde(default)]
        depth: u32,
    },

    /// Register a subscription
    Subscribe {
        pattern: String,
        #[serde(default)]
        filter: Option<PayloadFilter>,
        #[serde(default)]
        priority_filter: Option<u8>,
        #[serde(default)]
        durable: bool,
    },

    /// Remove a subscription
    Unsubscribe { subscription_id: String },

    /// Acknowledge a delivered event
    Ack { event_id: String },

    /// Request redelivery of stored events above a version
    Replay { from_version: u64 },

    /// Keepalive
    Heartbeat,
}

// ============================================================================
// SERVER FRAMES (Server → Client)
// ============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Handshake accepted
    Welcome {
        client_id: String,
        proto: u8,
        /// Where this client's ack floor stands (resume hint)
        last_ack_version: u64,
    },

    /// Publish accepted (the event is durable)
    Published { event_id: String, version: u64 },

    /// Event delivery
    Event {
        subscription_id: String,
        event: Event,
        /// True for replayed (stored) events, false for live delivery
        replay: bool,
    },

    /// Subscription registered
    Subscribed { subscription_id: String },

    /// Subscription removed
    Unsubscribed { subscription_id: String },

    /// Replay finished; live delivery resumes
    ReplayComplete { delivered: usize },

    /// Keepalive response
    HeartbeatAck,

    /// Request failed
    Error { code: String, message: String },
}

impl ServerFrame {
    /// Serialize to JSON text for the socket
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn error(e: &crate::errors::RouterError) -> Self {
        ServerFrame::Error {
            code: e.code().to_string(),
            message: e.to_string(),
        }
    }
}

/// Parse a priority filter level into the newtype
pub fn parse_priority_filter(level: Option<u8>) -> Option<Priority> {
    level.map(Priority)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_frame_parsing() {
        let frame: ClientFrame = serde_json::from_value(json!({
            "type": "publish",
            "topic": "task.created",
            "payload": {"id": 7},
            "priority": 7
        }))
        .unwrap();

        match frame {
            ClientFrame::Publish {
                topic,
                priority,
                depth,
                ..
            } => {
                assert_eq!(topic, "task.created");
                assert_eq!(priority, Some(7));
                assert_eq!(depth, 0);
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn test_hello_defaults() {
        let frame: ClientFrame = serde_json::from_value(json!({"type": "hello"})).unwrap();
        assert!(matches!(
            frame,
            ClientFrame::Hello {
                client_id: None,
                proto: None
            }
        ));
    }

    #[test]
    fn test_subscribe_with_filter() {
        let frame: ClientFrame = serde_json::from_value(json!({
            "type": "subscribe",
            "pattern": "task.*",
            "filter": {"conditions": [{"field": "kind", "op": "eq", "value": "build"}]},
            "priority_filter": 7,
            "durable": true
        }))
        .unwrap();

        match frame {
            ClientFrame::Subscribe {
                pattern,
                filter,
                priority_filter,
                durable,
            } => {
                assert_eq!(pattern, "task.*");
                assert!(filter.is_some());
                assert_eq!(priority_filter, Some(7));
                assert!(durable);
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn test_server_frame_serialization() {
        let frame = ServerFrame::Published {
            event_id: "e1".to_string(),
            version: 42,
        };
        let json = frame.to_json().unwrap();
        assert!(json.contains("\"type\":\"published\""));
        assert!(json.contains("\"version\":42"));
    }

    #[test]
    fn test_error_frame_carries_code() {
        let frame = ServerFrame::error(&crate::errors::RouterError::QueueFull { capacity: 10 });
        let json = frame.to_json().unwrap();
        assert!(json.contains("\"code\":\"queue_full\""));
    }
}
