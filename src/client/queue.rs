/// Local outbound queue
///
/// While the client is not connected, publish calls land here instead of
/// failing. The queue is bounded; at capacity the publish is rejected so
/// a long outage cannot grow memory without bound. Flush order is the
/// original publish order.
use std::collections::VecDeque;

/// A publish waiting for the connection to come back
#[derive(Debug, Clone)]
pub struct QueuedPublish {
    pub topic: String,
    pub payload: serde_json::Value,
    pub priority: Option<u8>,
    pub correlation_id: Option<String>,
    pub depth: u32,
}

#[derive(Debug)]
pub struct OutboundQueue {
    items: VecDeque<QueuedPublish>,
    capacity: usize,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::new(),
            capacity,
        }
    }

    /// Enqueue, rejecting at capacity
    pub fn push(&mut self, item: QueuedPublish) -> Result<(), QueuedPublish> {
        if self.items.len() >= self.capacity {
            return Err(item);
        }
        self.items.push_back(item);
        Ok(())
    }

    /// Take everything in FIFO order
    pub fn drain(&mut self) -> Vec<QueuedPublish> {
        self.items.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn publish(topic: &str) -> QueuedPublish {
        QueuedPublish {
            topic: topic.to_string(),
            payload: json!({}),
            priority: None,
            correlation_id: None,
            depth: 0,
        }
    }

    #[test]
    fn test_flush_preserves_order() {
        let mut queue = OutboundQueue::new(10);
        for i in 0..5 {
            queue.push(publish(&format!("t.{}", i))).unwrap();
        }

        let drained = queue.drain();
        let topics: Vec<&str> = drained.iter().map(|p| p.topic.as_str()).collect();
        assert_eq!(topics, vec!["t.0", "t.1", "t.2", "t.3", "t.4"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_bounded_rejects_at_capacity() {
        let mut queue = OutboundQueue::new(2);
        queue.push(publish("a")).unwrap();
        queue.push(publish("b")).unwrap();

        let rejected = queue.push(publish("c")).unwrap_err();
        assert_eq!(rejected.topic, "c");
        assert_eq!(queue.len(), 2);
    }
}
