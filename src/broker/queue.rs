/// Priority queue for pending events
///
/// Physically partitioned into one FIFO deque per priority level. Dequeue
/// scans levels highest-first, so higher priority strictly precedes lower
/// for events already enqueued, and order within a level is arrival order
/// (no starvation while drain keeps up with arrival).
///
/// Capacity is enforced with a reserve step: the publish path reserves a
/// slot BEFORE the durability append so an event that made it into the
/// store is never bounced by backpressure afterwards. Dropping an unused
/// permit releases the slot.
use super::event::Event;
use crate::errors::RouterError;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// One pending delivery unit
#[derive(Debug, Clone)]
pub struct QueuedItem {
    pub event: Event,

    /// Set only for dead-letter retries: deliver to this client alone
    pub target: Option<String>,
}

impl QueuedItem {
    pub fn broadcast(event: Event) -> Self {
        Self { event, target: None }
    }

    pub fn targeted(event: Event, client_id: String) -> Self {
        Self {
            event,
            target: Some(client_id),
        }
    }
}

pub struct PriorityQueue {
    /// One deque per priority level, index = level
    levels: Mutex<Vec<VecDeque<QueuedItem>>>,

    /// Queued items plus outstanding reservations
    occupancy: AtomicUsize,

    capacity: usize,

    /// Wakes one parked worker per enqueue
    notify: Notify,
}

impl PriorityQueue {
    pub fn new(priority_levels: u8, capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            levels: Mutex::new(
                (0..priority_levels.max(1)).map(|_| VecDeque::new()).collect(),
            ),
            occupancy: AtomicUsize::new(0),
            capacity,
            notify: Notify::new(),
        })
    }

    /// Reserve one slot, failing fast with QueueFull at capacity
    pub fn try_reserve(self: &Arc<Self>) -> Result<QueuePermit, RouterError> {
        let result = self
            .occupancy
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                if current < self.capacity {
                    Some(current + 1)
                } else {
                    None
                }
            });

        match result {
            Ok(_) => Ok(QueuePermit {
                queue: self.clone(),
                consumed: false,
            }),
            Err(_) => Err(RouterError::QueueFull {
                capacity: self.capacity,
            }),
        }
    }

    /// Fill a reserved slot
    pub fn enqueue(&self, mut permit: QueuePermit, item: QueuedItem) {
        let level = item.event.priority.level() as usize;

        {
            let mut levels = self.levels.lock();
            // Out-of-range priorities were rejected at publish; clamp is a
            // last-resort guard for targeted re-enqueues of old events.
            let level = level.min(levels.len() - 1);
            levels[level].push_back(item);
        }

        permit.consumed = true;
        self.notify.notify_one();
    }

    /// Take the highest-priority pending item, parking while empty.
    ///
    /// Cancel-safe: a lost wakeup is impossible because notify_one stores a
    /// permit when no worker is parked.
    pub async fn dequeue(&self) -> QueuedItem {
        loop {
            if let Some(item) = self.pop() {
                return item;
            }
            self.notify.notified().await;
        }
    }

    /// Non-blocking variant used by drain paths and tests
    pub fn try_dequeue(&self) -> Option<QueuedItem> {
        self.pop()
    }

    fn pop(&self) -> Option<QueuedItem> {
        let mut levels = self.levels.lock();
        for level in (0..levels.len()).rev() {
            if let Some(item) = levels[level].pop_front() {
                self.occupancy.fetch_sub(1, Ordering::AcqRel);
                return Some(item);
            }
        }
        None
    }

    /// Pending items (excluding unfilled reservations)
    pub fn depth(&self) -> usize {
        self.levels.lock().iter().map(|d| d.len()).sum()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// A reserved queue slot; dropping it unfilled releases the slot
pub struct QueuePermit {
    queue: Arc<PriorityQueue>,
    consumed: bool,
}

impl Drop for QueuePermit {
    fn drop(&mut self) {
        if !self.consumed {
            self.queue.occupancy.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::event::Priority;
    use serde_json::json;

    fn event(topic: &str, priority: Priority) -> Event {
        Event::accept(topic.to_string(), json!({}), priority, None, None)
    }

    fn push(queue: &Arc<PriorityQueue>, e: Event) {
        let permit = queue.try_reserve().unwrap();
        queue.enqueue(permit, QueuedItem::broadcast(e));
    }

    #[tokio::test]
    async fn test_higher_priority_drains_first() {
        let queue = PriorityQueue::new(10, 100);

        // 5 NORMAL already pending when 1 CRITICAL arrives
        for i in 0..5 {
            push(&queue, event(&format!("task.{}", i), Priority::NORMAL));
        }
        push(&queue, event("alert.fired", Priority::CRITICAL));

        let first = queue.dequeue().await;
        assert_eq!(first.event.topic, "alert.fired");

        // Remaining NORMAL events come out in arrival order
        for i in 0..5 {
            let item = queue.dequeue().await;
            assert_eq!(item.event.topic, format!("task.{}", i));
        }
    }

    #[tokio::test]
    async fn test_never_returns_lower_while_higher_present() {
        let queue = PriorityQueue::new(10, 100);
        push(&queue, event("low", Priority::LOWEST));
        push(&queue, event("mid", Priority::NORMAL));
        push(&queue, event("high", Priority::HIGH));
        push(&queue, event("sys", Priority::SYSTEM));

        let order: Vec<String> = [
            queue.dequeue().await,
            queue.dequeue().await,
            queue.dequeue().await,
            queue.dequeue().await,
        ]
        .into_iter()
        .map(|i| i.event.topic)
        .collect();

        assert_eq!(order, vec!["sys", "high", "mid", "low"]);
    }

    #[test]
    fn test_queue_full_backpressure() {
        let queue = PriorityQueue::new(10, 2);

        let p1 = queue.try_reserve().unwrap();
        let _p2 = queue.try_reserve().unwrap();
        assert!(matches!(
            queue.try_reserve(),
            Err(RouterError::QueueFull { capacity: 2 })
        ));

        // Filling a permit keeps the slot occupied
        queue.enqueue(p1, QueuedItem::broadcast(event("a", Priority::NORMAL)));
        assert!(queue.try_reserve().is_err());

        // Dequeue frees a slot
        assert!(queue.try_dequeue().is_some());
        assert!(queue.try_reserve().is_ok());
    }

    #[test]
    fn test_dropped_permit_releases_slot() {
        let queue = PriorityQueue::new(10, 1);
        {
            let _permit = queue.try_reserve().unwrap();
            assert!(queue.try_reserve().is_err());
        }
        assert!(queue.try_reserve().is_ok());
    }

    #[tokio::test]
    async fn test_dequeue_wakes_on_enqueue() {
        let queue = PriorityQueue::new(10, 10);
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue().await })
        };

        // Give the waiter a chance to park
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        push(&queue, event("task.created", Priority::NORMAL));

        let item = waiter.await.unwrap();
        assert_eq!(item.event.topic, "task.created");
    }

    #[test]
    fn test_fifo_within_level() {
        let queue = PriorityQueue::new(10, 100);
        for i in 0..10 {
            push(&queue, event(&format!("t.{}", i), Priority::NORMAL));
        }
        for i in 0..10 {
            assert_eq!(queue.try_dequeue().unwrap().event.topic, format!("t.{}", i));
        }
    }
}
