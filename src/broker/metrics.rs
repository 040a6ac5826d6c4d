/// Router metrics
///
/// Lock-free counters incremented on the hot paths, snapshotted for the
/// management surface. Gauges (queue depth, connected clients, dead letter
/// backlog) are sampled at snapshot time rather than tracked here.
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct RouterMetrics {
    events_published: AtomicU64,
    publishes_rejected: AtomicU64,
    events_delivered: AtomicU64,
    delivery_retries: AtomicU64,
    events_dead_lettered: AtomicU64,
    events_replayed: AtomicU64,
}

impl RouterMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event_published(&self) {
        self.events_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn publish_rejected(&self) {
        self.publishes_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn event_delivered(&self) {
        self.events_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn delivery_retried(&self) {
        self.delivery_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn event_dead_lettered(&self) {
        self.events_dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn events_replayed(&self, count: u64) {
        self.events_replayed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsCounters {
        MetricsCounters {
            events_published: self.events_published.load(Ordering::Relaxed),
            publishes_rejected: self.publishes_rejected.load(Ordering::Relaxed),
            events_delivered: self.events_delivered.load(Ordering::Relaxed),
            delivery_retries: self.delivery_retries.load(Ordering::Relaxed),
            events_dead_lettered: self.events_dead_lettered.load(Ordering::Relaxed),
            events_replayed: self.events_replayed.load(Ordering::Relaxed),
        }
    }
}

/// Counter snapshot for the metrics endpoint
#[derive(Debug, Clone, Serialize)]
pub struct MetricsCounters {
    pub events_published: u64,
    pub publishes_rejected: u64,
    pub events_delivered: u64,
    pub delivery_retries: u64,
    pub events_dead_lettered: u64,
    pub events_replayed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = RouterMetrics::new();
        metrics.event_published();
        metrics.event_published();
        metrics.event_delivered();
        metrics.events_replayed(4);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.events_published, 2);
        assert_eq!(snapshot.events_delivered, 1);
        assert_eq!(snapshot.events_replayed, 4);
        assert_eq!(snapshot.events_dead_lettered, 0);
    }
}
