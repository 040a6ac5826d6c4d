/// Shared application state for the webserver
///
/// Carries the explicit Router instance into every route handler and the
/// WebSocket connection actors; there is no ambient broker singleton.
use crate::broker::Router;
use crate::webserver::ws::metrics::HubMetrics;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    /// The broker this server fronts
    pub router: Arc<Router>,

    /// WebSocket hub counters
    pub hub_metrics: Arc<HubMetrics>,

    /// Server startup time
    pub startup_time: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    pub fn new(router: Arc<Router>) -> Self {
        Self {
            router,
            hub_metrics: HubMetrics::new(),
            startup_time: chrono::Utc::now(),
        }
    }

    /// Get server uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        (chrono::Utc::now() - self.startup_time).num_seconds().max(0) as u64
    }
}
