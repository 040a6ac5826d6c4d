/// Health and metrics routes
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;

use crate::webserver::state::AppState;
use crate::webserver::utils::success_response;
use crate::webserver::ws::metrics::HubMetricsSnapshot;

/// Simple health check response
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub version: String,
    pub uptime_seconds: u64,
}

/// Combined metrics response
#[derive(Debug, Clone, Serialize)]
pub struct MetricsResponse {
    #[serde(flatten)]
    pub router: crate::broker::MetricsSnapshot,
    pub hub: HubMetricsSnapshot,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Create status routes
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
}

/// GET /api/health (also mounted unprefixed for probes)
async fn health_check(State(state): State<Arc<AppState>>) -> Response {
    success_response(HealthResponse {
        status: "ok".to_string(),
        timestamp: Utc::now(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.uptime_seconds(),
    })
}

/// GET /api/metrics
async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    success_response(MetricsResponse {
        router: state.router.metrics_snapshot(),
        hub: state.hub_metrics.snapshot(),
        timestamp: Utc::now(),
    })
}
