/// Route assembly
///
/// The management API lives under /api; /health and /metrics are also
/// mounted unprefixed for probes, and /ws carries the wire protocol.
use crate::webserver::state::AppState;
use axum::Router;
use std::sync::Arc;

pub mod dead_letters;
pub mod events;
pub mod status;
pub mod ws;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(ws::routes())
        .merge(status::routes())
        .nest("/api", api_routes())
        .with_state(state)
}

fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .merge(events::routes())
        .merge(dead_letters::routes())
        .merge(status::routes())
}
