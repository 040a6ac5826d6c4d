/// WebSocket upgrade route
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use std::sync::Arc;

use crate::webserver::state::AppState;
use crate::webserver::ws::connection;

/// Create the /ws route
pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/ws", get(ws_upgrade))
}

/// GET /ws - upgrade and hand the socket to the connection actor
async fn ws_upgrade(State(state): State<Arc<AppState>>, upgrade: WebSocketUpgrade) -> Response {
    upgrade.on_upgrade(move |socket| connection::handle_connection(socket, state))
}
