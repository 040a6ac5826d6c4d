/// HTTP and WebSocket surface
///
/// The webserver fronts one Router instance: the wire protocol at /ws, the
/// management API under /api, and unprefixed /health and /metrics probes.
pub mod routes;
pub mod server;
pub mod state;
pub mod utils;
pub mod ws;

pub use server::{shutdown, start_server};
pub use state::AppState;
