/// WebSocket layer
///
/// One persistent connection per client carries the whole wire protocol:
/// handshake, publishes, subscription control, deliveries, acks, replay,
/// and heartbeats.
///
/// ## Key Components
/// - `message`: frame schemas (client and server)
/// - `connection`: socket actor - handshake, dispatch, health, cleanup
/// - `health`: heartbeat and idle tracking
/// - `metrics`: hub counters
pub mod connection;
pub mod health;
pub mod message;
pub mod metrics;

pub use message::{ClientFrame, ServerFrame, PROTOCOL_VERSION};
