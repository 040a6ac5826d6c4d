/// Client SDK
///
/// The contract agent processes code against: connect(), publish(),
/// subscribe(pattern, handler), disconnect(). A background actor owns the
/// socket, reconnects with jittered exponential backoff, queues publishes
/// while offline, restores subscriptions, and replays missed events on
/// reconnect before live delivery resumes.
pub mod connection;
pub mod handler;
pub mod queue;

pub use connection::{
    BusClient, ClientError, ClientNotification, ClientOptions, ClientState, PublishOptions,
    SubscribeOptions,
};
pub use handler::{EventHandler, FnHandler, HandlerOutcome};
