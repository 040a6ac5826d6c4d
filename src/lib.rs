pub mod arguments;
pub mod broker;
pub mod client; // Agent-side SDK
pub mod config;
pub mod errors;
pub mod logger;
pub mod paths;
pub mod shutdown;
pub mod webserver;

pub use broker::{Event, Priority, Router};
pub use client::BusClient;
pub use errors::RouterError;
