/// Broker core
///
/// The routing pipeline, leaf-first: topic matching, payload filters,
/// subscriptions and their registry, the partitioned priority queue, the
/// append-only event store, the delivery engine, dead letter handling, and
/// the Router facade that wires them together. Client sessions live here
/// too since delivery and replay revolve around them.
pub mod dead_letter;
pub mod delivery;
pub mod event;
pub mod filter;
pub mod metrics;
pub mod queue;
pub mod registry;
pub mod router;
pub mod session;
pub mod store;
pub mod subscription;
pub mod topic;

pub use dead_letter::{DeadLetterEntry, DeadLetterFilter, DeadLetterHandler};
pub use event::{Event, Priority};
pub use filter::{FilterCondition, FilterOp, PayloadFilter};
pub use queue::{PriorityQueue, QueuedItem};
pub use registry::SubscriptionRegistry;
pub use router::{MetricsSnapshot, PublishReceipt, PublishRequest, Router};
pub use session::{ClientSession, ConnectionState, OutboundMessage, SessionManager};
pub use store::{EventStore, ReadFilter};
pub use subscription::Subscription;
