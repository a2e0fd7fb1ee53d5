//! Message transport abstraction shared by the outbox publisher and the
//! event consumers.
//!
//! The traits model the small slice of a durable pub/sub broker this system
//! relies on: named subscriptions that survive reconnects, receive with a
//! timeout, and ack/nack semantics. `InMemoryTransport` implements them
//! in-process for tests and single-node runs.

pub mod error;
pub mod memory;
pub mod message;
pub mod topic;
pub mod transport;

pub use error::{Result, TransportError};
pub use memory::InMemoryTransport;
pub use message::{EventMessage, IntegrationEnvelope, MessageId};
pub use topic::{AggregateType, subscription_name};
pub use transport::{MessageTransport, Subscription};
