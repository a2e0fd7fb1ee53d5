//! Transactional outbox.
//!
//! Domain events are enqueued in the same database transaction as the state
//! change that produced them, then published to the message broker by a
//! background dispatcher. The pattern trades immediacy for reliability:
//! an event is never lost once its transaction commits, and never published
//! for a transaction that rolled back. Delivery is at-least-once.

pub mod dispatcher;
pub mod error;
pub mod event;
pub mod memory;
pub mod postgres;
pub mod store;

pub use dispatcher::{DispatchStats, DispatcherConfig, OutboxDispatcher};
pub use error::{OutboxError, Result};
pub use event::{MAX_ERROR_MESSAGE_LEN, NewOutboxEvent, OutboxEvent, OutboxEventId, OutboxStatus};
pub use memory::InMemoryOutboxStore;
pub use postgres::PostgresOutboxStore;
pub use store::{OutboxStore, QueueDepth};
