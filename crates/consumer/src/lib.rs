//! Resilient event consumption for the integration topics.
//!
//! Each [`EventConsumer`] owns one durable subscription on one topic. Raw
//! messages are decoded into [`IntegrationEvent`]s and handed to an
//! [`EventHandler`]; the handler's error classification decides whether a
//! failed message is redelivered or dropped. Transport failures trigger
//! bounded reconnection with exponential backoff.

pub mod events;
pub mod handler;
pub mod mapper;
pub mod service;

pub use events::IntegrationEvent;
pub use handler::{EventHandler, HandlerError, RecordingHandler};
pub use mapper::map_envelope;
pub use service::{ConsumerConfig, ConsumerExit, EventConsumer};
