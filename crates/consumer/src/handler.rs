//! Event handler trait and error classification.

use std::collections::VecDeque;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use thiserror::Error;

use crate::events::IntegrationEvent;

/// What went wrong while handling an event.
///
/// The classification decides redelivery: recoverable errors put the message
/// back on the subscription, non-recoverable ones acknowledge and drop it,
/// because redelivering a payload that cannot be processed only loops.
#[derive(Debug, Clone, Error)]
pub enum HandlerError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Referenced entity not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}

impl HandlerError {
    /// Whether redelivering the same message could succeed.
    ///
    /// Errors that are not clearly permanent count as recoverable.
    pub fn is_recoverable(&self) -> bool {
        match self {
            HandlerError::Connection(_) | HandlerError::Timeout(_) | HandlerError::Other(_) => {
                true
            }
            HandlerError::Validation(_) | HandlerError::NotFound(_) => false,
        }
    }
}

/// Processes one integration event.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: IntegrationEvent) -> Result<(), HandlerError>;
}

#[derive(Default)]
struct RecordingHandlerState {
    handled: Vec<IntegrationEvent>,
    scripted_failures: VecDeque<HandlerError>,
}

/// In-memory handler implementation for testing.
///
/// Records every event it sees; failures scripted with `push_failure` are
/// returned one per call, oldest first, before handling succeeds again.
#[derive(Clone, Default)]
pub struct RecordingHandler {
    state: Arc<RwLock<RecordingHandlerState>>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the next call to fail with `error`.
    pub fn push_failure(&self, error: HandlerError) {
        self.state
            .write()
            .unwrap()
            .scripted_failures
            .push_back(error);
    }

    /// Every event handled so far, including the ones that failed.
    pub fn handled(&self) -> Vec<IntegrationEvent> {
        self.state.read().unwrap().handled.clone()
    }

    pub fn handled_count(&self) -> usize {
        self.state.read().unwrap().handled.len()
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn handle(&self, event: IntegrationEvent) -> Result<(), HandlerError> {
        let mut state = self.state.write().unwrap();
        state.handled.push(event);
        match state.scripted_failures.pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}
