use common::SagaId;
use saga_log::{SagaLogError, SagaStatus};
use thiserror::Error;

/// Errors from the saga orchestration layer.
#[derive(Debug, Error)]
pub enum SagaError {
    #[error("Saga not found: {0}")]
    NotFound(SagaId),

    #[error("Unknown saga type: {0}")]
    UnknownSagaType(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Saga {saga_id} is already in {status} state")]
    InvalidState {
        saga_id: SagaId,
        status: SagaStatus,
    },

    #[error("Saga log error: {0}")]
    Log(#[from] SagaLogError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SagaError>;
