use thiserror::Error;

use crate::event::OutboxEventId;

/// Errors from outbox operations.
#[derive(Debug, Error)]
pub enum OutboxError {
    #[error("Outbox event not found: {0}")]
    NotFound(OutboxEventId),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, OutboxError>;
