use thiserror::Error;

/// Errors raised by a message transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connecting, publishing, or subscribing failed at the transport level.
    #[error("Transport connection error: {0}")]
    Connection(String),

    /// The subscription this handle was created from no longer exists.
    #[error("Subscription closed: {0}")]
    Closed(String),
}

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;
