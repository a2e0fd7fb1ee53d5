pub mod retry;
pub mod types;

pub use retry::RetryPolicy;
pub use types::{CorrelationId, SagaId};
