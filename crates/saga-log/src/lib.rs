//! Durable append-only log of saga executions.
//!
//! A saga's record is created when orchestration starts and grows one step at
//! a time; the overall status is always a pure function of the step list,
//! recomputed atomically with every append. Two interchangeable stores are
//! provided: PostgreSQL for production and an in-memory one for tests.

pub mod error;
pub mod memory;
pub mod model;
pub mod postgres;
pub mod store;

pub use common::{CorrelationId, SagaId};
pub use error::{Result, SagaLogError};
pub use memory::InMemorySagaLogStore;
pub use model::{
    COMPENSATE_PREFIX, SAGA_COMPENSATION_STARTED, SAGA_COMPLETED_FINAL, SagaFilter,
    SagaStatistics, SagaStatus, SagaStep, SagaTransaction, StepStatus, derive_status,
};
pub use postgres::PostgresSagaLogStore;
pub use store::{SagaLogStore, SagaLogStoreExt};
