use async_trait::async_trait;
use common::{CorrelationId, SagaId};

use crate::{
    Result, SagaLogError,
    model::{SagaFilter, SagaStatistics, SagaStatus, SagaStep, SagaTransaction},
};

/// Core trait for saga log implementations.
///
/// The log is append-only: a saga is created once, grown one step at a time,
/// and never edited or deleted. All implementations must be thread-safe
/// (Send + Sync) because many sagas execute concurrently against one store.
#[async_trait]
pub trait SagaLogStore: Send + Sync {
    /// Creates the record for a saga that is about to execute.
    ///
    /// Fails with `DuplicateSaga` if the id was already started.
    async fn start(
        &self,
        id: SagaId,
        saga_type: &str,
        correlation_id: CorrelationId,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> Result<SagaTransaction>;

    /// Appends one step to a saga's log.
    ///
    /// The saga's cached status is recomputed from the full step list in the
    /// same transaction as the append, so readers never observe a status that
    /// disagrees with the steps. Returns the recomputed status.
    async fn append_step(&self, id: SagaId, step: SagaStep) -> Result<SagaStatus>;

    /// Fetches a saga by id. Absence is `None`, not an error.
    async fn get(&self, id: SagaId) -> Result<Option<SagaTransaction>>;

    /// Lists sagas matching the filter, newest first.
    async fn list(&self, filter: SagaFilter) -> Result<Vec<SagaTransaction>>;

    /// Aggregate counts by status and by saga type.
    async fn statistics(&self) -> Result<SagaStatistics>;
}

/// Extension trait providing convenience methods for saga log stores.
#[async_trait]
pub trait SagaLogStoreExt: SagaLogStore {
    /// Fetches a saga by id, turning absence into `NotFound`.
    async fn require(&self, id: SagaId) -> Result<SagaTransaction> {
        self.get(id).await?.ok_or(SagaLogError::NotFound(id))
    }
}

// Blanket implementation for all SagaLogStore implementations
impl<T: SagaLogStore + ?Sized> SagaLogStoreExt for T {}
