use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::{CorrelationId, SagaId};
use tokio::sync::RwLock;

use crate::{
    Result, SagaLogError,
    model::{SagaFilter, SagaStatistics, SagaStatus, SagaStep, SagaTransaction, derive_status},
    store::SagaLogStore,
};

/// In-memory saga log implementation for testing.
///
/// This implementation stores all sagas in memory and provides
/// the same interface as the PostgreSQL implementation.
#[derive(Clone, Default)]
pub struct InMemorySagaLogStore {
    sagas: Arc<RwLock<HashMap<SagaId, SagaTransaction>>>,
}

impl InMemorySagaLogStore {
    /// Creates a new empty in-memory saga log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of sagas stored.
    pub async fn saga_count(&self) -> usize {
        self.sagas.read().await.len()
    }

    /// Clears all sagas.
    pub async fn clear(&self) {
        self.sagas.write().await.clear();
    }
}

#[async_trait]
impl SagaLogStore for InMemorySagaLogStore {
    async fn start(
        &self,
        id: SagaId,
        saga_type: &str,
        correlation_id: CorrelationId,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> Result<SagaTransaction> {
        let mut sagas = self.sagas.write().await;
        if sagas.contains_key(&id) {
            return Err(SagaLogError::DuplicateSaga(id));
        }

        let saga = SagaTransaction::new(id, saga_type, correlation_id, metadata);
        sagas.insert(id, saga.clone());
        Ok(saga)
    }

    async fn append_step(&self, id: SagaId, step: SagaStep) -> Result<SagaStatus> {
        let mut sagas = self.sagas.write().await;
        let saga = sagas.get_mut(&id).ok_or(SagaLogError::NotFound(id))?;

        saga.steps.push(step);
        saga.status = derive_status(&saga.steps);
        saga.updated_at = Utc::now();
        Ok(saga.status)
    }

    async fn get(&self, id: SagaId) -> Result<Option<SagaTransaction>> {
        let sagas = self.sagas.read().await;
        Ok(sagas.get(&id).cloned())
    }

    async fn list(&self, filter: SagaFilter) -> Result<Vec<SagaTransaction>> {
        let sagas = self.sagas.read().await;
        let mut matching: Vec<_> = sagas
            .values()
            .filter(|s| {
                if let Some(ref saga_type) = filter.saga_type
                    && &s.saga_type != saga_type
                {
                    return false;
                }
                if let Some(status) = filter.status
                    && s.status != status
                {
                    return false;
                }
                true
            })
            .cloned()
            .collect();

        // Newest first
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        if let Some(limit) = filter.limit {
            matching.truncate(limit);
        }
        Ok(matching)
    }

    async fn statistics(&self) -> Result<SagaStatistics> {
        let sagas = self.sagas.read().await;

        let mut by_status: HashMap<String, i64> = HashMap::new();
        let mut by_type: HashMap<String, i64> = HashMap::new();
        for saga in sagas.values() {
            *by_status.entry(saga.status.as_str().to_string()).or_default() += 1;
            *by_type.entry(saga.saga_type.clone()).or_default() += 1;
        }

        Ok(SagaStatistics {
            total: sagas.len() as i64,
            by_status,
            by_type,
        })
    }
}
