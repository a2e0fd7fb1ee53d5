use async_trait::async_trait;
use chrono::Utc;
use common::{CorrelationId, SagaId};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    Result, SagaLogError,
    model::{SagaFilter, SagaStatistics, SagaStatus, SagaStep, SagaTransaction, derive_status},
    store::SagaLogStore,
};

/// PostgreSQL-backed saga log implementation.
#[derive(Clone)]
pub struct PostgresSagaLogStore {
    pool: PgPool,
}

impl PostgresSagaLogStore {
    /// Creates a new PostgreSQL saga log.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_saga(row: PgRow) -> Result<SagaTransaction> {
        let steps_json: serde_json::Value = row.try_get("steps")?;
        let steps: Vec<SagaStep> = serde_json::from_value(steps_json)?;

        let metadata_json: serde_json::Value = row.try_get("metadata")?;
        let metadata: serde_json::Map<String, serde_json::Value> =
            serde_json::from_value(metadata_json)?;

        let status: String = row.try_get("status")?;

        Ok(SagaTransaction {
            id: SagaId::from_uuid(row.try_get::<Uuid, _>("id")?),
            saga_type: row.try_get("saga_type")?,
            // The column is a cache of derive_status; fall back to deriving if
            // it ever holds an unknown value.
            status: SagaStatus::parse(&status).unwrap_or_else(|| derive_status(&steps)),
            steps,
            correlation_id: CorrelationId::from_uuid(row.try_get::<Uuid, _>("correlation_id")?),
            metadata,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl SagaLogStore for PostgresSagaLogStore {
    async fn start(
        &self,
        id: SagaId,
        saga_type: &str,
        correlation_id: CorrelationId,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> Result<SagaTransaction> {
        let saga = SagaTransaction::new(id, saga_type, correlation_id, metadata);
        let steps_json = serde_json::to_value(&saga.steps)?;
        let metadata_json = serde_json::Value::Object(saga.metadata.clone());

        sqlx::query(
            r#"
            INSERT INTO saga_logs (id, saga_type, status, steps, correlation_id, metadata, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(saga.id.as_uuid())
        .bind(&saga.saga_type)
        .bind(saga.status.as_str())
        .bind(steps_json)
        .bind(saga.correlation_id.as_uuid())
        .bind(metadata_json)
        .bind(saga.created_at)
        .bind(saga.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("saga_logs_pkey")
            {
                return SagaLogError::DuplicateSaga(id);
            }
            SagaLogError::Database(e)
        })?;

        Ok(saga)
    }

    async fn append_step(&self, id: SagaId, step: SagaStep) -> Result<SagaStatus> {
        // Lock the row so the append and the status recompute commit together.
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT steps FROM saga_logs WHERE id = $1 FOR UPDATE")
            .bind(id.as_uuid())
            .fetch_optional(&mut *tx)
            .await?;
        let row = row.ok_or(SagaLogError::NotFound(id))?;

        let steps_json: serde_json::Value = row.try_get("steps")?;
        let mut steps: Vec<SagaStep> = serde_json::from_value(steps_json)?;
        steps.push(step);

        let status = derive_status(&steps);
        let steps_json = serde_json::to_value(&steps)?;

        sqlx::query(
            r#"
            UPDATE saga_logs
            SET steps = $2, status = $3, updated_at = $4
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(steps_json)
        .bind(status.as_str())
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        tracing::debug!(saga_id = %id, status = %status, steps = steps.len(), "appended saga step");
        Ok(status)
    }

    async fn get(&self, id: SagaId) -> Result<Option<SagaTransaction>> {
        let row = sqlx::query(
            r#"
            SELECT id, saga_type, status, steps, correlation_id, metadata, created_at, updated_at
            FROM saga_logs
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_saga).transpose()
    }

    async fn list(&self, filter: SagaFilter) -> Result<Vec<SagaTransaction>> {
        let mut sql = String::from(
            "SELECT id, saga_type, status, steps, correlation_id, metadata, created_at, updated_at FROM saga_logs WHERE 1=1",
        );
        let mut param_count = 0;

        // Build dynamic query
        if filter.saga_type.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND saga_type = ${param_count}"));
        }
        if filter.status.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND status = ${param_count}"));
        }

        sql.push_str(" ORDER BY created_at DESC");

        if filter.limit.is_some() {
            param_count += 1;
            sql.push_str(&format!(" LIMIT ${param_count}"));
        }

        let mut sqlx_query = sqlx::query(&sql);

        if let Some(saga_type) = filter.saga_type {
            sqlx_query = sqlx_query.bind(saga_type);
        }
        if let Some(status) = filter.status {
            sqlx_query = sqlx_query.bind(status.as_str());
        }
        if let Some(limit) = filter.limit {
            sqlx_query = sqlx_query.bind(limit as i64);
        }

        let rows = sqlx_query.fetch_all(&self.pool).await?;
        rows.into_iter().map(Self::row_to_saga).collect()
    }

    async fn statistics(&self) -> Result<SagaStatistics> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM saga_logs")
            .fetch_one(&self.pool)
            .await?;

        let status_rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM saga_logs GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let type_rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT saga_type, COUNT(*) FROM saga_logs GROUP BY saga_type")
                .fetch_all(&self.pool)
                .await?;

        Ok(SagaStatistics {
            total,
            by_status: status_rows.into_iter().collect(),
            by_type: type_rows.into_iter().collect(),
        })
    }
}
