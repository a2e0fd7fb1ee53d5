use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::RetryPolicy;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::Result;
use crate::error::OutboxError;
use crate::event::{
    NewOutboxEvent, OutboxEvent, OutboxEventId, OutboxStatus, cap_error_message,
};
use crate::store::{OutboxStore, QueueDepth};

/// PostgreSQL-backed outbox store implementation.
#[derive(Clone)]
pub struct PostgresOutboxStore {
    pool: PgPool,
}

impl PostgresOutboxStore {
    /// Creates a new PostgreSQL outbox store.
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

    /// Enqueues an event on an open connection, so the caller can commit it
    /// in the same transaction as the state change that produced it.
    pub async fn enqueue_with(
        conn: &mut sqlx::PgConnection,
        event: NewOutboxEvent,
    ) -> Result<OutboxEvent> {
        let event = event.into_event();
        Self::insert(&mut *conn, &event).await?;
        Ok(event)
    }

    async fn insert<'e, E>(executor: E, event: &OutboxEvent) -> Result<()>
    where
        E: sqlx::PgExecutor<'e>,
    {
        sqlx::query(
            r#"
            INSERT INTO outbox_events
                (id, aggregate_id, aggregate_type, event_type, payload, status,
                 retry_count, error_message, created_at, processed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(event.id.as_uuid())
        .bind(event.aggregate_id)
        .bind(&event.aggregate_type)
        .bind(&event.event_type)
        .bind(&event.payload)
        .bind(event.status.as_str())
        .bind(event.retry_count as i32)
        .bind(&event.error_message)
        .bind(event.created_at)
        .bind(event.processed_at)
        .execute(executor)
        .await?;
        Ok(())
    }

    fn row_to_event(row: PgRow) -> Result<OutboxEvent> {
        let status: String = row.try_get("status")?;
        let retry_count: i32 = row.try_get("retry_count")?;

        Ok(OutboxEvent {
            id: OutboxEventId::from_uuid(row.try_get::<Uuid, _>("id")?),
            aggregate_id: row.try_get("aggregate_id")?,
            aggregate_type: row.try_get("aggregate_type")?,
            event_type: row.try_get("event_type")?,
            payload: row.try_get("payload")?,
            status: OutboxStatus::parse(&status).unwrap_or(OutboxStatus::Failed),
            retry_count: retry_count.max(0) as u32,
            error_message: row.try_get("error_message")?,
            created_at: row.try_get("created_at")?,
            processed_at: row.try_get("processed_at")?,
        })
    }
}

#[async_trait]
impl OutboxStore for PostgresOutboxStore {
    async fn enqueue(&self, event: NewOutboxEvent) -> Result<OutboxEvent> {
        let event = event.into_event();
        Self::insert(&self.pool, &event).await?;
        tracing::debug!(
            event_id = %event.id,
            event_type = %event.event_type,
            "enqueued outbox event"
        );
        Ok(event)
    }

    async fn claim_pending(&self, limit: usize) -> Result<Vec<OutboxEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT id, aggregate_id, aggregate_type, event_type, payload, status,
                   retry_count, error_message, created_at, processed_at
            FROM outbox_events
            WHERE status = 'pending'
            ORDER BY created_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_event).collect()
    }

    async fn mark_processed(&self, id: OutboxEventId) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_events
            SET status = 'processed', processed_at = NOW(), error_message = NULL
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(OutboxError::NotFound(id));
        }
        Ok(())
    }

    async fn mark_failed(&self, id: OutboxEventId, error: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_events
            SET status = 'failed', retry_count = retry_count + 1, error_message = $2
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(cap_error_message(error))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(OutboxError::NotFound(id));
        }
        Ok(())
    }

    async fn release_for_retry(&self, policy: &RetryPolicy) -> Result<usize> {
        // Backoff counts from creation, doubling per recorded attempt.
        let result = sqlx::query(
            r#"
            UPDATE outbox_events
            SET status = 'pending', error_message = NULL
            WHERE status = 'failed'
              AND retry_count < $1
              AND created_at
                  + make_interval(secs => LEAST($2, $3 * power(2::double precision, retry_count)))
                  <= NOW()
            "#,
        )
        .bind(policy.max_attempts() as i32)
        .bind(policy.max_delay().as_secs_f64())
        .bind(policy.base_delay().as_secs_f64())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() as usize)
    }

    async fn delete_processed_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM outbox_events WHERE status = 'processed' AND processed_at < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn queue_depth(&self) -> Result<QueueDepth> {
        let counts = sqlx::query_as::<_, (String, i64)>(
            "SELECT status, COUNT(*) FROM outbox_events GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut depth = QueueDepth::default();
        for (status, count) in counts {
            match OutboxStatus::parse(&status) {
                Some(OutboxStatus::Pending) => depth.pending = count,
                Some(OutboxStatus::Processed) => depth.processed = count,
                Some(OutboxStatus::Failed) | None => depth.failed += count,
            }
        }
        Ok(depth)
    }
}
