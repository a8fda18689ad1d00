//! Postgres-backed work queue.
//!
//! A receive claims rows with `FOR UPDATE SKIP LOCKED`, pushes `visible_at`
//! forward by the visibility timeout and stamps a fresh pop receipt. Delete
//! only succeeds for the holder of the latest receipt.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use sharepack_core::queue::{QueueError, QueueMessage, QueueResult, WorkQueue};

use crate::SCHEMA;

#[derive(Debug, FromRow)]
struct PgQueueRow {
    message_id: Uuid,
    pop_receipt: Uuid,
    dequeue_count: i32,
    enqueued_at: DateTime<Utc>,
    body: Value,
}

impl From<PgQueueRow> for QueueMessage {
    fn from(r: PgQueueRow) -> Self {
        Self {
            message_id: r.message_id,
            pop_receipt: r.pop_receipt,
            dequeue_count: u32::try_from(r.dequeue_count).unwrap_or(0),
            enqueued_at: r.enqueued_at,
            body: r.body,
        }
    }
}

fn queue_error(e: sqlx::Error) -> QueueError {
    match e {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => QueueError::Connection(e.to_string()),
        other => QueueError::Backend(other.to_string()),
    }
}

#[derive(Clone)]
pub struct PgWorkQueue {
    pool: PgPool,
}

impl PgWorkQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WorkQueue for PgWorkQueue {
    async fn enqueue(&self, body: Value) -> QueueResult<Uuid> {
        let message_id = Uuid::now_v7();
        sqlx::query(&format!(
            "INSERT INTO {SCHEMA}.work_queue (message_id, body) VALUES ($1, $2)"
        ))
        .bind(message_id)
        .bind(&body)
        .execute(&self.pool)
        .await
        .map_err(queue_error)?;
        Ok(message_id)
    }

    async fn receive(
        &self,
        max_messages: usize,
        visibility: Duration,
    ) -> QueueResult<Vec<QueueMessage>> {
        let limit = i64::try_from(max_messages).unwrap_or(i64::MAX);
        let visibility_secs = visibility.as_secs_f64();
        let rows = sqlx::query_as::<_, PgQueueRow>(&format!(
            r#"
            WITH next AS (
                SELECT message_id
                FROM {SCHEMA}.work_queue
                WHERE visible_at <= now()
                ORDER BY enqueued_at
                FOR UPDATE SKIP LOCKED
                LIMIT $1
            )
            UPDATE {SCHEMA}.work_queue q
            SET visible_at = now() + make_interval(secs => $2),
                dequeue_count = q.dequeue_count + 1,
                pop_receipt = gen_random_uuid()
            FROM next
            WHERE q.message_id = next.message_id
            RETURNING q.message_id, q.pop_receipt, q.dequeue_count, q.enqueued_at, q.body
            "#
        ))
        .bind(limit)
        .bind(visibility_secs)
        .fetch_all(&self.pool)
        .await
        .map_err(queue_error)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn delete(&self, message: &QueueMessage) -> QueueResult<()> {
        let result = sqlx::query(&format!(
            "DELETE FROM {SCHEMA}.work_queue WHERE message_id = $1 AND pop_receipt = $2"
        ))
        .bind(message.message_id)
        .bind(message.pop_receipt)
        .execute(&self.pool)
        .await
        .map_err(queue_error)?;
        if result.rows_affected() == 0 {
            return Err(QueueError::StaleReceipt(message.message_id));
        }
        Ok(())
    }

    async fn approximate_length(&self) -> QueueResult<usize> {
        let count = sqlx::query_scalar::<_, i64>(&format!(
            "SELECT count(*) FROM {SCHEMA}.work_queue"
        ))
        .fetch_one(&self.pool)
        .await
        .map_err(queue_error)?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}
