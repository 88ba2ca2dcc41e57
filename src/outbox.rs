use std::sync::Arc;
use std::time::Duration;

use sqlx::{PgExecutor, query_as};
use tracing::{debug, info, instrument};

use crate::metrics::OutboxMetrics;
use crate::models::{OutboxKind, OutboxMessage, OutboxRow, OutboxStatus};

/// Longest reclaim TTL sent to Postgres. Larger values would overflow
/// its interval type.
const MAX_IN_PROGRESS_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

fn ttl_millis(ttl: Duration) -> i64 {
    // The clamped value is far below i64::MAX milliseconds.
    ttl.min(MAX_IN_PROGRESS_TTL).as_millis() as i64
}

/// Durable record of pending notifications.
///
/// Every method takes the executor to run on: a transaction connection
/// when the caller has an open scope, or the pool to run standalone.
#[derive(Clone)]
pub struct OutboxRepository {
    metrics: Arc<dyn OutboxMetrics>,
}

impl OutboxRepository {
    pub fn new(metrics: Arc<dyn OutboxMetrics>) -> Self {
        Self { metrics }
    }

    /// Inserts a `CREATED` message. A key that already exists is left
    /// untouched, so a retried business write never duplicates its event.
    ///
    /// Returns whether a row was inserted.
    #[instrument(skip(self, executor, payload))]
    pub async fn enqueue<'e, E>(
        &self,
        executor: E,
        idempotency_key: &str,
        kind: OutboxKind,
        payload: &[u8],
        trace_id: Option<&str>,
    ) -> Result<bool, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let inserted = sqlx::query(
            r#"
            INSERT INTO outbox (idempotency_key, kind, payload, status, trace_id)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (idempotency_key) DO NOTHING
            "#,
        )
        .bind(idempotency_key)
        .bind(kind.as_str())
        .bind(payload)
        .bind(OutboxStatus::Created.as_str())
        .bind(trace_id)
        .execute(executor)
        .await?
        .rows_affected()
            == 1;

        if inserted {
            self.metrics.record_enqueued(kind.as_str());
            info!(trace_id, "Message enqueued.");
        } else {
            debug!(trace_id, "Message already enqueued, skipping.");
        }

        Ok(inserted)
    }

    /// Claims up to `batch_size` messages that are `CREATED`, or
    /// `IN_PROGRESS` with `updated_at` older than `in_progress_ttl`, and
    /// moves them to `IN_PROGRESS`.
    ///
    /// Rows locked by another claimer are skipped, so two concurrent claims
    /// never return the same message. The result is ordered oldest first.
    #[instrument(skip(self, executor), fields(claimed = tracing::field::Empty))]
    pub async fn claim_batch<'e, E>(
        &self,
        executor: E,
        batch_size: i64,
        in_progress_ttl: Duration,
    ) -> Result<Vec<OutboxMessage>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let ttl_ms = ttl_millis(in_progress_ttl);

        let rows = query_as::<_, OutboxRow>(
            r#"
            UPDATE outbox
            SET status = $1, updated_at = now()
            WHERE idempotency_key IN (
                SELECT idempotency_key
                FROM outbox
                WHERE status = $2
                    OR (status = $1 AND updated_at < now() - ($3::bigint * interval '1 millisecond'))
                ORDER BY created_at
                LIMIT $4
                FOR UPDATE SKIP LOCKED
            )
            RETURNING idempotency_key, kind, payload, status, trace_id, created_at, updated_at
            "#,
        )
        .bind(OutboxStatus::InProgress.as_str())
        .bind(OutboxStatus::Created.as_str())
        .bind(ttl_ms)
        .bind(batch_size)
        .fetch_all(executor)
        .await?;

        // RETURNING does not preserve the subquery order.
        let mut messages = rows
            .into_iter()
            .map(OutboxMessage::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        tracing::Span::current().record("claimed", messages.len());
        Ok(messages)
    }

    /// Marks exactly the given keys as `SUCCESS`. An empty list is a no-op.
    #[instrument(skip_all, fields(keys = idempotency_keys.len()))]
    pub async fn mark_processed<'e, E>(
        &self,
        executor: E,
        idempotency_keys: &[String],
    ) -> Result<u64, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        if idempotency_keys.is_empty() {
            return Ok(0);
        }

        let updated = sqlx::query(
            r#"
            UPDATE outbox
            SET status = $1, updated_at = now()
            WHERE idempotency_key = ANY($2)
            "#,
        )
        .bind(OutboxStatus::Success.as_str())
        .bind(idempotency_keys)
        .execute(executor)
        .await?
        .rows_affected();

        Ok(updated)
    }

    /// Looks up a single message regardless of its status.
    pub async fn find<'e, E>(
        &self,
        executor: E,
        idempotency_key: &str,
    ) -> Result<Option<OutboxMessage>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        query_as::<_, OutboxRow>(
            r#"
            SELECT idempotency_key, kind, payload, status, trace_id, created_at, updated_at
            FROM outbox
            WHERE idempotency_key = $1
            "#,
        )
        .bind(idempotency_key)
        .fetch_optional(executor)
        .await?
        .map(OutboxMessage::try_from)
        .transpose()
    }
}
