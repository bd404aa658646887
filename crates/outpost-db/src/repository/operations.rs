//! # Operation Log Repository
//!
//! Durable log of local mutations awaiting remote execution.
//!
//! ## The Outbox Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Operation Log Lifecycle                              │
//! │                                                                         │
//! │  LOCAL MUTATION (e.g., create client)                                  │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                   SINGLE TRANSACTION                            │   │
//! │  │  1. INSERT INTO clients (...)                                   │   │
//! │  │  2. INSERT INTO pending_operations (...) status = 'pending'     │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │            SYNC PROCESSOR                                       │   │
//! │  │  1. list_eligible(now)           ordered by created_at, id      │   │
//! │  │  2. mark_processing(id)          attempts + 1 in one UPDATE     │   │
//! │  │  3. adapter executes remote call                                │   │
//! │  │  4a. success  → mark_succeeded   row deleted                    │   │
//! │  │  4b. failure  → mark_failed      next_eligible_at / permanent   │   │
//! │  │  4c. deferred → release          back to pending                │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  KEY GUARANTEES:                                                       │
//! │  • A mutation is never written without its operation (same tx)        │
//! │  • attempts is incremented and persisted atomically                   │
//! │  • Failed operations stay enumerable until an operator acts           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};

use crate::error::{DbError, DbResult};
use outpost_core::{ErrorClass, NewOperation, PendingOperation, QueueCounts};

const ENTITY: &str = "PendingOperation";

/// Outcome of a failed attempt, as decided by the sync processor.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationFailure {
    /// No automatic retry will happen.
    pub permanent: bool,
    /// Earliest time of the next attempt (ignored when permanent).
    pub next_eligible_at: Option<DateTime<Utc>>,
    pub error_class: ErrorClass,
    pub message: String,
}

/// Repository for the durable operation log.
#[derive(Debug, Clone)]
pub struct OperationLogRepository {
    pool: SqlitePool,
}

impl OperationLogRepository {
    /// Creates a new OperationLogRepository.
    pub fn new(pool: SqlitePool) -> Self {
        OperationLogRepository { pool }
    }

    // =========================================================================
    // Enqueue
    // =========================================================================

    /// Appends an operation to the log.
    ///
    /// Prefer [`crate::Database::apply_mutation`] when the operation has a
    /// matching local write, so both land in one transaction.
    pub async fn enqueue(&self, op: &NewOperation) -> DbResult<PendingOperation> {
        let mut conn = self.pool.acquire().await?;
        Self::enqueue_with(&mut conn, op, Utc::now()).await
    }

    /// Appends an operation using an existing connection or transaction.
    pub async fn enqueue_with(
        conn: &mut SqliteConnection,
        op: &NewOperation,
        now: DateTime<Utc>,
    ) -> DbResult<PendingOperation> {
        let payload = serde_json::to_string(&op.payload)?;

        let row = sqlx::query_as::<_, PendingOperation>(
            r#"
            INSERT INTO pending_operations (
                entity_type, kind, payload, entity_key, created_at,
                status, attempts, permanent
            ) VALUES (?1, ?2, ?3, ?4, ?5, 'pending', 0, 0)
            RETURNING *
            "#,
        )
        .bind(&op.entity_type)
        .bind(op.kind)
        .bind(payload)
        .bind(&op.entity_key)
        .bind(now)
        .fetch_one(&mut *conn)
        .await?;

        debug!(
            op_id = row.id,
            entity_type = %row.entity_type,
            kind = %row.kind,
            entity_key = %row.entity_key,
            "Operation enqueued"
        );

        Ok(row)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Fetches one operation by id.
    pub async fn get(&self, id: i64) -> DbResult<Option<PendingOperation>> {
        let mut conn = self.pool.acquire().await?;
        Self::get_with(&mut conn, id).await
    }

    /// Fetches one operation using an existing connection or transaction.
    pub async fn get_with(
        conn: &mut SqliteConnection,
        id: i64,
    ) -> DbResult<Option<PendingOperation>> {
        let row = sqlx::query_as::<_, PendingOperation>(
            "SELECT * FROM pending_operations WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(row)
    }

    /// Operations that can still be dispatched automatically, now or later.
    ///
    /// ## Returns
    /// Non-permanent `Pending`/`Failed` operations with attempts below
    /// `max_attempts`, ordered by `created_at` then `id`.
    pub async fn list_active(&self, max_attempts: i64) -> DbResult<Vec<PendingOperation>> {
        let rows = sqlx::query_as::<_, PendingOperation>(
            r#"
            SELECT * FROM pending_operations
            WHERE status IN ('pending', 'failed')
              AND permanent = 0
              AND attempts < ?1
            ORDER BY created_at, id
            "#,
        )
        .bind(max_attempts)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Operations eligible for dispatch at `now`, oldest first.
    pub async fn list_eligible(
        &self,
        now: DateTime<Utc>,
        max_attempts: i64,
    ) -> DbResult<Vec<PendingOperation>> {
        let rows = self.list_active(max_attempts).await?;
        Ok(rows
            .into_iter()
            .filter(|op| op.is_eligible(now, max_attempts))
            .collect())
    }

    /// All live operations of one entity type, oldest first.
    pub async fn list_by_entity_type_with(
        conn: &mut SqliteConnection,
        entity_type: &str,
    ) -> DbResult<Vec<PendingOperation>> {
        let rows = sqlx::query_as::<_, PendingOperation>(
            "SELECT * FROM pending_operations WHERE entity_type = ?1 ORDER BY created_at, id",
        )
        .bind(entity_type)
        .fetch_all(&mut *conn)
        .await?;

        Ok(rows)
    }

    /// Permanently failed operations, oldest first.
    pub async fn list_failed(&self, max_attempts: i64) -> DbResult<Vec<PendingOperation>> {
        let rows = sqlx::query_as::<_, PendingOperation>(
            r#"
            SELECT * FROM pending_operations
            WHERE status = 'failed'
              AND (permanent = 1 OR attempts >= ?1)
            ORDER BY created_at, id
            "#,
        )
        .bind(max_attempts)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Counts operations the way the status value reports them.
    pub async fn counts(&self, max_attempts: i64) -> DbResult<QueueCounts> {
        let pending: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM pending_operations WHERE status IN ('pending', 'processing')",
        )
        .fetch_one(&self.pool)
        .await?;

        let retryable_failed: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM pending_operations
            WHERE status = 'failed' AND permanent = 0 AND attempts < ?1
            "#,
        )
        .bind(max_attempts)
        .fetch_one(&self.pool)
        .await?;

        let permanently_failed: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM pending_operations
            WHERE status = 'failed' AND (permanent = 1 OR attempts >= ?1)
            "#,
        )
        .bind(max_attempts)
        .fetch_one(&self.pool)
        .await?;

        Ok(QueueCounts {
            pending,
            retryable_failed,
            permanently_failed,
        })
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    /// Starts an attempt: status `processing`, `attempts + 1`, `last_attempt_at`.
    ///
    /// The increment happens in the same statement that flips the status, so
    /// two callers can never both start an attempt on the same operation.
    pub async fn mark_processing(
        &self,
        id: i64,
        now: DateTime<Utc>,
    ) -> DbResult<PendingOperation> {
        let row = sqlx::query_as::<_, PendingOperation>(
            r#"
            UPDATE pending_operations SET
                status = 'processing',
                attempts = attempts + 1,
                last_attempt_at = ?2
            WHERE id = ?1 AND status != 'processing'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(op) => Ok(op),
            None => match self.get(id).await? {
                Some(_) => Err(DbError::invalid_state(ENTITY, id, "already processing")),
                None => Err(DbError::not_found(ENTITY, id)),
            },
        }
    }

    /// Deletes an operation whose remote call succeeded.
    pub async fn mark_succeeded(&self, id: i64) -> DbResult<()> {
        let mut conn = self.pool.acquire().await?;
        Self::mark_succeeded_with(&mut conn, id).await
    }

    /// Deletes a succeeded operation inside an existing transaction.
    pub async fn mark_succeeded_with(conn: &mut SqliteConnection, id: i64) -> DbResult<()> {
        let result = sqlx::query("DELETE FROM pending_operations WHERE id = ?1")
            .bind(id)
            .execute(&mut *conn)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found(ENTITY, id));
        }

        debug!(op_id = id, "Operation completed and removed");
        Ok(())
    }

    /// Records a failed attempt.
    pub async fn mark_failed(&self, id: i64, failure: &OperationFailure) -> DbResult<()> {
        let next_eligible_at = if failure.permanent {
            None
        } else {
            failure.next_eligible_at
        };

        let result = sqlx::query(
            r#"
            UPDATE pending_operations SET
                status = 'failed',
                permanent = ?2,
                next_eligible_at = ?3,
                last_error = ?4,
                error_class = ?5
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(failure.permanent)
        .bind(next_eligible_at)
        .bind(&failure.message)
        .bind(failure.error_class)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found(ENTITY, id));
        }

        if failure.permanent {
            warn!(
                op_id = id,
                class = %failure.error_class,
                error = %failure.message,
                "Operation permanently failed"
            );
        } else {
            debug!(op_id = id, next_eligible_at = ?next_eligible_at, "Operation scheduled for retry");
        }

        Ok(())
    }

    /// Returns a `processing` operation to `pending` and gives back the
    /// attempt it started.
    pub async fn release(&self, id: i64) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE pending_operations SET
                status = 'pending',
                attempts = MAX(attempts - 1, 0)
            WHERE id = ?1 AND status = 'processing'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found(ENTITY, id));
        }

        Ok(())
    }

    /// Replaces the payload and entity key of a queued operation.
    ///
    /// Used when a parent's server id becomes known and queued child
    /// operations must stop referring to the parent's correlation key.
    pub async fn rewrite_with(
        conn: &mut SqliteConnection,
        id: i64,
        payload: &serde_json::Value,
        entity_key: &str,
    ) -> DbResult<()> {
        let payload = serde_json::to_string(payload)?;

        let result = sqlx::query(
            "UPDATE pending_operations SET payload = ?2, entity_key = ?3 WHERE id = ?1",
        )
        .bind(id)
        .bind(payload)
        .bind(entity_key)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found(ENTITY, id));
        }

        Ok(())
    }

    /// Resolves operations left `processing` by a crash.
    ///
    /// The attempt that was in flight stays counted. Operations that were on
    /// their last attempt become permanently failed so an operator can see
    /// them; the rest go back to `pending`.
    pub async fn recover_interrupted(&self, max_attempts: i64) -> DbResult<u64> {
        let mut tx = self.pool.begin().await?;

        let exhausted = sqlx::query(
            r#"
            UPDATE pending_operations SET
                status = 'failed',
                permanent = 1,
                next_eligible_at = NULL,
                error_class = COALESCE(error_class, 'network_unavailable'),
                last_error = 'interrupted during final attempt'
            WHERE status = 'processing' AND attempts >= ?1
            "#,
        )
        .bind(max_attempts)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let requeued = sqlx::query(
            "UPDATE pending_operations SET status = 'pending' WHERE status = 'processing'",
        )
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;

        if exhausted > 0 {
            warn!(exhausted, "Interrupted operations had no attempts left");
        }
        if requeued > 0 {
            info!(requeued, "Recovered interrupted operations");
        }

        Ok(exhausted + requeued)
    }

    // =========================================================================
    // Operator Actions
    // =========================================================================

    /// Puts a failed operation back into the queue with a fresh attempt budget.
    pub async fn retry_failed(&self, id: i64) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE pending_operations SET
                status = 'pending',
                attempts = 0,
                permanent = 0,
                next_eligible_at = NULL
            WHERE id = ?1 AND status = 'failed'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Failed operation", id));
        }

        info!(op_id = id, "Failed operation requeued by operator");
        Ok(())
    }

    /// Deletes one failed operation.
    pub async fn discard(&self, id: i64) -> DbResult<()> {
        let result = sqlx::query("DELETE FROM pending_operations WHERE id = ?1 AND status = 'failed'")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Failed operation", id));
        }

        info!(op_id = id, "Failed operation discarded by operator");
        Ok(())
    }

    /// Deletes every permanently failed operation.
    pub async fn clear_failed(&self, max_attempts: i64) -> DbResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM pending_operations
            WHERE status = 'failed' AND (permanent = 1 OR attempts >= ?1)
            "#,
        )
        .bind(max_attempts)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
