//! # Sync Cursor Repository
//!
//! Incremental pull positions, one row per entity type.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use outpost_core::SyncCursor;

/// Repository for pull cursors.
#[derive(Debug, Clone)]
pub struct CursorRepository {
    pool: SqlitePool,
}

impl CursorRepository {
    /// Creates a new CursorRepository.
    pub fn new(pool: SqlitePool) -> Self {
        CursorRepository { pool }
    }

    /// Returns the cursor for `entity_type`, if a pull ever completed.
    pub async fn get(&self, entity_type: &str) -> DbResult<Option<SyncCursor>> {
        let cursor = sqlx::query_as::<_, SyncCursor>(
            "SELECT entity_type, last_synced_at FROM sync_cursors WHERE entity_type = ?1",
        )
        .bind(entity_type)
        .fetch_optional(&self.pool)
        .await?;

        Ok(cursor)
    }

    /// Moves the cursor, inside the transaction that applied the pulled pages.
    pub async fn advance_with(
        conn: &mut SqliteConnection,
        entity_type: &str,
        last_synced_at: DateTime<Utc>,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_cursors (entity_type, last_synced_at)
            VALUES (?1, ?2)
            ON CONFLICT (entity_type) DO UPDATE SET last_synced_at = excluded.last_synced_at
            "#,
        )
        .bind(entity_type)
        .bind(last_synced_at)
        .execute(&mut *conn)
        .await?;

        debug!(entity_type, %last_synced_at, "Pull cursor advanced");
        Ok(())
    }

    /// Forgets the cursor so the next pull starts from scratch.
    pub async fn reset(&self, entity_type: &str) -> DbResult<()> {
        sqlx::query("DELETE FROM sync_cursors WHERE entity_type = ?1")
            .bind(entity_type)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
