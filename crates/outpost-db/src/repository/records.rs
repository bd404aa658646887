//! # Record Repository
//!
//! Locally cached entity records, one table per entity type.
//!
//! ## Key Promotion
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                 Offline create → server confirmation                    │
//! │                                                                         │
//! │  price_lists                          price_list_items                  │
//! │  ┌──────────────────────────┐         ┌──────────────────────────────┐ │
//! │  │ local_id        = 4      │◄────────│ parent_local_id  = 4         │ │
//! │  │ correlation_key = "c-9"  │         │ parent_server_id = NULL      │ │
//! │  │ server_id       = NULL   │         │ synced           = 0         │ │
//! │  └──────────────────────────┘         └──────────────────────────────┘ │
//! │                 │                                                       │
//! │                 │  create confirmed, server id 812                      │
//! │                 ▼   (one transaction)                                   │
//! │  ┌──────────────────────────┐         ┌──────────────────────────────┐ │
//! │  │ local_id        = 4      │◄────────│ parent_local_id  = 4         │ │
//! │  │ correlation_key = NULL   │         │ parent_server_id = 812       │ │
//! │  │ server_id       = 812    │         │ synced           = 1         │ │
//! │  └──────────────────────────┘         └──────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Table names are never taken from input: every query is built from
//! [`RecordTable::table_name`].

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use outpost_core::{entity, LocalRecord, NewLocalRecord, ServerRecord};

// =============================================================================
// Tables
// =============================================================================

/// Entity tables known to the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordTable {
    Clients,
    PriceLists,
    PriceListItems,
}

impl RecordTable {
    /// Every table, parents before children.
    pub const ALL: [RecordTable; 3] = [
        RecordTable::Clients,
        RecordTable::PriceLists,
        RecordTable::PriceListItems,
    ];

    /// SQL table name.
    pub fn table_name(&self) -> &'static str {
        match self {
            RecordTable::Clients => "clients",
            RecordTable::PriceLists => "price_lists",
            RecordTable::PriceListItems => "price_list_items",
        }
    }

    /// Entity type name used in the operation log.
    pub fn entity_type(&self) -> &'static str {
        match self {
            RecordTable::Clients => entity::CLIENTS,
            RecordTable::PriceLists => entity::PRICE_LISTS,
            RecordTable::PriceListItems => entity::PRICE_LIST_ITEMS,
        }
    }

    /// Looks up a table by entity type name.
    pub fn from_entity_type(entity_type: &str) -> Option<Self> {
        RecordTable::ALL
            .into_iter()
            .find(|table| table.entity_type() == entity_type)
    }

    /// Parent table for child tables.
    pub fn parent(&self) -> Option<RecordTable> {
        match self {
            RecordTable::PriceListItems => Some(RecordTable::PriceLists),
            _ => None,
        }
    }

    /// Child table for parent tables.
    pub fn child(&self) -> Option<RecordTable> {
        match self {
            RecordTable::PriceLists => Some(RecordTable::PriceListItems),
            _ => None,
        }
    }
}

impl fmt::Display for RecordTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table_name())
    }
}

/// Column used to find a single record.
#[derive(Debug, Clone, Copy)]
enum Lookup<'k> {
    LocalId(i64),
    ServerId(i64),
    BusinessKey(&'k str),
    CorrelationKey(&'k str),
}

impl Lookup<'_> {
    fn column(&self) -> &'static str {
        match self {
            Lookup::LocalId(_) => "local_id",
            Lookup::ServerId(_) => "server_id",
            Lookup::BusinessKey(_) => "business_key",
            Lookup::CorrelationKey(_) => "correlation_key",
        }
    }
}

/// Result of applying one pulled record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    /// The local copy has unsynced changes newer than the server's.
    KeptLocal,
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for one entity table.
#[derive(Debug, Clone)]
pub struct RecordRepository {
    pool: SqlitePool,
    table: RecordTable,
}

impl RecordRepository {
    /// Creates a repository bound to `table`.
    pub fn new(pool: SqlitePool, table: RecordTable) -> Self {
        RecordRepository { pool, table }
    }

    /// The table this repository reads and writes.
    pub fn table(&self) -> RecordTable {
        self.table
    }

    // =========================================================================
    // Inserts
    // =========================================================================

    /// Writes a new unsynced record.
    pub async fn insert(&self, record: &NewLocalRecord) -> DbResult<LocalRecord> {
        let mut conn = self.pool.acquire().await?;
        Self::insert_with(&mut conn, self.table, record, Utc::now()).await
    }

    /// Writes a new unsynced record using an existing connection or
    /// transaction.
    pub async fn insert_with(
        conn: &mut SqliteConnection,
        table: RecordTable,
        record: &NewLocalRecord,
        now: DateTime<Utc>,
    ) -> DbResult<LocalRecord> {
        let data = serde_json::to_string(&record.data)?;
        let sql = format!(
            r#"
            INSERT INTO {} (
                business_key, correlation_key, parent_local_id, parent_server_id,
                data, synced, last_modified, last_accessed
            ) VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?6)
            RETURNING *
            "#,
            table.table_name()
        );

        let row = sqlx::query_as::<_, LocalRecord>(&sql)
            .bind(&record.business_key)
            .bind(&record.correlation_key)
            .bind(record.parent_local_id)
            .bind(record.parent_server_id)
            .bind(data)
            .bind(now)
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| match DbError::from(e) {
                DbError::UniqueViolation { field, .. } => DbError::duplicate(
                    field,
                    record.business_key.clone().unwrap_or_default(),
                ),
                other => other,
            })?;

        debug!(table = %table, local_id = row.local_id, "Local record inserted");
        Ok(row)
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    /// Fetches a record by local id and records the read.
    pub async fn get(&self, local_id: i64) -> DbResult<Option<LocalRecord>> {
        self.read(Lookup::LocalId(local_id)).await
    }

    /// Fetches a record by local id using an existing connection.
    pub async fn get_with(
        conn: &mut SqliteConnection,
        table: RecordTable,
        local_id: i64,
    ) -> DbResult<Option<LocalRecord>> {
        Self::find_one(conn, table, Lookup::LocalId(local_id)).await
    }

    /// Fetches a record by server id and records the read.
    pub async fn find_by_server_id(&self, server_id: i64) -> DbResult<Option<LocalRecord>> {
        self.read(Lookup::ServerId(server_id)).await
    }

    /// Fetches a record by business key and records the read.
    pub async fn find_by_business_key(&self, key: &str) -> DbResult<Option<LocalRecord>> {
        self.read(Lookup::BusinessKey(key)).await
    }

    /// Resolves an operation's entity key to its record and records the read.
    ///
    /// Tries the business key first and falls back to the correlation key
    /// for creates the server has not confirmed yet.
    pub async fn resolve(&self, key: &str) -> DbResult<Option<LocalRecord>> {
        if let Some(record) = self.read(Lookup::BusinessKey(key)).await? {
            return Ok(Some(record));
        }
        self.read(Lookup::CorrelationKey(key)).await
    }

    /// Resolves an entity key using an existing connection.
    ///
    /// Engine-side lookups go through here and leave `last_accessed` alone.
    pub async fn resolve_with(
        conn: &mut SqliteConnection,
        table: RecordTable,
        key: &str,
    ) -> DbResult<Option<LocalRecord>> {
        if let Some(record) = Self::find_one(conn, table, Lookup::BusinessKey(key)).await? {
            return Ok(Some(record));
        }
        Self::find_one(conn, table, Lookup::CorrelationKey(key)).await
    }

    /// Finds a child line by parent local id and child business key.
    pub async fn find_child(
        &self,
        parent_local_id: i64,
        business_key: &str,
    ) -> DbResult<Option<LocalRecord>> {
        let mut conn = self.pool.acquire().await?;
        Self::find_child_with(&mut conn, self.table, parent_local_id, business_key).await
    }

    /// Finds a child line using an existing connection.
    pub async fn find_child_with(
        conn: &mut SqliteConnection,
        table: RecordTable,
        parent_local_id: i64,
        business_key: &str,
    ) -> DbResult<Option<LocalRecord>> {
        let sql = format!(
            "SELECT * FROM {} WHERE parent_local_id = ?1 AND business_key = ?2",
            table.table_name()
        );
        let row = sqlx::query_as::<_, LocalRecord>(&sql)
            .bind(parent_local_id)
            .bind(business_key)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(row)
    }

    /// Lists the children of a parent record and records the read.
    pub async fn list_children(&self, parent_local_id: i64) -> DbResult<Vec<LocalRecord>> {
        let sql = format!(
            r#"
            UPDATE {} SET last_accessed = ?2
            WHERE parent_local_id = ?1
            RETURNING *
            "#,
            self.table.table_name()
        );
        let mut rows = sqlx::query_as::<_, LocalRecord>(&sql)
            .bind(parent_local_id)
            .bind(Utc::now())
            .fetch_all(&self.pool)
            .await?;

        rows.sort_by_key(|row| row.local_id);
        Ok(rows)
    }

    /// Counts records in the table.
    pub async fn count(&self) -> DbResult<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", self.table.table_name());
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        Ok(count)
    }

    async fn find_one(
        conn: &mut SqliteConnection,
        table: RecordTable,
        lookup: Lookup<'_>,
    ) -> DbResult<Option<LocalRecord>> {
        let sql = format!(
            "SELECT * FROM {} WHERE {} = ?1",
            table.table_name(),
            lookup.column()
        );
        let query = sqlx::query_as::<_, LocalRecord>(&sql);
        let query = match lookup {
            Lookup::LocalId(id) | Lookup::ServerId(id) => query.bind(id),
            Lookup::BusinessKey(key) | Lookup::CorrelationKey(key) => query.bind(key),
        };

        Ok(query.fetch_optional(&mut *conn).await?)
    }

    /// Host-facing lookup: fetches the record and stamps `last_accessed`.
    async fn read(&self, lookup: Lookup<'_>) -> DbResult<Option<LocalRecord>> {
        let sql = format!(
            "UPDATE {} SET last_accessed = ?2 WHERE {} = ?1 RETURNING *",
            self.table.table_name(),
            lookup.column()
        );
        let query = sqlx::query_as::<_, LocalRecord>(&sql);
        let query = match lookup {
            Lookup::LocalId(id) | Lookup::ServerId(id) => query.bind(id),
            Lookup::BusinessKey(key) | Lookup::CorrelationKey(key) => query.bind(key),
        };

        Ok(query.bind(Utc::now()).fetch_optional(&self.pool).await?)
    }

    // =========================================================================
    // Local Edits
    // =========================================================================

    /// Replaces a record's data after a local edit and marks it unsynced.
    pub async fn update_data_with(
        conn: &mut SqliteConnection,
        table: RecordTable,
        local_id: i64,
        data: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> DbResult<LocalRecord> {
        let data = serde_json::to_string(data)?;
        let sql = format!(
            r#"
            UPDATE {} SET data = ?2, synced = 0, last_modified = ?3, last_accessed = ?3
            WHERE local_id = ?1
            RETURNING *
            "#,
            table.table_name()
        );

        sqlx::query_as::<_, LocalRecord>(&sql)
            .bind(local_id)
            .bind(data)
            .bind(now)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| DbError::not_found(table.table_name(), local_id))
    }

    /// Deletes a record. Children of a price list go with it.
    pub async fn delete_with(
        conn: &mut SqliteConnection,
        table: RecordTable,
        local_id: i64,
    ) -> DbResult<bool> {
        let sql = format!("DELETE FROM {} WHERE local_id = ?1", table.table_name());
        let result = sqlx::query(&sql).bind(local_id).execute(&mut *conn).await?;
        Ok(result.rows_affected() > 0)
    }

    /// Records a read, postponing eviction.
    pub async fn touch(&self, local_id: i64, now: DateTime<Utc>) -> DbResult<()> {
        let sql = format!(
            "UPDATE {} SET last_accessed = ?2 WHERE local_id = ?1",
            self.table.table_name()
        );
        sqlx::query(&sql)
            .bind(local_id)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // =========================================================================
    // Server Confirmation
    // =========================================================================

    /// Folds a confirmed remote result into a record.
    ///
    /// Sets `server_id` when given, clears the correlation key, optionally
    /// replaces `data`, and marks the record synced.
    pub async fn confirm_with(
        conn: &mut SqliteConnection,
        table: RecordTable,
        local_id: i64,
        server_id: Option<i64>,
        data: Option<&serde_json::Value>,
        last_modified: DateTime<Utc>,
    ) -> DbResult<LocalRecord> {
        let data = data.map(serde_json::to_string).transpose()?;
        let sql = format!(
            r#"
            UPDATE {} SET
                server_id = COALESCE(?2, server_id),
                correlation_key = CASE WHEN COALESCE(?2, server_id) IS NULL
                                       THEN correlation_key ELSE NULL END,
                data = COALESCE(?3, data),
                synced = 1,
                last_modified = ?4
            WHERE local_id = ?1
            RETURNING *
            "#,
            table.table_name()
        );

        let row = sqlx::query_as::<_, LocalRecord>(&sql)
            .bind(local_id)
            .bind(server_id)
            .bind(data)
            .bind(last_modified)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| DbError::not_found(table.table_name(), local_id))?;

        debug!(
            table = %table,
            local_id,
            server_id = ?row.server_id,
            "Local record confirmed"
        );
        Ok(row)
    }

    /// Flags a record as carrying local changes the server has not seen yet.
    pub async fn mark_unsynced_with(
        conn: &mut SqliteConnection,
        table: RecordTable,
        local_id: i64,
    ) -> DbResult<()> {
        let sql = format!("UPDATE {} SET synced = 0 WHERE local_id = ?1", table.table_name());
        sqlx::query(&sql).bind(local_id).execute(&mut *conn).await?;
        Ok(())
    }

    /// Propagates a parent's new server id onto its children.
    ///
    /// Every child gets `parent_server_id`; children whose business key is in
    /// `confirmed_keys` were part of the parent's create call and are marked
    /// synced as well.
    pub async fn promote_children_with(
        conn: &mut SqliteConnection,
        child_table: RecordTable,
        parent_local_id: i64,
        parent_server_id: i64,
        confirmed_keys: &[String],
        now: DateTime<Utc>,
    ) -> DbResult<u64> {
        let sql = format!(
            "UPDATE {} SET parent_server_id = ?2 WHERE parent_local_id = ?1",
            child_table.table_name()
        );
        let linked = sqlx::query(&sql)
            .bind(parent_local_id)
            .bind(parent_server_id)
            .execute(&mut *conn)
            .await?
            .rows_affected();

        let sql = format!(
            r#"
            UPDATE {} SET synced = 1, last_modified = ?3
            WHERE parent_local_id = ?1 AND business_key = ?2
            "#,
            child_table.table_name()
        );
        for key in confirmed_keys {
            sqlx::query(&sql)
                .bind(parent_local_id)
                .bind(key)
                .bind(now)
                .execute(&mut *conn)
                .await?;
        }

        debug!(
            table = %child_table,
            parent_local_id,
            parent_server_id,
            linked,
            "Children promoted to parent server id"
        );
        Ok(linked)
    }

    // =========================================================================
    // Incremental Pull
    // =========================================================================

    /// Applies one record from the server, preserving any local id.
    ///
    /// ## Matching
    /// 1. by `server_id`
    /// 2. by business key (top-level tables) or `(parent, business key)`
    ///
    /// ## Conflicts
    /// Server wins, unless the local copy is unsynced and modified after the
    /// server's timestamp.
    pub async fn upsert_from_server_with(
        conn: &mut SqliteConnection,
        table: RecordTable,
        record: &ServerRecord,
        now: DateTime<Utc>,
    ) -> DbResult<UpsertOutcome> {
        let parent_local_id = match (table.parent(), record.parent_server_id) {
            (Some(parent), Some(parent_server_id)) => {
                Self::find_one(conn, parent, Lookup::ServerId(parent_server_id))
                    .await?
                    .map(|parent| parent.local_id)
            }
            _ => None,
        };

        let mut existing = Self::find_one(conn, table, Lookup::ServerId(record.server_id)).await?;
        if existing.is_none() {
            if let Some(key) = &record.business_key {
                existing = match table.parent() {
                    Some(_) => {
                        let sql = format!(
                            "SELECT * FROM {} WHERE parent_server_id = ?1 AND business_key = ?2",
                            table.table_name()
                        );
                        sqlx::query_as::<_, LocalRecord>(&sql)
                            .bind(record.parent_server_id)
                            .bind(key)
                            .fetch_optional(&mut *conn)
                            .await?
                    }
                    None => Self::find_one(conn, table, Lookup::BusinessKey(key)).await?,
                };
            }
        }

        let data = serde_json::to_string(&record.data)?;

        match existing {
            Some(local) if !local.synced && local.last_modified > record.last_modified => {
                debug!(
                    table = %table,
                    local_id = local.local_id,
                    "Keeping newer unsynced local copy"
                );
                Ok(UpsertOutcome::KeptLocal)
            }
            Some(local) => {
                let sql = format!(
                    r#"
                    UPDATE {} SET
                        server_id = ?2,
                        business_key = COALESCE(?3, business_key),
                        correlation_key = NULL,
                        parent_local_id = COALESCE(?4, parent_local_id),
                        parent_server_id = COALESCE(?5, parent_server_id),
                        data = ?6,
                        synced = 1,
                        last_modified = ?7
                    WHERE local_id = ?1
                    "#,
                    table.table_name()
                );
                sqlx::query(&sql)
                    .bind(local.local_id)
                    .bind(record.server_id)
                    .bind(&record.business_key)
                    .bind(parent_local_id)
                    .bind(record.parent_server_id)
                    .bind(data)
                    .bind(record.last_modified)
                    .execute(&mut *conn)
                    .await?;
                Ok(UpsertOutcome::Updated)
            }
            None => {
                let sql = format!(
                    r#"
                    INSERT INTO {} (
                        server_id, business_key, parent_local_id, parent_server_id,
                        data, synced, last_modified, last_accessed
                    ) VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?7)
                    "#,
                    table.table_name()
                );
                sqlx::query(&sql)
                    .bind(record.server_id)
                    .bind(&record.business_key)
                    .bind(parent_local_id)
                    .bind(record.parent_server_id)
                    .bind(data)
                    .bind(record.last_modified)
                    .bind(now)
                    .execute(&mut *conn)
                    .await?;
                Ok(UpsertOutcome::Inserted)
            }
        }
    }

    // =========================================================================
    // Eviction
    // =========================================================================

    /// Deletes synced records not read since `cutoff`.
    ///
    /// Unsynced records are never evicted. A parent stays while any of its
    /// children is unsynced, was read since `cutoff`, or has a queued line
    /// operation.
    pub async fn evict_stale(&self, cutoff: DateTime<Utc>) -> DbResult<u64> {
        let sql = format!(
            "SELECT local_id, last_accessed FROM {} WHERE synced = 1",
            self.table.table_name()
        );
        let candidates: Vec<(i64, DateTime<Utc>)> =
            sqlx::query_as(&sql).fetch_all(&self.pool).await?;

        let mut tx = self.pool.begin().await?;
        let held = match self.table.child() {
            Some(child) => Self::parents_in_use(&mut tx, child, cutoff).await?,
            None => HashSet::new(),
        };

        let stale: Vec<i64> = candidates
            .into_iter()
            .filter(|(local_id, last_accessed)| *last_accessed < cutoff && !held.contains(local_id))
            .map(|(local_id, _)| local_id)
            .collect();

        if stale.is_empty() {
            return Ok(0);
        }

        let mut evicted = 0;
        for local_id in &stale {
            if Self::delete_with(&mut tx, self.table, *local_id).await? {
                evicted += 1;
            }
        }
        tx.commit().await?;

        info!(table = %self.table, evicted, "Evicted stale records");
        Ok(evicted)
    }

    /// Parents that must survive eviction because of their children.
    async fn parents_in_use(
        conn: &mut SqliteConnection,
        child: RecordTable,
        cutoff: DateTime<Utc>,
    ) -> DbResult<HashSet<i64>> {
        let sql = format!(
            r#"
            SELECT parent_local_id, synced, last_accessed FROM {}
            WHERE parent_local_id IS NOT NULL
            "#,
            child.table_name()
        );
        let children: Vec<(i64, bool, DateTime<Utc>)> =
            sqlx::query_as(&sql).fetch_all(&mut *conn).await?;

        let queued: Vec<Option<i64>> = sqlx::query_scalar(
            r#"
            SELECT json_extract(payload, '$.parentLocalId') FROM pending_operations
            WHERE entity_type = ?1
            "#,
        )
        .bind(child.entity_type())
        .fetch_all(&mut *conn)
        .await?;

        let mut held: HashSet<i64> = children
            .into_iter()
            .filter(|(_, synced, last_accessed)| !*synced || *last_accessed >= cutoff)
            .map(|(parent, _, _)| parent)
            .collect();
        held.extend(queued.into_iter().flatten());

        Ok(held)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
