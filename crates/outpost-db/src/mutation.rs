//! # Local Mutations
//!
//! Writes a local change and its pending operation in one transaction.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  BEGIN                                                                  │
//! │    INSERT / UPDATE / DELETE  <entity table>                             │
//! │    INSERT INTO pending_operations                                       │
//! │  COMMIT   ← both or neither                                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use tracing::info;

use crate::error::{DbError, DbResult};
use crate::pool::Database;
use crate::repository::operations::OperationLogRepository;
use crate::repository::records::{RecordRepository, RecordTable};
use outpost_core::{LocalRecord, NewLocalRecord, NewOperation, PendingOperation};

/// A change to one local record.
#[derive(Debug, Clone, PartialEq)]
pub enum LocalMutation {
    /// Optimistic insert of a new, unsynced record.
    Insert(NewLocalRecord),
    /// Replace the record's data and mark it unsynced.
    Update {
        local_id: i64,
        data: serde_json::Value,
    },
    /// Remove the record now. Missing records are ignored.
    Delete { local_id: i64 },
    /// Enqueue only.
    None,
}

/// What [`Database::apply_mutation`] wrote.
#[derive(Debug, Clone)]
pub struct MutationReceipt {
    /// The record after the write (absent for deletes and `None`).
    pub record: Option<LocalRecord>,
    pub operation: PendingOperation,
}

/// What [`Database::insert_aggregate`] wrote.
#[derive(Debug, Clone)]
pub struct AggregateReceipt {
    pub parent: LocalRecord,
    pub children: Vec<LocalRecord>,
    pub operation: PendingOperation,
}

impl Database {
    /// Applies a local mutation and enqueues its operation atomically.
    ///
    /// ## Example
    /// ```rust,ignore
    /// let receipt = db
    ///     .apply_mutation(
    ///         RecordTable::Clients,
    ///         LocalMutation::Insert(NewLocalRecord::new(Some(doc.clone()), data.clone())),
    ///         NewOperation::new(entity::CLIENTS, OperationKind::Create, data, doc),
    ///     )
    ///     .await?;
    /// ```
    pub async fn apply_mutation(
        &self,
        table: RecordTable,
        mutation: LocalMutation,
        operation: NewOperation,
    ) -> DbResult<MutationReceipt> {
        let now = Utc::now();
        let mut tx = self.begin().await?;

        let record = match &mutation {
            LocalMutation::Insert(record) => {
                Some(RecordRepository::insert_with(&mut tx, table, record, now).await?)
            }
            LocalMutation::Update { local_id, data } => Some(
                RecordRepository::update_data_with(&mut tx, table, *local_id, data, now).await?,
            ),
            LocalMutation::Delete { local_id } => {
                RecordRepository::delete_with(&mut tx, table, *local_id).await?;
                None
            }
            LocalMutation::None => None,
        };

        let operation = OperationLogRepository::enqueue_with(&mut tx, &operation, now).await?;

        tx.commit()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        info!(
            op_id = operation.id,
            table = %table,
            kind = %operation.kind,
            "Local mutation recorded"
        );

        Ok(MutationReceipt { record, operation })
    }

    /// Inserts a parent record with its children and enqueues one operation
    /// for the whole aggregate.
    pub async fn insert_aggregate(
        &self,
        parent_table: RecordTable,
        parent: NewLocalRecord,
        child_table: RecordTable,
        children: Vec<NewLocalRecord>,
        operation: NewOperation,
    ) -> DbResult<AggregateReceipt> {
        let now = Utc::now();
        let mut tx = self.begin().await?;

        let parent = RecordRepository::insert_with(&mut tx, parent_table, &parent, now).await?;

        let mut inserted = Vec::with_capacity(children.len());
        for child in children {
            let child = child.with_parent(Some(parent.local_id), parent.server_id);
            inserted.push(RecordRepository::insert_with(&mut tx, child_table, &child, now).await?);
        }

        let operation = OperationLogRepository::enqueue_with(&mut tx, &operation, now).await?;

        tx.commit()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        info!(
            op_id = operation.id,
            parent_local_id = parent.local_id,
            children = inserted.len(),
            "Local aggregate recorded"
        );

        Ok(AggregateReceipt {
            parent,
            children: inserted,
            operation,
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
