//! # Client Adapter
//!
//! Clients are flat entities keyed by document number.
//!
//! ## Remote Calls
//! | Kind   | Request                        | Payload                          |
//! |--------|--------------------------------|----------------------------------|
//! | Create | `POST /api/clients`            | client body                      |
//! | Update | `PUT /api/clients/{serverId}`  | client body                      |
//! | Delete | `DELETE /api/clients/{id}`     | `{ "serverId": id \| null }`     |
//!
//! The local record is gone by the time a Delete runs, so the server id is
//! captured in the payload when the delete is enqueued. A client deleted
//! before its Create was confirmed gets the id written into the queued Delete
//! when the Create succeeds.

use async_trait::async_trait;
use serde_json::{json, Value};
use sqlx::SqliteConnection;
use tracing::debug;

use crate::adapter::{
    confirm_record, payload, require_i64, updated_at, AdapterContext, EntityAdapter,
    ExecutionFailure, ExecutionResult, Readiness, ServerState,
};
use crate::error::{SyncError, SyncResult};
use crate::transport::ApiRequest;
use outpost_core::validation::validate_client;
use outpost_core::{
    entity, LocalRecord, NewOperation, OperationKind, PendingOperation, ServerRecord,
};
use outpost_db::{OperationLogRepository, RecordRepository, RecordTable};

const PATH: &str = "/api/clients";

/// Adapter for [`entity::CLIENTS`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientAdapter;

impl ClientAdapter {
    /// Operation for a client created offline.
    pub fn create_operation(data: Value) -> SyncResult<NewOperation> {
        let key = document_number(&data)?;
        Ok(NewOperation::new(entity::CLIENTS, OperationKind::Create, data, key))
    }

    /// Operation for a local edit. `data` is the full client body.
    pub fn update_operation(data: Value) -> SyncResult<NewOperation> {
        let key = document_number(&data)?;
        Ok(NewOperation::new(entity::CLIENTS, OperationKind::Update, data, key))
    }

    /// Operation for deleting `record`, capturing its server id if known.
    pub fn delete_operation(record: &LocalRecord) -> SyncResult<NewOperation> {
        let key = record
            .business_key
            .clone()
            .ok_or_else(|| SyncError::InvalidPayload("client has no document number".into()))?;

        Ok(NewOperation::new(
            entity::CLIENTS,
            OperationKind::Delete,
            json!({ "serverId": record.server_id }),
            key,
        ))
    }

    async fn find_record(op: &PendingOperation, ctx: &AdapterContext) -> SyncResult<Option<LocalRecord>> {
        Ok(ctx
            .db
            .records(RecordTable::Clients)
            .find_by_business_key(&op.entity_key)
            .await?)
    }

    /// Fills the server id into queued deletes for a client removed locally
    /// before its create was confirmed.
    async fn backfill_deletes(
        conn: &mut SqliteConnection,
        op: &PendingOperation,
        server_id: i64,
    ) -> SyncResult<()> {
        let queued = OperationLogRepository::list_by_entity_type_with(conn, entity::CLIENTS).await?;

        for other in queued {
            if other.id == op.id
                || other.kind != OperationKind::Delete
                || other.entity_key != op.entity_key
            {
                continue;
            }

            let mut body = payload(&other)?;
            if body.get("serverId").and_then(Value::as_i64).is_some() {
                continue;
            }
            body["serverId"] = json!(server_id);
            OperationLogRepository::rewrite_with(conn, other.id, &body, &other.entity_key).await?;
            debug!(op_id = other.id, server_id, "Queued client delete given server id");
        }

        Ok(())
    }
}

fn document_number(data: &Value) -> SyncResult<String> {
    data.get("documentNumber")
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| SyncError::InvalidPayload("documentNumber is required".into()))
}

#[async_trait]
impl EntityAdapter for ClientAdapter {
    fn entity_type(&self) -> &'static str {
        entity::CLIENTS
    }

    fn supports(&self, kind: OperationKind) -> bool {
        matches!(
            kind,
            OperationKind::Create | OperationKind::Update | OperationKind::Delete
        )
    }

    fn validate(&self, kind: OperationKind, payload: &Value) -> SyncResult<()> {
        match kind {
            OperationKind::Create | OperationKind::Update => Ok(validate_client(payload)?),
            _ => Ok(()),
        }
    }

    async fn prepare(&self, op: &PendingOperation, ctx: &AdapterContext) -> SyncResult<Readiness> {
        match op.kind {
            OperationKind::Update => match Self::find_record(op, ctx).await? {
                Some(record) if record.server_id.is_none() => Ok(Readiness::Deferred(
                    "client not yet created remotely".into(),
                )),
                _ => Ok(Readiness::Ready),
            },
            OperationKind::Delete => {
                if payload(op)?.get("serverId").and_then(Value::as_i64).is_some() {
                    return Ok(Readiness::Ready);
                }

                let mut conn = ctx.db.pool().acquire().await?;
                let queued =
                    OperationLogRepository::list_by_entity_type_with(&mut conn, entity::CLIENTS)
                        .await?;
                let create_pending = queued.iter().any(|other| {
                    other.id < op.id && other.entity_key == op.entity_key && !other.permanent
                });

                if create_pending {
                    Ok(Readiness::Deferred("earlier client operation still queued".into()))
                } else {
                    Ok(Readiness::Ready)
                }
            }
            _ => Ok(Readiness::Ready),
        }
    }

    async fn execute(&self, op: &PendingOperation, ctx: &AdapterContext) -> ExecutionResult {
        let body = payload(op)?;

        let response = match op.kind {
            OperationKind::Create => {
                ctx.call(ApiRequest::post(PATH, body).idempotency_key(&op.entity_key))
                    .await?
            }
            OperationKind::Update => {
                let Some(record) = Self::find_record(op, ctx).await? else {
                    debug!(op_id = op.id, key = %op.entity_key, "Client deleted locally, skipping update");
                    return Ok(ServerState::local_only());
                };
                let server_id = record
                    .server_id
                    .or_else(|| body.get("serverId").and_then(Value::as_i64))
                    .ok_or_else(|| {
                        ExecutionFailure::validation(format!(
                            "client {} has no server id",
                            op.entity_key
                        ))
                    })?;

                ctx.call(
                    ApiRequest::put(format!("{}/{}", PATH, server_id), body)
                        .idempotency_key(&op.entity_key),
                )
                .await?
            }
            OperationKind::Delete => match body.get("serverId").and_then(Value::as_i64) {
                Some(server_id) => {
                    ctx.call_delete(
                        ApiRequest::delete(format!("{}/{}", PATH, server_id))
                            .idempotency_key(&op.entity_key),
                    )
                    .await?
                }
                None => {
                    debug!(op_id = op.id, "Client never reached the server, nothing to delete");
                    return Ok(ServerState::local_only());
                }
            },
            other => {
                return Err(ExecutionFailure::validation(format!(
                    "{} not supported for clients",
                    other
                )))
            }
        };

        Ok(ServerState::from_response(&response))
    }

    async fn apply(
        &self,
        op: &PendingOperation,
        state: &ServerState,
        conn: &mut SqliteConnection,
    ) -> SyncResult<()> {
        match op.kind {
            OperationKind::Create | OperationKind::Update => {
                let record =
                    RecordRepository::resolve_with(conn, RecordTable::Clients, &op.entity_key)
                        .await?;

                match (record, state.server_id) {
                    (Some(record), _) => {
                        confirm_record(conn, RecordTable::Clients, op, &record, state).await?;
                    }
                    (None, Some(server_id)) if op.kind == OperationKind::Create => {
                        Self::backfill_deletes(conn, op, server_id).await?;
                    }
                    (None, _) => {
                        debug!(op_id = op.id, key = %op.entity_key, "Client removed locally, nothing to confirm");
                    }
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn pull_path(&self) -> Option<&'static str> {
        Some(PATH)
    }

    fn parse_server_record(&self, item: &Value) -> SyncResult<ServerRecord> {
        Ok(ServerRecord {
            server_id: require_i64(item, "id")?,
            business_key: item
                .get("documentNumber")
                .and_then(Value::as_str)
                .map(str::to_string),
            parent_server_id: None,
            data: item.clone(),
            last_modified: updated_at(item)
                .ok_or_else(|| SyncError::InvalidPayload("updatedAt is required".into()))?,
        })
    }
}
