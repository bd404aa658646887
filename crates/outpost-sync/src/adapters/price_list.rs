//! # Price List Adapters
//!
//! A price list is a header with child lines, one per product. Lists created
//! offline have no server id, so they are keyed by a correlation key until
//! the server confirms them.
//!
//! ## Parent/Child Ordering
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  queue                               after CreateWithChildren succeeds  │
//! │                                                                         │
//! │  #1 price_lists  create_with_children  key c-9     → deleted            │
//! │  #2 price_list_items add_line  key c-9:7           → key 812:7          │
//! │     { parentLocalId: 4, priceListId: null }          { priceListId: 812}│
//! │  #3 price_lists  update_header key c-9             → key 812            │
//! │                                                                         │
//! │  #2 and #3 are Deferred (no attempt spent) while #1 is unconfirmed.    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Remote Calls
//! | Kind               | Request                                  |
//! |--------------------|------------------------------------------|
//! | CreateWithChildren | `POST /api/price-lists`                  |
//! | UpdateHeader       | `PUT /api/price-lists/{id}`              |
//! | AddLine            | `POST /api/price-lists/lines/add`        |
//! | UpdateLine         | `PUT /api/price-lists/lines/update-price`|
//! | RemoveLine         | `PUT /api/price-lists/lines/remove`      |

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
use outpost_core::validation::{validate_price_line, validate_price_list};
use outpost_core::{
    entity, LocalRecord, NewOperation, OperationKind, PendingOperation, ServerRecord,
};
use outpost_db::{OperationLogRepository, RecordRepository, RecordTable};

const PATH: &str = "/api/price-lists";
const LINES_PATH: &str = "/api/price-lists/lines";

/// Key a parent is known by in the queue: its server id once confirmed,
/// its correlation key before.
pub(crate) fn parent_key(parent: &LocalRecord) -> String {
    match (&parent.server_id, &parent.correlation_key) {
        (Some(server_id), _) => server_id.to_string(),
        (None, Some(correlation_key)) => correlation_key.clone(),
        (None, None) => format!("local-{}", parent.local_id),
    }
}

fn server_record(item: &Value, business_key: Option<String>, parent: Option<i64>) -> SyncResult<ServerRecord> {
    Ok(ServerRecord {
        server_id: require_i64(item, "id")?,
        business_key,
        parent_server_id: parent,
        data: item.clone(),
        last_modified: updated_at(item)
            .ok_or_else(|| SyncError::InvalidPayload("updatedAt is required".into()))?,
    })
}

// =============================================================================
// Price List (header)
// =============================================================================

/// Adapter for [`entity::PRICE_LISTS`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PriceListAdapter;

impl PriceListAdapter {
    /// Operation creating a list and its lines in one call.
    ///
    /// `data` is `{ name, lines: [{ productId, price }] }`.
    pub fn create_operation(correlation_key: &str, data: Value) -> NewOperation {
        NewOperation::new(
            entity::PRICE_LISTS,
            OperationKind::CreateWithChildren,
            data,
            correlation_key,
        )
    }

    /// Operation renaming a list.
    pub fn header_operation(parent: &LocalRecord, name: &str) -> NewOperation {
        NewOperation::new(
            entity::PRICE_LISTS,
            OperationKind::UpdateHeader,
            json!({
                "localId": parent.local_id,
                "priceListId": parent.server_id,
                "name": name,
            }),
            parent_key(parent),
        )
    }

    /// Points queued work for a freshly confirmed list at its server id.
    async fn rewrite_queued(
        conn: &mut SqliteConnection,
        parent_local_id: i64,
        server_id: i64,
    ) -> SyncResult<()> {
        let lines =
            OperationLogRepository::list_by_entity_type_with(conn, entity::PRICE_LIST_ITEMS).await?;
        for line in lines {
            let mut body = payload(&line)?;
            if !body.is_object()
                || body.get("parentLocalId").and_then(Value::as_i64) != Some(parent_local_id)
                || body.get("priceListId").and_then(Value::as_i64).is_some()
            {
                continue;
            }

            let product_id = require_i64(&body, "productId")?;
            body["priceListId"] = json!(server_id);
            let key = format!("{}:{}", server_id, product_id);
            OperationLogRepository::rewrite_with(conn, line.id, &body, &key).await?;
            debug!(op_id = line.id, %key, "Queued line rewritten to parent server id");
        }

        let headers =
            OperationLogRepository::list_by_entity_type_with(conn, entity::PRICE_LISTS).await?;
        for header in headers {
            if header.kind != OperationKind::UpdateHeader {
                continue;
            }
            let mut body = payload(&header)?;
            if !body.is_object()
                || body.get("localId").and_then(Value::as_i64) != Some(parent_local_id)
            {
                continue;
            }

            body["priceListId"] = json!(server_id);
            OperationLogRepository::rewrite_with(conn, header.id, &body, &server_id.to_string())
                .await?;
        }

        Ok(())
    }

    async fn header_server_id(body: &Value, ctx: &AdapterContext) -> SyncResult<Option<i64>> {
        if let Some(server_id) = body.get("priceListId").and_then(Value::as_i64) {
            return Ok(Some(server_id));
        }
        let local_id = require_i64(body, "localId")?;
        Ok(ctx
            .db
            .records(RecordTable::PriceLists)
            .get(local_id)
            .await?
            .and_then(|record| record.server_id))
    }
}

#[async_trait]
impl EntityAdapter for PriceListAdapter {
    fn entity_type(&self) -> &'static str {
        entity::PRICE_LISTS
    }

    fn supports(&self, kind: OperationKind) -> bool {
        matches!(
            kind,
            OperationKind::CreateWithChildren | OperationKind::UpdateHeader
        )
    }

    fn validate(&self, kind: OperationKind, payload: &Value) -> SyncResult<()> {
        validate_price_list(payload)?;
        if kind == OperationKind::UpdateHeader {
            require_i64(payload, "localId")?;
        }
        Ok(())
    }

    async fn prepare(&self, op: &PendingOperation, ctx: &AdapterContext) -> SyncResult<Readiness> {
        if op.kind != OperationKind::UpdateHeader {
            return Ok(Readiness::Ready);
        }

        let body = payload(op)?;
        if body.get("priceListId").and_then(Value::as_i64).is_some() {
            return Ok(Readiness::Ready);
        }

        let local_id = require_i64(&body, "localId")?;
        match ctx.db.records(RecordTable::PriceLists).get(local_id).await? {
            Some(parent) if parent.server_id.is_none() => Ok(Readiness::Deferred(
                "price list not yet created remotely".into(),
            )),
            _ => Ok(Readiness::Ready),
        }
    }

    async fn execute(&self, op: &PendingOperation, ctx: &AdapterContext) -> ExecutionResult {
        let body = payload(op)?;

        let response = match op.kind {
            OperationKind::CreateWithChildren => {
                ctx.call(ApiRequest::post(PATH, body).idempotency_key(&op.entity_key))
                    .await?
            }
            OperationKind::UpdateHeader => {
                let server_id = Self::header_server_id(&body, ctx)
                    .await?
                    .ok_or_else(|| ExecutionFailure::validation("price list has no server id"))?;

                ctx.call(
                    ApiRequest::put(
                        format!("{}/{}", PATH, server_id),
                        json!({ "name": body.get("name") }),
                    )
                    .idempotency_key(&op.entity_key),
                )
                .await?
            }
            other => {
                return Err(ExecutionFailure::validation(format!(
                    "{} not supported for price lists",
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
        let body = payload(op)?;

        match op.kind {
            OperationKind::CreateWithChildren => {
                let Some(record) =
                    RecordRepository::resolve_with(conn, RecordTable::PriceLists, &op.entity_key)
                        .await?
                else {
                    debug!(op_id = op.id, "Price list removed locally, nothing to confirm");
                    return Ok(());
                };

                confirm_record(conn, RecordTable::PriceLists, op, &record, state).await?;

                if let Some(server_id) = state.server_id {
                    let confirmed: Vec<String> = body
                        .get("lines")
                        .and_then(Value::as_array)
                        .map(|lines| {
                            lines
                                .iter()
                                .filter_map(|line| line.get("productId").and_then(Value::as_i64))
                                .map(|id| id.to_string())
                                .collect()
                        })
                        .unwrap_or_default();

                    RecordRepository::promote_children_with(
                        conn,
                        RecordTable::PriceListItems,
                        record.local_id,
                        server_id,
                        &confirmed,
                        state.last_modified,
                    )
                    .await?;
                    Self::rewrite_queued(conn, record.local_id, server_id).await?;
                }
                Ok(())
            }
            OperationKind::UpdateHeader => {
                let local_id = require_i64(&body, "localId")?;
                if let Some(record) =
                    RecordRepository::get_with(conn, RecordTable::PriceLists, local_id).await?
                {
                    confirm_record(conn, RecordTable::PriceLists, op, &record, state).await?;
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
        server_record(item, None, None)
    }
}

// =============================================================================
// Price List Lines
// =============================================================================

/// Adapter for [`entity::PRICE_LIST_ITEMS`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PriceListItemAdapter;

impl PriceListItemAdapter {
    /// Operation adding, repricing or removing the line for `product_id`.
    pub fn line_operation(
        parent: &LocalRecord,
        kind: OperationKind,
        product_id: i64,
        price: Option<f64>,
    ) -> NewOperation {
        let mut body = json!({
            "parentLocalId": parent.local_id,
            "priceListId": parent.server_id,
            "productId": product_id,
        });
        if let Some(price) = price {
            body["price"] = json!(price);
        }

        NewOperation::new(
            entity::PRICE_LIST_ITEMS,
            kind,
            body,
            format!("{}:{}", parent_key(parent), product_id),
        )
    }

    async fn parent(body: &Value, ctx: &AdapterContext) -> SyncResult<Option<LocalRecord>> {
        match body.get("parentLocalId").and_then(Value::as_i64) {
            Some(local_id) => Ok(ctx.db.records(RecordTable::PriceLists).get(local_id).await?),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl EntityAdapter for PriceListItemAdapter {
    fn entity_type(&self) -> &'static str {
        entity::PRICE_LIST_ITEMS
    }

    fn supports(&self, kind: OperationKind) -> bool {
        kind.is_line()
    }

    fn validate(&self, kind: OperationKind, payload: &Value) -> SyncResult<()> {
        if payload.get("parentLocalId").and_then(Value::as_i64).is_none()
            && payload.get("priceListId").and_then(Value::as_i64).is_none()
        {
            return Err(SyncError::InvalidPayload(
                "parentLocalId or priceListId is required".into(),
            ));
        }

        match kind {
            OperationKind::RemoveLine => require_i64(payload, "productId").map(|_| ()),
            _ => Ok(validate_price_line(payload)?),
        }
    }

    async fn prepare(&self, op: &PendingOperation, ctx: &AdapterContext) -> SyncResult<Readiness> {
        let body = payload(op)?;
        if body.get("priceListId").and_then(Value::as_i64).is_some() {
            return Ok(Readiness::Ready);
        }

        match Self::parent(&body, ctx).await? {
            Some(parent) if parent.server_id.is_none() => Ok(Readiness::Deferred(
                "price list not yet created remotely".into(),
            )),
            // A missing parent fails permanently in execute
            _ => Ok(Readiness::Ready),
        }
    }

    async fn execute(&self, op: &PendingOperation, ctx: &AdapterContext) -> ExecutionResult {
        let body = payload(op)?;

        let server_id = match body.get("priceListId").and_then(Value::as_i64) {
            Some(server_id) => Some(server_id),
            None => Self::parent(&body, ctx).await?.and_then(|p| p.server_id),
        }
        .ok_or_else(|| ExecutionFailure::validation("price list has no server id"))?;
        let product_id = require_i64(&body, "productId")?;

        let request = match op.kind {
            OperationKind::AddLine => ApiRequest::post(
                format!("{}/add", LINES_PATH),
                json!({ "priceListId": server_id, "productId": product_id, "price": body.get("price") }),
            ),
            OperationKind::UpdateLine => ApiRequest::put(
                format!("{}/update-price", LINES_PATH),
                json!({ "priceListId": server_id, "productId": product_id, "price": body.get("price") }),
            ),
            OperationKind::RemoveLine => ApiRequest::put(
                format!("{}/remove", LINES_PATH),
                json!({ "priceListId": server_id, "productId": product_id }),
            ),
            other => {
                return Err(ExecutionFailure::validation(format!(
                    "{} not supported for price list lines",
                    other
                )))
            }
        };

        let response = ctx.call(request.idempotency_key(&op.entity_key)).await?;
        Ok(ServerState::from_response(&response))
    }

    async fn apply(
        &self,
        op: &PendingOperation,
        state: &ServerState,
        conn: &mut SqliteConnection,
    ) -> SyncResult<()> {
        if op.kind == OperationKind::RemoveLine {
            return Ok(());
        }

        let body = payload(op)?;
        let (Some(parent_local_id), Some(product_id)) = (
            body.get("parentLocalId").and_then(Value::as_i64),
            body.get("productId").and_then(Value::as_i64),
        ) else {
            return Ok(());
        };

        let line = RecordRepository::find_child_with(
            conn,
            RecordTable::PriceListItems,
            parent_local_id,
            &product_id.to_string(),
        )
        .await?;

        if let Some(line) = line {
            confirm_record(conn, RecordTable::PriceListItems, op, &line, state).await?;
        }
        Ok(())
    }

    fn pull_path(&self) -> Option<&'static str> {
        Some(LINES_PATH)
    }

    fn parse_server_record(&self, item: &Value) -> SyncResult<ServerRecord> {
        let product_id = require_i64(item, "productId")?;
        let parent = require_i64(item, "priceListId")?;
        server_record(item, Some(product_id.to_string()), Some(parent))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_context;
    use crate::transport::Method;
    use outpost_core::{new_correlation_key, NewLocalRecord};
    use outpost_db::{AggregateReceipt, LocalMutation};

    async fn create_offline(ctx: &AdapterContext) -> AggregateReceipt {
        let key = new_correlation_key();
        ctx.db
            .insert_aggregate(
                RecordTable::PriceLists,
                NewLocalRecord::new(None, json!({ "name": "Retail" })).with_correlation_key(&key),
                RecordTable::PriceListItems,
                vec![NewLocalRecord::new(
                    Some("7".into()),
                    json!({ "productId": 7, "price": 10.0 }),
                )],
                PriceListAdapter::create_operation(
                    &key,
                    json!({ "name": "Retail", "lines": [{ "productId": 7, "price": 10.0 }] }),
                ),
            )
            .await
            .unwrap()
    }

    async fn add_line_offline(ctx: &AdapterContext, parent: &LocalRecord, product_id: i64) -> PendingOperation {
        ctx.db
            .apply_mutation(
                RecordTable::PriceListItems,
                LocalMutation::Insert(
                    NewLocalRecord::new(
                        Some(product_id.to_string()),
                        json!({ "productId": product_id, "price": 15.0 }),
                    )
                    .with_parent(Some(parent.local_id), None),
                ),
                PriceListItemAdapter::line_operation(
                    parent,
                    OperationKind::AddLine,
                    product_id,
                    Some(15.0),
                ),
            )
            .await
            .unwrap()
            .operation
    }

    async fn confirm_create(ctx: &AdapterContext, op: &PendingOperation) {
        let state = PriceListAdapter.execute(op, ctx).await.unwrap();
        let mut conn = ctx.db.pool().acquire().await.unwrap();
        PriceListAdapter.apply(op, &state, &mut conn).await.unwrap();
    }

    #[tokio::test]
    async fn test_create_promotes_children() {
        let (ctx, transport, _) = test_context().await;
        let receipt = create_offline(&ctx).await;
        transport.reply(Method::Post, PATH, 201, json!({ "id": 812 }));

        confirm_create(&ctx, &receipt.operation).await;

        let parent = ctx
            .db
            .records(RecordTable::PriceLists)
            .get(receipt.parent.local_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(parent.server_id, Some(812));
        assert!(parent.correlation_key.is_none());
        assert!(parent.synced);

        let children = ctx
            .db
            .records(RecordTable::PriceListItems)
            .list_children(parent.local_id)
            .await
            .unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].parent_server_id, Some(812));
        assert!(children[0].synced);
    }

    #[tokio::test]
    async fn test_line_deferred_until_parent_confirmed() {
        let (ctx, transport, _) = test_context().await;
        let receipt = create_offline(&ctx).await;
        let line = add_line_offline(&ctx, &receipt.parent, 9).await;

        assert!(line.entity_key.ends_with(":9"));
        assert!(matches!(
            PriceListItemAdapter.prepare(&line, &ctx).await.unwrap(),
            Readiness::Deferred(_)
        ));

        transport.reply(Method::Post, PATH, 201, json!({ "id": 812 }));
        confirm_create(&ctx, &receipt.operation).await;

        let line = ctx.db.operations().get(line.id).await.unwrap().unwrap();
        assert_eq!(line.entity_key, "812:9");
        assert_eq!(payload(&line).unwrap()["priceListId"], json!(812));
        assert_eq!(PriceListItemAdapter.prepare(&line, &ctx).await.unwrap(), Readiness::Ready);

        PriceListItemAdapter.execute(&line, &ctx).await.unwrap();
        let sent = transport.requests_to(Method::Post, "/api/price-lists/lines/add");
        assert_eq!(sent.len(), 1);
        assert_eq!(
            sent[0].body,
            Some(json!({ "priceListId": 812, "productId": 9, "price": 15.0 }))
        );
    }

    #[tokio::test]
    async fn test_header_update_rewritten_on_confirm() {
        let (ctx, transport, _) = test_context().await;
        let receipt = create_offline(&ctx).await;
        let header = ctx
            .db
            .operations()
            .enqueue(&PriceListAdapter::header_operation(&receipt.parent, "Wholesale"))
            .await
            .unwrap();

        assert!(matches!(
            PriceListAdapter.prepare(&header, &ctx).await.unwrap(),
            Readiness::Deferred(_)
        ));

        transport.reply(Method::Post, PATH, 201, json!({ "id": 812 }));
        confirm_create(&ctx, &receipt.operation).await;

        let header = ctx.db.operations().get(header.id).await.unwrap().unwrap();
        assert_eq!(header.entity_key, "812");

        PriceListAdapter.execute(&header, &ctx).await.unwrap();
        let sent = transport.requests_to(Method::Put, "/api/price-lists/812");
        assert_eq!(sent[0].body, Some(json!({ "name": "Wholesale" })));
    }

    #[tokio::test]
    async fn test_line_with_missing_parent_fails_validation() {
        let (ctx, _, _) = test_context().await;
        let line = ctx
            .db
            .operations()
            .enqueue(&NewOperation::new(
                entity::PRICE_LIST_ITEMS,
                OperationKind::RemoveLine,
                json!({ "parentLocalId": 99, "priceListId": null, "productId": 7 }),
                "c-gone:7",
            ))
            .await
            .unwrap();

        assert_eq!(PriceListItemAdapter.prepare(&line, &ctx).await.unwrap(), Readiness::Ready);
        let failure = PriceListItemAdapter.execute(&line, &ctx).await.unwrap_err();
        assert_eq!(failure.class, outpost_core::ErrorClass::ValidationError);
    }

    #[test]
    fn test_validate_line_payloads() {
        let adapter = PriceListItemAdapter;
        assert!(adapter
            .validate(
                OperationKind::AddLine,
                &json!({ "parentLocalId": 1, "productId": 7, "price": 10.0 })
            )
            .is_ok());
        assert!(adapter
            .validate(OperationKind::AddLine, &json!({ "parentLocalId": 1, "productId": 7 }))
            .is_err());
        assert!(adapter
            .validate(OperationKind::RemoveLine, &json!({ "productId": 7 }))
            .is_err());
    }

    #[test]
    fn test_parse_line_record() {
        let record = PriceListItemAdapter
            .parse_server_record(&json!({
                "id": 31,
                "priceListId": 812,
                "productId": 7,
                "price": 10.0,
                "updatedAt": "2024-05-01T10:00:00Z"
            }))
            .unwrap();

        assert_eq!(record.business_key.as_deref(), Some("7"));
        assert_eq!(record.parent_server_id, Some(812));
    }
}
