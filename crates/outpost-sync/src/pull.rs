//! # Incremental Pull
//!
//! Brings server-side changes into the local store and keeps the cache bounded.
//!
//! ## Pull Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      pull(entity_type)                                  │
//! │                                                                         │
//! │  cursor = sync_cursors[entity_type]        (absent → full pull)        │
//! │  started = now                                                          │
//! │                                                                         │
//! │  page 1..n:  GET path?updatedSince=cursor&page=n&pageSize=size         │
//! │              collect items, stop on a short page                        │
//! │                                                                         │
//! │  BEGIN                                                                  │
//! │    upsert every item (server wins unless local is unsynced and newer)  │
//! │    cursor = started                                                     │
//! │  COMMIT                                                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A pull that fails part way leaves the cursor where it was, so the next
//! pull asks for the same window again.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

use crate::adapter::{AdapterContext, AdapterRegistry, EntityAdapter};
use crate::error::{SyncError, SyncResult};
use crate::transport::ApiRequest;
use outpost_core::ServerRecord;
use outpost_db::{CursorRepository, Database, RecordRepository, RecordTable, UpsertOutcome};

/// What one pull of one entity type did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullReport {
    pub entity_type: String,
    pub pages: u32,
    pub inserted: usize,
    pub updated: usize,
    /// Items skipped because the local copy had newer unsynced changes.
    pub kept_local: usize,
}

/// Runs incremental pulls and cache eviction.
pub struct PullService {
    db: Database,
    ctx: AdapterContext,
    registry: AdapterRegistry,
    page_size: u32,
    retention: Duration,
}

impl PullService {
    pub fn new(ctx: AdapterContext, registry: AdapterRegistry, page_size: u32, retention_days: i64) -> Self {
        PullService {
            db: ctx.db.clone(),
            ctx,
            registry,
            page_size: page_size.max(1),
            retention: Duration::days(retention_days.max(1)),
        }
    }

    /// Pulls every entity type whose adapter has a pull endpoint, parents
    /// before children.
    pub async fn pull_all(&self) -> SyncResult<Vec<PullReport>> {
        let mut reports = Vec::new();
        for table in RecordTable::ALL {
            let Some(adapter) = self.registry.get(table.entity_type()) else {
                continue;
            };
            if adapter.pull_path().is_none() {
                continue;
            }
            reports.push(self.pull_with(table, adapter).await?);
        }
        Ok(reports)
    }

    /// Pulls one entity type.
    pub async fn pull(&self, entity_type: &str) -> SyncResult<PullReport> {
        let table = RecordTable::from_entity_type(entity_type)
            .ok_or_else(|| SyncError::UnknownEntityType(entity_type.to_string()))?;
        let adapter = self
            .registry
            .get(entity_type)
            .ok_or_else(|| SyncError::UnknownEntityType(entity_type.to_string()))?;

        self.pull_with(table, adapter).await
    }

    async fn pull_with(&self, table: RecordTable, adapter: Arc<dyn EntityAdapter>) -> SyncResult<PullReport> {
        let entity_type = table.entity_type();
        let path = adapter.pull_path().ok_or_else(|| SyncError::UnsupportedOperation {
            entity_type: entity_type.to_string(),
            kind: "pull".to_string(),
        })?;

        let since = self.db.cursors().get(entity_type).await?.map(|c| c.last_synced_at);
        let started = Utc::now();

        let (records, pages) = self.fetch(adapter.as_ref(), path, since).await?;

        let mut report = PullReport {
            entity_type: entity_type.to_string(),
            pages,
            ..Default::default()
        };

        let mut tx = self.db.begin().await?;
        for record in &records {
            match RecordRepository::upsert_from_server_with(&mut *tx, table, record, started).await? {
                UpsertOutcome::Inserted => report.inserted += 1,
                UpsertOutcome::Updated => report.updated += 1,
                UpsertOutcome::KeptLocal => report.kept_local += 1,
            }
        }
        CursorRepository::advance_with(&mut *tx, entity_type, started).await?;
        tx.commit().await?;

        info!(
            entity_type,
            pages = report.pages,
            inserted = report.inserted,
            updated = report.updated,
            kept_local = report.kept_local,
            "Pull applied"
        );
        Ok(report)
    }

    async fn fetch(
        &self,
        adapter: &dyn EntityAdapter,
        path: &str,
        since: Option<DateTime<Utc>>,
    ) -> SyncResult<(Vec<ServerRecord>, u32)> {
        let mut records = Vec::new();
        let mut page = 1u32;

        loop {
            let mut request = ApiRequest::get(path);
            if let Some(since) = since {
                request = request.with_query("updatedSince", since.to_rfc3339());
            }
            let request = request
                .with_query("page", page)
                .with_query("pageSize", self.page_size);

            let response = self.ctx.call(request).await?;
            let items = response
                .body
                .get("items")
                .and_then(Value::as_array)
                .ok_or_else(|| SyncError::InvalidPayload(format!("{} page {} has no items", path, page)))?;

            debug!(path, page, items = items.len(), "Pull page received");

            for item in items {
                records.push(adapter.parse_server_record(item)?);
            }

            if items.len() < self.page_size as usize {
                return Ok((records, page));
            }
            page += 1;
        }
    }

    /// Drops synced records nobody has read within the retention window.
    /// Children go first.
    pub async fn evict(&self, now: DateTime<Utc>) -> SyncResult<u64> {
        let cutoff = now - self.retention;
        let mut evicted = 0;

        for table in RecordTable::ALL.iter().rev() {
            evicted += self.db.records(*table).evict_stale(cutoff).await?;
        }

        if evicted > 0 {
            info!(evicted, cutoff = %cutoff, "Cache eviction finished");
        }
        Ok(evicted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{test_context, MockTransport};
    use crate::transport::Method;
    use outpost_core::{entity, NewLocalRecord};
    use serde_json::json;

    async fn service(page_size: u32) -> (PullService, Database, Arc<MockTransport>) {
        let (ctx, transport, _) = test_context().await;
        let db = ctx.db.clone();
        (
            PullService::new(ctx, AdapterRegistry::with_defaults(), page_size, 90),
            db,
            transport,
        )
    }

    fn remote_client(id: i64, number: &str, updated_at: &str) -> Value {
        json!({
            "id": id,
            "documentNumber": number,
            "documentType": "CC",
            "clientType": "person",
            "name": format!("Client {}", number),
            "updatedAt": updated_at,
        })
    }

    fn query<'a>(request: &'a ApiRequest, key: &str) -> Option<&'a str> {
        request
            .query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    #[tokio::test]
    async fn test_pull_pages_until_short_page() {
        let (service, db, transport) = service(2).await;
        transport.reply(
            Method::Get,
            "/api/clients",
            200,
            json!({ "items": [
                remote_client(1, "A", "2024-05-01T10:00:00Z"),
                remote_client(2, "B", "2024-05-01T10:00:00Z"),
            ]}),
        );
        transport.reply(
            Method::Get,
            "/api/clients",
            200,
            json!({ "items": [remote_client(3, "C", "2024-05-01T10:00:00Z")] }),
        );

        let report = service.pull(entity::CLIENTS).await.unwrap();

        assert_eq!(report.pages, 2);
        assert_eq!(report.inserted, 3);
        assert_eq!(db.records(RecordTable::Clients).count().await.unwrap(), 3);

        let sent = transport.requests();
        assert_eq!(query(&sent[0], "page"), Some("1"));
        assert_eq!(query(&sent[1], "page"), Some("2"));
        assert_eq!(query(&sent[0], "pageSize"), Some("2"));
        assert_eq!(query(&sent[0], "updatedSince"), None);
        assert!(db.cursors().get(entity::CLIENTS).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_second_pull_sends_cursor() {
        let (service, db, transport) = service(50).await;

        service.pull(entity::CLIENTS).await.unwrap();
        let cursor = db.cursors().get(entity::CLIENTS).await.unwrap().unwrap();
        service.pull(entity::CLIENTS).await.unwrap();

        let sent = transport.requests();
        assert_eq!(sent.len(), 2);
        assert_eq!(
            query(&sent[1], "updatedSince"),
            Some(cursor.last_synced_at.to_rfc3339().as_str())
        );
    }

    #[tokio::test]
    async fn test_pull_updates_existing_record_by_business_key() {
        let (service, db, transport) = service(50).await;
        let clients = db.records(RecordTable::Clients);
        let local = clients
            .insert(&NewLocalRecord::new(Some("A".into()), json!({ "name": "Old" })))
            .await
            .unwrap();
        let mut conn = db.pool().acquire().await.unwrap();
        RecordRepository::confirm_with(
            &mut conn,
            RecordTable::Clients,
            local.local_id,
            None,
            None,
            DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z").unwrap().with_timezone(&Utc),
        )
        .await
        .unwrap();
        drop(conn);

        transport.reply(
            Method::Get,
            "/api/clients",
            200,
            json!({ "items": [remote_client(40, "A", "2024-05-01T10:00:00Z")] }),
        );

        let report = service.pull(entity::CLIENTS).await.unwrap();

        assert_eq!(report.updated, 1);
        let record = clients.get(local.local_id).await.unwrap().unwrap();
        assert_eq!(record.server_id, Some(40));
        assert_eq!(record.data_json().unwrap()["name"], json!("Client A"));
    }

    #[tokio::test]
    async fn test_newer_unsynced_local_copy_wins() {
        let (service, db, transport) = service(50).await;
        let clients = db.records(RecordTable::Clients);
        let local = clients
            .insert(&NewLocalRecord::new(Some("A".into()), json!({ "name": "Edited offline" })))
            .await
            .unwrap();

        transport.reply(
            Method::Get,
            "/api/clients",
            200,
            json!({ "items": [remote_client(40, "A", "2020-01-01T00:00:00Z")] }),
        );

        let report = service.pull(entity::CLIENTS).await.unwrap();

        assert_eq!(report.kept_local, 1);
        let record = clients.get(local.local_id).await.unwrap().unwrap();
        assert_eq!(record.data_json().unwrap()["name"], json!("Edited offline"));
        assert!(!record.synced);
    }

    #[tokio::test]
    async fn test_failed_page_keeps_cursor() {
        let (service, db, transport) = service(1).await;
        transport.reply(
            Method::Get,
            "/api/clients",
            200,
            json!({ "items": [remote_client(1, "A", "2024-05-01T10:00:00Z")] }),
        );
        transport.reply(Method::Get, "/api/clients", 503, Value::Null);

        assert!(service.pull(entity::CLIENTS).await.is_err());

        assert!(db.cursors().get(entity::CLIENTS).await.unwrap().is_none());
        assert_eq!(db.records(RecordTable::Clients).count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_pull_all_links_lines_to_pulled_lists() {
        let (service, db, transport) = service(50).await;
        transport.reply(
            Method::Get,
            "/api/price-lists",
            200,
            json!({ "items": [{ "id": 812, "name": "Retail", "updatedAt": "2024-05-01T10:00:00Z" }] }),
        );
        transport.reply(
            Method::Get,
            "/api/price-lists/lines",
            200,
            json!({ "items": [{
                "id": 9001,
                "priceListId": 812,
                "productId": 7,
                "price": 10.0,
                "updatedAt": "2024-05-01T10:00:00Z"
            }]}),
        );

        let reports = service.pull_all().await.unwrap();

        assert_eq!(reports.len(), 3);
        let list = db
            .records(RecordTable::PriceLists)
            .find_by_server_id(812)
            .await
            .unwrap()
            .unwrap();
        let lines = db
            .records(RecordTable::PriceListItems)
            .list_children(list.local_id)
            .await
            .unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].business_key.as_deref(), Some("7"));
    }

    #[tokio::test]
    async fn test_unknown_entity_type_rejected() {
        let (service, _, _) = service(50).await;
        assert!(matches!(
            service.pull("invoices").await,
            Err(SyncError::UnknownEntityType(_))
        ));
    }

    #[tokio::test]
    async fn test_evict_drops_only_stale_synced_records() {
        let (service, db, transport) = service(50).await;
        transport.reply(
            Method::Get,
            "/api/clients",
            200,
            json!({ "items": [
                remote_client(1, "A", "2024-05-01T10:00:00Z"),
                remote_client(2, "B", "2024-05-01T10:00:00Z"),
            ]}),
        );
        service.pull(entity::CLIENTS).await.unwrap();

        let clients = db.records(RecordTable::Clients);
        let stale = clients.find_by_server_id(1).await.unwrap().unwrap();
        clients
            .touch(stale.local_id, Utc::now() - Duration::days(120))
            .await
            .unwrap();
        let unsynced = clients
            .insert(&NewLocalRecord::new(Some("C".into()), json!({ "name": "Offline" })))
            .await
            .unwrap();
        clients
            .touch(unsynced.local_id, Utc::now() - Duration::days(120))
            .await
            .unwrap();

        let evicted = service.evict(Utc::now()).await.unwrap();

        assert_eq!(evicted, 1);
        assert!(clients.find_by_server_id(1).await.unwrap().is_none());
        assert!(clients.find_by_server_id(2).await.unwrap().is_some());
        assert!(clients.get(unsynced.local_id).await.unwrap().is_some());
    }
}
