//! Test doubles for the transport, auth and health probe seams.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::adapter::AdapterContext;
use crate::auth::AuthProvider;
use crate::connectivity::HealthProbe;
use crate::error::{SyncError, SyncResult};
use crate::transport::{ApiRequest, ApiResponse, Method, Transport};
use outpost_db::{Database, DbConfig};

// =============================================================================
// Transport
// =============================================================================

#[derive(Debug, Clone)]
pub(crate) enum Reply {
    Status(u16, Value),
    NetworkError,
}

type SendHook = Box<dyn Fn(usize) + Send + Sync>;

/// Scripted transport. Each route answers from its queue; the last reply
/// repeats once the queue is down to one entry.
#[derive(Default)]
pub(crate) struct MockTransport {
    routes: Mutex<HashMap<(Method, String), VecDeque<Reply>>>,
    requests: Mutex<Vec<ApiRequest>>,
    hook: Mutex<Option<SendHook>>,
}

impl MockTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn reply(&self, method: Method, path: &str, status: u16, body: Value) {
        self.push(method, path, Reply::Status(status, body));
    }

    pub(crate) fn fail(&self, method: Method, path: &str) {
        self.push(method, path, Reply::NetworkError);
    }

    fn push(&self, method: Method, path: &str, reply: Reply) {
        self.routes
            .lock()
            .unwrap()
            .entry((method, path.to_string()))
            .or_default()
            .push_back(reply);
    }

    /// Runs `hook` with the running request count after every send.
    pub(crate) fn on_send(&self, hook: impl Fn(usize) + Send + Sync + 'static) {
        *self.hook.lock().unwrap() = Some(Box::new(hook));
    }

    pub(crate) fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn requests_to(&self, method: Method, path: &str) -> Vec<ApiRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method && r.path == path)
            .collect()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: ApiRequest) -> SyncResult<ApiResponse> {
        let key = (request.method, request.path.clone());
        let count = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request.clone());
            requests.len()
        };

        if let Some(hook) = self.hook.lock().unwrap().as_ref() {
            hook(count);
        }

        let reply = {
            let mut routes = self.routes.lock().unwrap();
            match routes.get_mut(&key) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            }
        };

        match reply {
            Some(Reply::Status(status, body)) => Ok(ApiResponse::new(status, body)),
            Some(Reply::NetworkError) => Err(SyncError::ConnectionFailed("connection refused".into())),
            None if request.method == Method::Get => Ok(ApiResponse::new(200, json!({ "items": [] }))),
            None => Ok(ApiResponse::new(200, json!({}))),
        }
    }
}

// =============================================================================
// Auth
// =============================================================================

pub(crate) struct MockAuth {
    token: Mutex<Option<String>>,
    refresh_ok: AtomicBool,
    refreshes: AtomicUsize,
}

impl MockAuth {
    pub(crate) fn new(token: Option<&str>) -> Arc<Self> {
        Arc::new(MockAuth {
            token: Mutex::new(token.map(str::to_string)),
            refresh_ok: AtomicBool::new(true),
            refreshes: AtomicUsize::new(0),
        })
    }

    pub(crate) fn set_refresh_ok(&self, ok: bool) {
        self.refresh_ok.store(ok, Ordering::SeqCst);
    }

    pub(crate) fn set_token(&self, token: Option<&str>) {
        *self.token.lock().unwrap() = token.map(str::to_string);
    }

    pub(crate) fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthProvider for MockAuth {
    async fn current_credential(&self) -> Option<String> {
        self.token.lock().unwrap().clone()
    }

    async fn refresh(&self) -> SyncResult<()> {
        let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
        if self.refresh_ok.load(Ordering::SeqCst) {
            *self.token.lock().unwrap() = Some(format!("refreshed-{}", n));
            Ok(())
        } else {
            Err(SyncError::RefreshFailed("refresh token revoked".into()))
        }
    }
}

// =============================================================================
// Health Probe
// =============================================================================

pub(crate) struct MockProbe {
    healthy: AtomicBool,
    calls: AtomicUsize,
}

impl MockProbe {
    pub(crate) fn new(healthy: bool) -> Self {
        MockProbe {
            healthy: AtomicBool::new(healthy),
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HealthProbe for MockProbe {
    async fn probe(&self) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.healthy.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Fixtures
// =============================================================================

pub(crate) async fn test_db() -> Database {
    Database::new(DbConfig::in_memory()).await.unwrap()
}

/// An in-memory database with a scripted transport and a signed-in user.
pub(crate) async fn test_context() -> (AdapterContext, Arc<MockTransport>, Arc<MockAuth>) {
    let transport = MockTransport::new();
    let auth = MockAuth::new(Some("token-1"));
    let ctx = AdapterContext::new(test_db().await, transport.clone(), auth.clone());
    (ctx, transport, auth)
}
