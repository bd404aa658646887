//! # HTTP Transport
//!
//! The capability `Send(request) -> response | transport error`, and its
//! reqwest implementation.
//!
//! ## Status Classification
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Response → ErrorClass                                │
//! │                                                                         │
//! │  transport error / timeout   → NetworkUnavailable   (retry)            │
//! │  2xx                         → success                                  │
//! │  401                         → AuthExpired          (refresh, resend)  │
//! │  other 4xx                   → ValidationError      (permanent)        │
//! │  5xx                         → ServerError          (retry)            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use tracing::debug;
use url::Url;

use crate::config::ApiSettings;
use crate::error::{SyncError, SyncResult};
use outpost_core::ErrorClass;

/// Header carrying the operation's entity key so the server can dedupe
/// replayed requests.
pub const IDEMPOTENCY_HEADER: &str = "X-Idempotency-Key";

// =============================================================================
// Request / Response
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Get => write!(f, "GET"),
            Method::Post => write!(f, "POST"),
            Method::Put => write!(f, "PUT"),
            Method::Delete => write!(f, "DELETE"),
        }
    }
}

/// A request to the remote API. `path` is joined onto the API base URL.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        ApiRequest {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Post, path).with_body(body)
    }

    pub fn put(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Put, path).with_body(body)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Adds the idempotency header.
    pub fn idempotency_key(self, key: &str) -> Self {
        self.with_header(IDEMPOTENCY_HEADER, key)
    }

    /// Adds a bearer `Authorization` header.
    pub fn bearer(self, token: &str) -> Self {
        self.with_header("Authorization", format!("Bearer {}", token))
    }

    /// Returns the first header with this name, ignoring case.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Status and parsed body of a remote answer. Empty bodies become `Null`.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    pub fn new(status: u16, body: Value) -> Self {
        ApiResponse { status, body }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Short description for logs and `last_error`.
    pub fn summary(&self) -> String {
        let detail = self
            .body
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| match &self.body {
                Value::Null => String::new(),
                other => other.to_string(),
            });
        if detail.is_empty() {
            format!("HTTP {}", self.status)
        } else {
            format!("HTTP {}: {}", self.status, detail)
        }
    }
}

/// Classifies a status code. `None` means success.
pub fn classify_status(status: u16) -> Option<ErrorClass> {
    match status {
        200..=299 => None,
        401 => Some(ErrorClass::AuthExpired),
        400..=499 => Some(ErrorClass::ValidationError),
        500..=599 => Some(ErrorClass::ServerError),
        // 1xx/3xx are never final answers for this API
        _ => Some(ErrorClass::ServerError),
    }
}

// =============================================================================
// Transport Trait
// =============================================================================

/// Sends one request to the remote API.
///
/// Returns `Err` only when no HTTP answer was received (connection refused,
/// DNS failure, timeout). Any status code, including 4xx/5xx, is `Ok`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: ApiRequest) -> SyncResult<ApiResponse>;
}

// =============================================================================
// Reqwest Transport
// =============================================================================

/// HTTP transport backed by a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpTransport {
    /// Builds a client with the configured request timeout.
    pub fn new(settings: &ApiSettings) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout())
            .build()?;

        Ok(HttpTransport {
            client,
            base_url: settings.url()?,
        })
    }

    fn url_for(&self, request: &ApiRequest) -> SyncResult<Url> {
        let mut url = self.base_url.join(&request.path)?;
        if !request.query.is_empty() {
            url.query_pairs_mut().extend_pairs(request.query.iter());
        }
        Ok(url)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: ApiRequest) -> SyncResult<ApiResponse> {
        let url = self.url_for(&request)?;
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self.client.request(method, url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let text = response.text().await?;

        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            // Error pages are not always JSON; keep them readable
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        debug!(method = %request.method, path = %request.path, status, "Remote call completed");
        Ok(ApiResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status(200), None);
        assert_eq!(classify_status(201), None);
        assert_eq!(classify_status(204), None);
        assert_eq!(classify_status(400), Some(ErrorClass::ValidationError));
        assert_eq!(classify_status(401), Some(ErrorClass::AuthExpired));
        assert_eq!(classify_status(409), Some(ErrorClass::ValidationError));
        assert_eq!(classify_status(500), Some(ErrorClass::ServerError));
        assert_eq!(classify_status(503), Some(ErrorClass::ServerError));
    }

    #[test]
    fn test_request_builders() {
        let request = ApiRequest::post("/api/clients", json!({ "name": "Ana" }))
            .idempotency_key("1020")
            .bearer("token-1");

        assert_eq!(request.method, Method::Post);
        assert_eq!(request.header("x-idempotency-key"), Some("1020"));
        assert_eq!(request.header("authorization"), Some("Bearer token-1"));
    }

    #[test]
    fn test_url_joins_path_and_query() {
        let transport = HttpTransport::new(&ApiSettings {
            base_url: "https://api.example.com".to_string(),
            ..Default::default()
        })
        .unwrap();

        let request = ApiRequest::get("/api/clients")
            .with_query("page", 2)
            .with_query("pageSize", 50);
        let url = transport.url_for(&request).unwrap();

        assert_eq!(
            url.as_str(),
            "https://api.example.com/api/clients?page=2&pageSize=50"
        );
    }

    #[test]
    fn test_response_summary() {
        let response = ApiResponse::new(400, json!({ "message": "name is required" }));
        assert_eq!(response.summary(), "HTTP 400: name is required");
        assert_eq!(ApiResponse::new(503, Value::Null).summary(), "HTTP 503");
    }
}
