//! Remote clients for status refresh
//!
//! Two implementations of [`RemoteClient`]:
//! - `HttpClient`: GitHub GraphQL and Bugzilla REST over reqwest (production)
//! - `MockRemote`: canned responses with call recording (testing)

use crate::storage::StorageError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

pub const DEFAULT_GRAPHQL_URL: &str = "https://api.github.com/graphql";
const BUG_FIELDS: &str = "id,summary,status,resolution,assigned_to";

/// Errors from refresh operations.
#[derive(Debug, thiserror::Error)]
pub enum RefreshError {
    #[error("network error: {0}")]
    Network(String),
    #[error("remote returned status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("response parse error: {0}")]
    Parse(String),
    #[error("remote reported an error: {0}")]
    Remote(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("refresh cancelled")]
    Cancelled,
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl From<reqwest::Error> for RefreshError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            RefreshError::Parse(err.to_string())
        } else {
            RefreshError::Network(err.to_string())
        }
    }
}

/// Result type for refresh operations
pub type RefreshResult<T> = Result<T, RefreshError>;

/// One bug from the Bugzilla REST API
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BugRecord {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub resolution: String,
    #[serde(default)]
    pub assigned_to: String,
}

#[derive(Debug, Deserialize)]
struct BugResponse {
    #[serde(default)]
    bugs: Vec<BugRecord>,
    #[serde(default)]
    error: bool,
    #[serde(default)]
    message: Option<String>,
}

/// Transport for remote status lookups.
///
/// Abstracts over HTTP so the refresher can be exercised without a network.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// POST one GraphQL query; returns the decoded response body.
    /// Non-success HTTP status is an error.
    async fn graphql(&self, token: &str, query: &str) -> RefreshResult<Value>;

    /// Fetch a single bug from `host`
    async fn fetch_bug(&self, host: &str, bug_id: i64) -> RefreshResult<BugRecord>;
}

/// reqwest-backed client
pub struct HttpClient {
    client: reqwest::Client,
    graphql_url: String,
    graphql_timeout: Duration,
    bugzilla_timeout: Duration,
    bugzilla_base: Option<String>,
}

impl HttpClient {
    pub fn new() -> RefreshResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("reftrack/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            graphql_url: DEFAULT_GRAPHQL_URL.to_string(),
            graphql_timeout: Duration::from_secs(15),
            bugzilla_timeout: Duration::from_secs(10),
            bugzilla_base: None,
        })
    }

    pub fn with_graphql_url(mut self, url: impl Into<String>) -> Self {
        self.graphql_url = url.into();
        self
    }

    pub fn with_timeouts(mut self, graphql: Duration, bugzilla: Duration) -> Self {
        self.graphql_timeout = graphql;
        self.bugzilla_timeout = bugzilla;
        self
    }

    /// Send every Bugzilla request to `base` instead of `https://<host>`
    pub fn with_bugzilla_base(mut self, base: impl Into<String>) -> Self {
        self.bugzilla_base = Some(base.into());
        self
    }

    fn bugzilla_base(&self, host: &str) -> String {
        match &self.bugzilla_base {
            Some(base) => base.trim_end_matches('/').to_string(),
            None => format!("https://{}", host),
        }
    }
}

async fn check_status(resp: reqwest::Response) -> RefreshResult<reqwest::Response> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(RefreshError::Status {
            status: status.as_u16(),
            message: body,
        });
    }
    Ok(resp)
}

#[async_trait]
impl RemoteClient for HttpClient {
    async fn graphql(&self, token: &str, query: &str) -> RefreshResult<Value> {
        let resp = self
            .client
            .post(&self.graphql_url)
            .bearer_auth(token)
            .timeout(self.graphql_timeout)
            .json(&json!({ "query": query }))
            .send()
            .await?;

        let resp = check_status(resp).await?;
        let body: Value = resp
            .json()
            .await
            .map_err(|e| RefreshError::Parse(e.to_string()))?;
        Ok(body)
    }

    async fn fetch_bug(&self, host: &str, bug_id: i64) -> RefreshResult<BugRecord> {
        let url = format!(
            "{}/rest/bug/{}?include_fields={}",
            self.bugzilla_base(host),
            bug_id,
            BUG_FIELDS
        );
        tracing::debug!(host, bug_id, "fetching bug");

        let resp = self
            .client
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/json")
            .timeout(self.bugzilla_timeout)
            .send()
            .await?;

        let resp = check_status(resp).await?;
        let body: BugResponse = resp
            .json()
            .await
            .map_err(|e| RefreshError::Parse(e.to_string()))?;

        if body.error {
            return Err(RefreshError::Remote(
                body.message.unwrap_or_else(|| "unknown error".to_string()),
            ));
        }
        body.bugs
            .into_iter()
            .next()
            .ok_or_else(|| RefreshError::NotFound(format!("bug {} on {}", bug_id, host)))
    }
}

/// Canned outcome for a mocked call
#[derive(Debug, Clone)]
enum Canned<T> {
    Ok(T),
    Status(u16),
    Network(String),
}

impl<T: Clone> Canned<T> {
    fn resolve(&self) -> RefreshResult<T> {
        match self {
            Canned::Ok(value) => Ok(value.clone()),
            Canned::Status(status) => Err(RefreshError::Status {
                status: *status,
                message: "mock failure".to_string(),
            }),
            Canned::Network(message) => Err(RefreshError::Network(message.clone())),
        }
    }
}

/// Mock client for testing: returns preconfigured responses and records calls.
pub struct MockRemote {
    graphql: Option<Canned<Value>>,
    bugs: HashMap<(String, i64), Canned<BugRecord>>,
    delay: Option<Duration>,
    graphql_calls: Mutex<Vec<String>>,
    bug_calls: Mutex<Vec<(String, i64)>>,
}

impl MockRemote {
    pub fn new() -> Self {
        Self {
            graphql: None,
            bugs: HashMap::new(),
            delay: None,
            graphql_calls: Mutex::new(Vec::new()),
            bug_calls: Mutex::new(Vec::new()),
        }
    }

    /// Body returned for every GraphQL call
    pub fn with_graphql_response(mut self, body: Value) -> Self {
        self.graphql = Some(Canned::Ok(body));
        self
    }

    /// Every GraphQL call fails with this HTTP status
    pub fn with_graphql_status(mut self, status: u16) -> Self {
        self.graphql = Some(Canned::Status(status));
        self
    }

    pub fn with_bug(mut self, host: impl Into<String>, bug: BugRecord) -> Self {
        self.bugs.insert((host.into(), bug.id), Canned::Ok(bug));
        self
    }

    pub fn with_bug_status(mut self, host: impl Into<String>, bug_id: i64, status: u16) -> Self {
        self.bugs.insert((host.into(), bug_id), Canned::Status(status));
        self
    }

    pub fn with_bug_network_error(mut self, host: impl Into<String>, bug_id: i64) -> Self {
        self.bugs
            .insert((host.into(), bug_id), Canned::Network("connection reset".to_string()));
        self
    }

    /// Hold every call for `delay` before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Query text of every GraphQL call made so far
    pub fn graphql_calls(&self) -> Vec<String> {
        self.graphql_calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    /// (host, bug id) of every bug fetch made so far
    pub fn bug_calls(&self) -> Vec<(String, i64)> {
        self.bug_calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

impl Default for MockRemote {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteClient for MockRemote {
    async fn graphql(&self, _token: &str, query: &str) -> RefreshResult<Value> {
        if let Ok(mut calls) = self.graphql_calls.lock() {
            calls.push(query.to_string());
        }
        self.pause().await;
        match &self.graphql {
            Some(canned) => canned.resolve(),
            None => Ok(json!({ "data": {} })),
        }
    }

    async fn fetch_bug(&self, host: &str, bug_id: i64) -> RefreshResult<BugRecord> {
        if let Ok(mut calls) = self.bug_calls.lock() {
            calls.push((host.to_string(), bug_id));
        }
        self.pause().await;
        match self.bugs.get(&(host.to_string(), bug_id)) {
            Some(canned) => canned.resolve(),
            None => Err(RefreshError::NotFound(format!("bug {} on {}", bug_id, host))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve exactly one canned HTTP response on a local port.
    async fn serve_once(status_line: &'static str, body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let n = socket.read(&mut buf).await.unwrap();
            let request = String::from_utf8_lossy(&buf[..n]).to_string();
            let response = format!(
                "{}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            request
        });
        (format!("http://{}", addr), handle)
    }

    #[tokio::test]
    async fn test_fetch_bug_over_http() {
        let (base, server) = serve_once(
            "HTTP/1.1 200 OK",
            r#"{"bugs":[{"id":42,"summary":"Crash","status":"NEW","resolution":"","assigned_to":"nobody@mozilla.org"}]}"#,
        )
        .await;

        let client = HttpClient::new().unwrap().with_bugzilla_base(base);
        let bug = client.fetch_bug("bugzilla.mozilla.org", 42).await.unwrap();
        assert_eq!(bug.summary, "Crash");
        assert_eq!(bug.status, "NEW");

        let request = server.await.unwrap();
        assert!(request.starts_with(
            "GET /rest/bug/42?include_fields=id,summary,status,resolution,assigned_to HTTP/1.1"
        ));
        assert!(request.to_lowercase().contains("accept: application/json"));
    }

    #[tokio::test]
    async fn test_fetch_bug_error_flag() {
        let (base, _server) = serve_once(
            "HTTP/1.1 200 OK",
            r#"{"error":true,"message":"You are not authorized to access bug 7.","bugs":[]}"#,
        )
        .await;
        let client = HttpClient::new().unwrap().with_bugzilla_base(base);
        let err = client.fetch_bug("bugzilla.mozilla.org", 7).await.unwrap_err();
        assert!(matches!(err, RefreshError::Remote(ref m) if m.contains("not authorized")));
    }

    #[tokio::test]
    async fn test_fetch_bug_empty_is_not_found() {
        let (base, _server) = serve_once("HTTP/1.1 200 OK", r#"{"bugs":[]}"#).await;
        let client = HttpClient::new().unwrap().with_bugzilla_base(base);
        let err = client.fetch_bug("bugzilla.mozilla.org", 8).await.unwrap_err();
        assert!(matches!(err, RefreshError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_graphql_non_success_status() {
        let (base, _server) = serve_once("HTTP/1.1 502 Bad Gateway", r#"{"message":"upstream"}"#).await;
        let client = HttpClient::new().unwrap().with_graphql_url(format!("{}/graphql", base));
        let err = client.graphql("token", "query { }").await.unwrap_err();
        assert!(matches!(err, RefreshError::Status { status: 502, .. }));
    }

    #[tokio::test]
    async fn test_graphql_sends_bearer_token() {
        let (base, server) = serve_once("HTTP/1.1 200 OK", r#"{"data":{}}"#).await;
        let client = HttpClient::new().unwrap().with_graphql_url(format!("{}/graphql", base));
        let body = client.graphql("s3cret", "query { }").await.unwrap();
        assert_eq!(body, json!({ "data": {} }));

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /graphql HTTP/1.1"));
        assert!(request.to_lowercase().contains("authorization: bearer s3cret"));
    }

    #[tokio::test]
    async fn test_mock_records_calls() {
        let mock = MockRemote::new().with_bug(
            "bugzilla.mozilla.org",
            BugRecord {
                id: 1,
                status: "NEW".to_string(),
                ..BugRecord::default()
            },
        );
        assert!(mock.fetch_bug("bugzilla.mozilla.org", 1).await.is_ok());
        assert!(mock.fetch_bug("bugzilla.mozilla.org", 2).await.is_err());
        assert_eq!(mock.bug_calls().len(), 2);
        assert!(mock.graphql("t", "query { }").await.is_ok());
        assert_eq!(mock.graphql_calls(), vec!["query { }"]);
    }
}
