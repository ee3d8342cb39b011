//! Stub HTTP server for exercising the client against real sockets.
//!
//! # Design
//! Every request goes through one fallback handler. It records the request,
//! then answers with the most recently registered stub whose method, path,
//! query parameters and headers all match, or 404 when none does. Responses
//! can be delayed and can stream their body as separate chunks with a pause
//! between them, which is what timeout and backpressure tests need.

use std::{collections::BTreeMap, convert::Infallible, net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    body::Body,
    extract::{Query, State},
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Router,
};
use bytes::Bytes;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::{net::TcpListener, sync::RwLock, task::JoinHandle};
use uuid::Uuid;

/// What to answer when a stub matches.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StubResponse {
    #[serde(default = "default_status")]
    pub status: u16,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
    /// Streamed in order after `body`, one write per entry.
    #[serde(default)]
    pub chunks: Vec<String>,
    #[serde(default)]
    pub delay_ms: u64,
    #[serde(default)]
    pub chunk_interval_ms: u64,
}

fn default_status() -> u16 {
    200
}

impl Default for StubResponse {
    fn default() -> Self {
        Self::status(200)
    }
}

impl StubResponse {
    pub fn status(status: u16) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: None,
            chunks: Vec::new(),
            delay_ms: 0,
            chunk_interval_ms: 0,
        }
    }

    pub fn ok() -> Self {
        Self::status(200)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_chunks<I, S>(mut self, chunks: I, interval: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.chunks = chunks.into_iter().map(Into::into).collect();
        self.chunk_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Wait this long before sending the status line.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay_ms = delay.as_millis() as u64;
        self
    }
}

/// A request matcher paired with its canned response.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Stub {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    /// `None` matches any method.
    #[serde(default)]
    pub method: Option<String>,
    pub path: String,
    #[serde(default)]
    pub query: BTreeMap<String, String>,
    /// Names are compared case-insensitively, values exactly.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub response: StubResponse,
}

impl Stub {
    pub fn new(method: &str, path: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            method: Some(method.to_ascii_uppercase()),
            path: path.into(),
            query: BTreeMap::new(),
            headers: BTreeMap::new(),
            response: StubResponse::default(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new("GET", path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new("POST", path)
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn will_return(mut self, response: StubResponse) -> Self {
        self.response = response;
        self
    }

    fn matches(&self, request: &RecordedRequest) -> bool {
        if let Some(method) = &self.method {
            if !method.eq_ignore_ascii_case(&request.method) {
                return false;
            }
        }
        self.path == request.path
            && self
                .query
                .iter()
                .all(|(name, value)| request.query.get(name) == Some(value))
            && self
                .headers
                .iter()
                .all(|(name, value)| request.header(name) == Some(value.as_str()))
    }
}

/// A request as the server saw it.
#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub query: BTreeMap<String, String>,
    /// Lowercase names; repeated headers keep the last value.
    pub headers: BTreeMap<String, String>,
    pub body: Bytes,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Default)]
struct Inner {
    stubs: Vec<Stub>,
    received: Vec<RecordedRequest>,
}

/// Shared stub and request store behind the router.
#[derive(Clone, Default)]
pub struct Registry {
    inner: Arc<RwLock<Inner>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, stub: Stub) -> Uuid {
        let id = stub.id;
        self.inner.write().await.stubs.push(stub);
        id
    }

    pub async fn extend(&self, stubs: impl IntoIterator<Item = Stub>) {
        self.inner.write().await.stubs.extend(stubs);
    }

    pub async fn remove(&self, id: Uuid) -> bool {
        let mut inner = self.inner.write().await;
        let before = inner.stubs.len();
        inner.stubs.retain(|stub| stub.id != id);
        inner.stubs.len() != before
    }

    pub async fn reset(&self) {
        let mut inner = self.inner.write().await;
        inner.stubs.clear();
        inner.received.clear();
    }

    pub async fn received(&self) -> Vec<RecordedRequest> {
        self.inner.read().await.received.clone()
    }

    async fn record(&self, request: RecordedRequest) -> Option<StubResponse> {
        let mut inner = self.inner.write().await;
        let response = inner
            .stubs
            .iter()
            .rev()
            .find(|stub| stub.matches(&request))
            .map(|stub| stub.response.clone());
        inner.received.push(request);
        response
    }
}

pub fn app(registry: Registry) -> Router {
    Router::new().fallback(dispatch).with_state(registry)
}

pub async fn run(listener: TcpListener, registry: Registry) -> Result<(), std::io::Error> {
    axum::serve(listener, app(registry)).await
}

async fn dispatch(
    State(registry): State<Registry>,
    method: Method,
    uri: Uri,
    Query(query): Query<BTreeMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = RecordedRequest {
        method: method.to_string(),
        path: uri.path().to_string(),
        query,
        headers: headers
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect(),
        body,
    };

    match registry.record(request).await {
        Some(stub) => respond(stub).await,
        None => (StatusCode::NOT_FOUND, "no stub matched").into_response(),
    }
}

async fn respond(stub: StubResponse) -> Response {
    if stub.delay_ms > 0 {
        tokio::time::sleep(Duration::from_millis(stub.delay_ms)).await;
    }

    let status = StatusCode::from_u16(stub.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = if stub.chunks.is_empty() {
        Body::from(stub.body.unwrap_or_default())
    } else {
        let interval = Duration::from_millis(stub.chunk_interval_ms);
        let parts = stub.body.into_iter().chain(stub.chunks);
        let stream = futures_util::stream::iter(parts.enumerate()).then(move |(index, chunk)| async move {
            if index > 0 && !interval.is_zero() {
                tokio::time::sleep(interval).await;
            }
            Ok::<_, Infallible>(Bytes::from(chunk))
        });
        Body::from_stream(stream)
    };

    let mut response = Response::new(body);
    *response.status_mut() = status;
    for (name, value) in &stub.headers {
        if let (Ok(name), Ok(value)) = (HeaderName::try_from(name.as_str()), HeaderValue::from_str(value)) {
            response.headers_mut().insert(name, value);
        }
    }
    response
}

/// A stub server bound to an ephemeral local port, stopped on drop.
pub struct MockServer {
    addr: SocketAddr,
    registry: Registry,
    task: JoinHandle<()>,
}

impl MockServer {
    pub async fn start() -> Result<Self, std::io::Error> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let registry = Registry::new();
        let serving = registry.clone();
        let task = tokio::spawn(async move {
            let _ = run(listener, serving).await;
        });
        Ok(Self { addr, registry, task })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub async fn stub(&self, stub: Stub) -> Uuid {
        self.registry.add(stub).await
    }

    pub async fn reset(&self) {
        self.registry.reset().await
    }

    pub async fn received(&self) -> Vec<RecordedRequest> {
        self.registry.received().await
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}
