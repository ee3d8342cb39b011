//! Client façade: shared configuration, the connection pool and submission.
//!
//! # Design
//! `HttpClient` is a cheap handle (`Arc` inside) that can be cloned into
//! many tasks. `submit` validates and renders the descriptor, spawns an
//! `Exchange` on the current Tokio runtime and returns its `ElementStream`
//! immediately; no network I/O happens on the caller's path. `close` cancels
//! a shared shutdown token that every in-flight exchange watches, then
//! closes the pool.

use std::sync::Arc;

use bytes::Bytes;
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http_body_util::Full;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::error::{HttpError, Result};
use crate::exchange::Exchange;
use crate::http::{HttpMethod, HttpRequest, RequestBuilder};
use crate::pool::{ConnectionPool, Origin, PoolStats};
use crate::stream::{ElementStream, ExchangeControl};
use crate::types::ServerResponse;

/// Streaming HTTP client bound to one base URL.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    config: ClientConfig,
    /// `host[:port]` for the `Host` header.
    authority: String,
    /// Base URL path without a trailing slash; empty for the root.
    path_prefix: String,
    default_headers: HeaderMap,
    pool: Arc<ConnectionPool>,
    shutdown: CancellationToken,
}

impl HttpClient {
    /// Validate `config` and create the client. Connections are opened
    /// lazily on first use.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let base = config.validate()?;
        let origin = origin_of(&base)?;
        let host = base.host_str().unwrap_or_default();
        let authority = match base.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        let path_prefix = base.path().trim_end_matches('/').to_string();
        let default_headers = default_headers(&config)?;
        let pool = Arc::new(ConnectionPool::new(origin, config.max_connections));

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                authority,
                path_prefix,
                default_headers,
                pool,
                shutdown: CancellationToken::new(),
            }),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Start building a request for this client.
    pub fn request_builder(&self) -> RequestBuilder {
        RequestBuilder::new()
    }

    /// Shorthand for a builder with method and path already set.
    pub fn request(&self, method: HttpMethod, path: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new().method(method).path(path)
    }

    /// Start an exchange and return its element stream.
    ///
    /// Never waits for the network. Fails with `Closed` after `close`, and
    /// with `Internal` when called outside a Tokio runtime. Every other
    /// failure arrives as the stream's terminal error.
    pub fn submit(&self, request: HttpRequest) -> Result<ElementStream> {
        if self.is_closed() {
            return Err(HttpError::Closed);
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| HttpError::Internal("submit requires a Tokio runtime".to_string()))?;

        let submitted_at = Instant::now();
        let timeout = request.timeout().unwrap_or(self.inner.config.request_timeout);
        let wire = self.inner.to_wire(&request)?;

        let (tx, rx) = mpsc::channel(self.inner.config.stream_buffer);
        let control = Arc::new(ExchangeControl::new());
        let exchange = Exchange {
            id: Uuid::new_v4(),
            pool: Arc::clone(&self.inner.pool),
            submitted_at,
            timeout,
            error_body_limit: self.inner.config.error_body_limit,
            control: Arc::clone(&control),
            shutdown: self.inner.shutdown.child_token(),
            tx,
        };
        runtime.spawn(exchange.run(wire));

        Ok(ElementStream::new(rx, control))
    }

    /// Submit and collect the whole response.
    pub async fn send(&self, request: HttpRequest) -> Result<ServerResponse> {
        self.submit(request)?.into_response().await
    }

    /// Cancel in-flight exchanges and release pooled connections.
    ///
    /// In-flight streams end with `HttpError::Closed`; later `submit` calls
    /// fail with it. Calling `close` again has no further effect.
    pub fn close(&self) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        self.inner.shutdown.cancel();
        self.inner.pool.close();
        tracing::info!(base_url = %self.inner.config.base_url, "client closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.inner.pool.stats()
    }
}

impl Inner {
    /// Render a descriptor as an origin-form HTTP/1.1 request.
    fn to_wire(&self, request: &HttpRequest) -> Result<http::Request<Full<Bytes>>> {
        let uri = format!("{}{}", self.path_prefix, request.target());
        let mut builder = http::Request::builder()
            .method(request.method().to_http())
            .uri(uri.as_str());

        let headers = builder
            .headers_mut()
            .ok_or_else(|| HttpError::invalid(format!("invalid request target `{uri}`")))?;
        headers.insert(
            header::HOST,
            HeaderValue::from_str(&self.authority)
                .map_err(|_| HttpError::Internal("base URL authority is not a valid header".to_string()))?,
        );
        headers.extend(self.default_headers.clone());
        for (name, value) in request.headers() {
            headers.insert(parse_name(name)?, parse_value(name, value)?);
        }

        let body = match request.body() {
            Some(body) => {
                if let Some(content_type) = body.content_type() {
                    if !headers.contains_key(header::CONTENT_TYPE) {
                        headers.insert(header::CONTENT_TYPE, parse_value("content-type", content_type)?);
                    }
                }
                Full::new(body.bytes().clone())
            }
            None => Full::new(Bytes::new()),
        };

        builder
            .body(body)
            .map_err(|e| HttpError::invalid(format!("invalid request: {e}")))
    }
}

fn origin_of(base: &Url) -> Result<Origin> {
    let host = base
        .host_str()
        .ok_or_else(|| HttpError::invalid("base URL has no host"))?
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_string();
    let port = base
        .port_or_known_default()
        .ok_or_else(|| HttpError::invalid("base URL has no port"))?;
    Ok(Origin { host, port })
}

fn default_headers(config: &ClientConfig) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    if let Some(accept) = &config.accept {
        headers.insert(header::ACCEPT, parse_value("accept", accept)?);
    }
    for (name, value) in &config.default_headers {
        headers.insert(parse_name(name)?, parse_value(name, value)?);
    }
    Ok(headers)
}

fn parse_name(name: &str) -> Result<HeaderName> {
    HeaderName::from_bytes(name.as_bytes()).map_err(|_| HttpError::invalid(format!("invalid header name `{name}`")))
}

fn parse_value(name: &str, value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|_| HttpError::invalid(format!("invalid value for header `{name}`")))
}
