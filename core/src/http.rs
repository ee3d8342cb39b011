//! Request descriptors and their builder.
//!
//! # Design
//! An `HttpRequest` is plain data: method, base-relative path, ordered query
//! parameters, headers and an optional body. It is validated once by
//! `RequestBuilder::build` and never mutated afterwards; `HttpClient::submit`
//! takes it by value, so a descriptor is consumed by exactly one exchange.
//! Turning it into a wire request (base URL, default headers, `Host`) is the
//! client's job, which keeps this module free of connection concerns.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::uri::PathAndQuery;
use url::form_urlencoded;

use crate::error::{HttpError, Result};

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
        }
    }

    pub(crate) fn to_http(self) -> http::Method {
        match self {
            HttpMethod::Get => http::Method::GET,
            HttpMethod::Post => http::Method::POST,
            HttpMethod::Put => http::Method::PUT,
            HttpMethod::Delete => http::Method::DELETE,
            HttpMethod::Patch => http::Method::PATCH,
            HttpMethod::Head => http::Method::HEAD,
            HttpMethod::Options => http::Method::OPTIONS,
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = HttpError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "DELETE" => Ok(HttpMethod::Delete),
            "PATCH" => Ok(HttpMethod::Patch),
            "HEAD" => Ok(HttpMethod::Head),
            "OPTIONS" => Ok(HttpMethod::Options),
            other => Err(HttpError::invalid(format!("unsupported HTTP method `{other}`"))),
        }
    }
}

/// Request payload with its optional media type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestBody {
    content_type: Option<String>,
    bytes: Bytes,
}

impl RequestBody {
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }
}

/// An immutable request description, produced by `RequestBuilder::build`.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    method: HttpMethod,
    path: String,
    query: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    body: Option<RequestBody>,
    timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn builder() -> RequestBuilder {
        RequestBuilder::default()
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    /// Path relative to the client's base URL, always starting with `/`.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> &[(String, String)] {
        &self.query
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// First value of a header, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body(&self) -> Option<&RequestBody> {
        self.body.as_ref()
    }

    /// Per-request timeout; `None` means the client default applies.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Path plus the form-urlencoded query string, in insertion order.
    pub fn target(&self) -> String {
        if self.query.is_empty() {
            return self.path.clone();
        }
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (key, value) in &self.query {
            serializer.append_pair(key, value);
        }
        format!("{}?{}", self.path, serializer.finish())
    }
}

/// Builder for `HttpRequest`. Validation happens in `build`.
#[derive(Debug, Clone, Default)]
pub struct RequestBuilder {
    method: Option<HttpMethod>,
    path: String,
    query: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    body: Option<RequestBody>,
    timeout: Option<Duration>,
}

impl RequestBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method(mut self, method: HttpMethod) -> Self {
        self.method = Some(method);
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Append a query parameter. Repeated keys are kept in order.
    pub fn query_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Set a header, replacing any earlier value with the same name.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
        self
    }

    pub fn body(mut self, bytes: impl Into<Bytes>) -> Self {
        self.body = Some(RequestBody {
            content_type: None,
            bytes: bytes.into(),
        });
        self
    }

    pub fn body_with_type(mut self, bytes: impl Into<Bytes>, content_type: impl Into<String>) -> Self {
        self.body = Some(RequestBody {
            content_type: Some(content_type.into()),
            bytes: bytes.into(),
        });
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<HttpRequest> {
        let method = self
            .method
            .ok_or_else(|| HttpError::invalid("request method is not set"))?;

        let path = self.path.trim();
        if path.is_empty() {
            return Err(HttpError::invalid("request path is empty"));
        }
        if path.contains("://") {
            return Err(HttpError::invalid(format!(
                "request path `{path}` must be relative to the base URL"
            )));
        }
        if path.contains(['?', '#']) {
            return Err(HttpError::invalid(format!(
                "request path `{path}` must not carry a query or fragment; use query_param"
            )));
        }
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };
        PathAndQuery::from_str(&path)
            .map_err(|e| HttpError::invalid(format!("invalid request path `{path}`: {e}")))?;

        for (name, value) in &self.headers {
            HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| HttpError::invalid(format!("invalid header name `{name}`")))?;
            HeaderValue::from_str(value)
                .map_err(|_| HttpError::invalid(format!("invalid value for header `{name}`")))?;
        }
        if let Some(content_type) = self.body.as_ref().and_then(|b| b.content_type.as_deref()) {
            HeaderValue::from_str(content_type)
                .map_err(|_| HttpError::invalid(format!("invalid content type `{content_type}`")))?;
        }
        if self.timeout == Some(Duration::ZERO) {
            return Err(HttpError::invalid("request timeout must be greater than zero"));
        }

        Ok(HttpRequest {
            method,
            path,
            query: self.query,
            headers: self.headers,
            body: self.body,
            timeout: self.timeout,
        })
    }
}
