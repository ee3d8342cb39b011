//! Client configuration.
//!
//! Everything except `base_url` has a default. A request timeout is always in
//! effect; a zero timeout is rejected rather than treated as "no timeout".

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::error::{HttpError, Result};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_CONNECTIONS: usize = 10;
pub const DEFAULT_STREAM_BUFFER: usize = 16;
pub const DEFAULT_ERROR_BODY_LIMIT: usize = 64 * 1024;

/// Shared configuration for an `HttpClient`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Origin (and optional path prefix) all request paths are relative to.
    pub base_url: String,
    /// Value of the `Accept` header sent when a request does not set one.
    pub accept: Option<String>,
    #[serde(rename = "request_timeout_ms", with = "duration_ms")]
    pub request_timeout: Duration,
    pub max_connections: usize,
    /// Headers added to every request unless the request overrides them.
    pub default_headers: BTreeMap<String, String>,
    /// Capacity of the queue between an exchange and its consumer.
    pub stream_buffer: usize,
    /// Bytes of a 4xx/5xx body kept for the error value.
    pub error_body_limit: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            accept: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            default_headers: BTreeMap::new(),
            stream_buffer: DEFAULT_STREAM_BUFFER,
            error_body_limit: DEFAULT_ERROR_BODY_LIMIT,
        }
    }
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn with_accept(mut self, accept: impl Into<String>) -> Self {
        self.accept = Some(accept.into());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    pub fn with_default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.insert(name.into(), value.into());
        self
    }

    pub fn with_stream_buffer(mut self, capacity: usize) -> Self {
        self.stream_buffer = capacity;
        self
    }

    pub fn with_error_body_limit(mut self, limit: usize) -> Self {
        self.error_body_limit = limit;
        self
    }

    /// Check the numeric limits and parse the base URL.
    pub(crate) fn validate(&self) -> Result<Url> {
        if self.request_timeout.is_zero() {
            return Err(HttpError::invalid("request timeout must be greater than zero"));
        }
        if self.max_connections == 0 {
            return Err(HttpError::invalid("max_connections must be positive"));
        }
        if self.stream_buffer == 0 {
            return Err(HttpError::invalid("stream_buffer must be positive"));
        }

        let base = Url::parse(self.base_url.trim())
            .map_err(|e| HttpError::invalid(format!("invalid base URL `{}`: {e}", self.base_url)))?;
        match base.scheme() {
            "http" => {}
            other => {
                return Err(HttpError::invalid(format!(
                    "unsupported scheme `{other}`: only plaintext http origins are supported"
                )))
            }
        }
        if base.host_str().is_none() {
            return Err(HttpError::invalid("base URL has no host"));
        }
        if base.query().is_some() || base.fragment().is_some() {
            return Err(HttpError::invalid("base URL must not carry a query or fragment"));
        }
        Ok(base)
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
