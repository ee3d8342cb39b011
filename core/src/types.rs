//! Response elements and the collected response.
//!
//! # Design
//! A response is delivered as `ResponseElement`s: one `Status`, one
//! `Headers`, then any number of `BodyPart`s in receive order. Consumers
//! match on the enum exhaustively. `ServerResponse` is the same data after
//! the stream has been drained, for callers that do not need streaming.

use bytes::Bytes;
use http::header::{self, HeaderMap};
use http::StatusCode;

/// One discrete unit of a streamed response.
#[derive(Debug, Clone)]
pub enum ResponseElement {
    Status(ResponseStatus),
    Headers(ResponseHeaders),
    /// One body chunk, exactly as the transport delivered it.
    BodyPart(Bytes),
}

impl ResponseElement {
    pub fn as_status(&self) -> Option<&ResponseStatus> {
        match self {
            ResponseElement::Status(status) => Some(status),
            _ => None,
        }
    }

    pub fn as_headers(&self) -> Option<&ResponseHeaders> {
        match self {
            ResponseElement::Headers(headers) => Some(headers),
            _ => None,
        }
    }

    pub fn as_body_part(&self) -> Option<&Bytes> {
        match self {
            ResponseElement::BodyPart(bytes) => Some(bytes),
            _ => None,
        }
    }
}

/// Status line of a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseStatus {
    code: StatusCode,
    reason: Option<String>,
}

impl ResponseStatus {
    pub(crate) fn new(code: StatusCode, reason: Option<String>) -> Self {
        Self { code, reason }
    }

    pub fn code(&self) -> u16 {
        self.code.as_u16()
    }

    pub fn status(&self) -> StatusCode {
        self.code
    }

    /// Reason phrase as received, falling back to the canonical one.
    pub fn reason(&self) -> &str {
        self.reason
            .as_deref()
            .or_else(|| self.code.canonical_reason())
            .unwrap_or("")
    }
}

/// Response header block.
#[derive(Debug, Clone, Default)]
pub struct ResponseHeaders {
    map: HeaderMap,
}

impl ResponseHeaders {
    pub(crate) fn new(map: HeaderMap) -> Self {
        Self { map }
    }

    /// First value of `name`, if it is valid visible ASCII.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.map.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.map
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.get(header::CONTENT_TYPE.as_str())
    }

    pub fn content_length(&self) -> Option<u64> {
        self.get(header::CONTENT_LENGTH.as_str())
            .and_then(|v| v.trim().parse().ok())
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn as_map(&self) -> &HeaderMap {
        &self.map
    }

    pub fn into_map(self) -> HeaderMap {
        self.map
    }
}

/// A fully received response, assembled from an element stream.
#[derive(Debug, Clone)]
pub struct ServerResponse {
    pub status: ResponseStatus,
    pub headers: ResponseHeaders,
    pub body: Bytes,
}

impl ServerResponse {
    pub fn status_code(&self) -> u16 {
        self.status.code()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.content_type()
    }

    pub fn body_text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}
