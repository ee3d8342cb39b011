//! Error taxonomy for the streaming client.
//!
//! # Design
//! Every failure of an exchange reaches the caller as the single terminal
//! error of that exchange's `ElementStream`. Status-derived errors keep the
//! response head and a bounded preview of the body so callers can report
//! something useful without the client buffering oversized error bodies.
//! `InvalidUsage` is the only kind returned synchronously from builders,
//! `subscribe` and client construction.

use std::borrow::Cow;
use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, StatusCode};

/// Opaque cause carried by transport failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub type Result<T> = std::result::Result<T, HttpError>;

/// Errors produced by the client and delivered as terminal stream signals.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    /// The server answered with a 4xx status.
    #[error("client error: HTTP {}", .0.status())]
    ClientError(ErrorResponse),

    /// The server answered with a 5xx status.
    #[error("server error: HTTP {}", .0.status())]
    ServerError(ErrorResponse),

    /// The exchange did not finish within its timeout budget.
    #[error("request timed out after {elapsed:?} ({phase})")]
    Timeout { phase: TimeoutPhase, elapsed: Duration },

    /// Connect, DNS, premature close or malformed response.
    #[error("transport error: {source}")]
    Transport { source: BoxError },

    /// A caller-side precondition was violated.
    #[error("invalid usage: {0}")]
    InvalidUsage(String),

    /// The client was closed before or during the operation.
    #[error("client is closed")]
    Closed,

    /// An unexpected fault local to one exchange.
    #[error("internal error: {0}")]
    Internal(String),
}

impl HttpError {
    pub(crate) fn transport<E>(source: E) -> Self
    where
        E: Into<BoxError>,
    {
        HttpError::Transport { source: source.into() }
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        HttpError::InvalidUsage(msg.into())
    }

    /// Status code of a `ClientError` or `ServerError`.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            HttpError::ClientError(resp) | HttpError::ServerError(resp) => Some(resp.status_code()),
            _ => None,
        }
    }

    /// Response head and body preview of a status-derived error.
    pub fn response(&self) -> Option<&ErrorResponse> {
        match self {
            HttpError::ClientError(resp) | HttpError::ServerError(resp) => Some(resp),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, HttpError::Timeout { .. })
    }

    pub fn timeout_phase(&self) -> Option<TimeoutPhase> {
        match self {
            HttpError::Timeout { phase, .. } => Some(*phase),
            _ => None,
        }
    }
}

/// Which part of the exchange ran out of time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutPhase {
    /// No pooled connection became available in time. Nothing was sent.
    ConnectionAcquisition,
    /// The request was on the wire when the deadline passed.
    InFlight,
}

impl fmt::Display for TimeoutPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutPhase::ConnectionAcquisition => write!(f, "connection acquisition"),
            TimeoutPhase::InFlight => write!(f, "in flight"),
        }
    }
}

/// Response head plus a capped body preview, attached to 4xx/5xx errors.
#[derive(Debug, Clone)]
pub struct ErrorResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    truncated: bool,
}

impl ErrorResponse {
    pub(crate) fn new(status: StatusCode, headers: HeaderMap, body: Bytes, truncated: bool) -> Self {
        Self {
            status,
            headers,
            body,
            truncated,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn status_code(&self) -> u16 {
        self.status.as_u16()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The first `error_body_limit` bytes of the response body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// True when the body was longer than the preview.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }
}
