//! Mapping of raw exchange outcomes onto `HttpError`.
//!
//! Status codes are classified once the body has been streamed, so a 4xx/5xx
//! error can carry a preview of the body. The preview is capped; bytes past
//! the cap are still delivered as body parts but are not retained here.

use bytes::{Bytes, BytesMut};
use http::{HeaderMap, StatusCode};

use crate::error::{ErrorResponse, HttpError};

/// Bounded copy of an error response body.
#[derive(Debug)]
pub(crate) struct BodyPreview {
    buf: BytesMut,
    limit: usize,
    truncated: bool,
}

impl BodyPreview {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(limit.min(8 * 1024)),
            limit,
            truncated: false,
        }
    }

    pub(crate) fn push(&mut self, chunk: &[u8]) {
        let room = self.limit - self.buf.len();
        if chunk.len() > room {
            self.truncated = true;
        }
        self.buf.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }

    fn finish(self) -> (Bytes, bool) {
        (self.buf.freeze(), self.truncated)
    }
}

/// True for statuses that end in a successful completion.
pub(crate) fn completes_normally(status: StatusCode) -> bool {
    status.is_success() || status.is_redirection()
}

/// Classify a final status. `None` means the exchange completed normally.
pub(crate) fn status(status: StatusCode, headers: HeaderMap, preview: Option<BodyPreview>) -> Option<HttpError> {
    if completes_normally(status) {
        return None;
    }
    let (body, truncated) = preview.map(BodyPreview::finish).unwrap_or_default();
    let response = ErrorResponse::new(status, headers, body, truncated);
    if status.is_client_error() {
        Some(HttpError::ClientError(response))
    } else if status.is_server_error() {
        Some(HttpError::ServerError(response))
    } else {
        Some(HttpError::Internal(format!("unexpected final status {status}")))
    }
}

/// Classify a failure reported by hyper while sending or reading.
pub(crate) fn hyper_error(err: hyper::Error) -> HttpError {
    if err.is_user() {
        HttpError::Internal(err.to_string())
    } else {
        HttpError::transport(err)
    }
}

/// Classify a socket-level failure (connect, resolve).
pub(crate) fn io_error(err: std::io::Error) -> HttpError {
    HttpError::transport(err)
}
