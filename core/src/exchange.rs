//! The exchange driver: one request, one connection, one element stream.
//!
//! # Design
//! An `Exchange` runs on its own task. It first checks a connection out of
//! the pool, then sends the request and turns the response into elements:
//! `Status`, `Headers`, then one `BodyPart` per body data frame. Both phases
//! race the same deadline, the consumer's cancellation and client shutdown.
//! Losing that race drops the in-flight future, which drops the
//! `PooledConnection` guard and discards the connection.
//!
//! The terminal signal is decided after the body has been read to its end:
//! a 2xx/3xx status completes, a 4xx/5xx status becomes the classified
//! error. Only the outcome that wins `ExchangeControl::claim_terminal` is
//! ever enqueued.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::classify::{self, BodyPreview};
use crate::error::{HttpError, TimeoutPhase};
use crate::pool::{ConnectionPool, PooledConnection};
use crate::stream::{ExchangeControl, Signal};
use crate::types::{ResponseElement, ResponseHeaders, ResponseStatus};

/// Why an exchange stopped before completing.
#[derive(Debug)]
enum Stop {
    Failed(HttpError),
    /// The consumer cancelled or went away; nothing more is sent.
    Cancelled,
}

impl From<HttpError> for Stop {
    fn from(err: HttpError) -> Self {
        Stop::Failed(err)
    }
}

type Outcome = std::result::Result<(), Stop>;

pub(crate) struct Exchange {
    pub(crate) id: Uuid,
    pub(crate) pool: Arc<ConnectionPool>,
    pub(crate) submitted_at: Instant,
    pub(crate) timeout: Duration,
    pub(crate) error_body_limit: usize,
    pub(crate) control: Arc<ExchangeControl>,
    pub(crate) shutdown: CancellationToken,
    pub(crate) tx: mpsc::Sender<Signal>,
}

impl Exchange {
    /// Drive the exchange to its single terminal outcome.
    pub(crate) async fn run(self, request: http::Request<Full<Bytes>>) {
        let span = tracing::debug_span!(
            "exchange",
            id = %self.id,
            method = %request.method(),
            target = %request.uri(),
        );
        async move {
            let outcome = self.drive(request).await;
            self.finish(outcome).await;
        }
        .instrument(span)
        .await
    }

    async fn drive(&self, request: http::Request<Full<Bytes>>) -> Outcome {
        let deadline = self.submitted_at + self.timeout;

        let conn = self
            .guarded(deadline, TimeoutPhase::ConnectionAcquisition, async {
                self.pool.acquire().await.map_err(Stop::from)
            })
            .await?;
        tracing::debug!(connection = conn.id(), "connection acquired");

        self.guarded(deadline, TimeoutPhase::InFlight, self.exchange(conn, request))
            .await
    }

    /// Run `work` until it finishes, the deadline passes, the consumer
    /// cancels or the client shuts down, whichever comes first.
    async fn guarded<T, F>(&self, deadline: Instant, phase: TimeoutPhase, work: F) -> std::result::Result<T, Stop>
    where
        F: std::future::Future<Output = std::result::Result<T, Stop>>,
    {
        tokio::select! {
            biased;
            _ = self.control.cancelled() => Err(Stop::Cancelled),
            _ = self.shutdown.cancelled() => Err(Stop::Failed(HttpError::Closed)),
            _ = tokio::time::sleep_until(deadline) => Err(Stop::Failed(HttpError::Timeout {
                phase,
                elapsed: self.submitted_at.elapsed(),
            })),
            result = work => result,
        }
    }

    async fn exchange(&self, mut conn: PooledConnection, request: http::Request<Full<Bytes>>) -> Outcome {
        let response = conn.send(request).await?;
        let (parts, mut body) = response.into_parts();
        let status = parts.status;

        let reason = parts
            .extensions
            .get::<hyper::ext::ReasonPhrase>()
            .map(|r| String::from_utf8_lossy(r.as_bytes()).into_owned());
        self.emit(ResponseElement::Status(ResponseStatus::new(status, reason)))
            .await?;

        let (mut preview, error_headers) = if classify::completes_normally(status) {
            (None, None)
        } else {
            (Some(BodyPreview::new(self.error_body_limit)), Some(parts.headers.clone()))
        };
        self.emit(ResponseElement::Headers(ResponseHeaders::new(parts.headers)))
            .await?;

        while let Some(frame) = body.frame().await {
            let frame = frame.map_err(classify::hyper_error)?;
            let Ok(data) = frame.into_data() else {
                // trailers
                continue;
            };
            if data.is_empty() {
                continue;
            }
            if let Some(preview) = preview.as_mut() {
                preview.push(&data);
            }
            self.emit(ResponseElement::BodyPart(data)).await?;
        }

        conn.release();
        match classify::status(status, error_headers.unwrap_or_default(), preview) {
            None => Ok(()),
            Some(err) => Err(Stop::Failed(err)),
        }
    }

    /// Queue one element, waiting while the consumer is behind.
    async fn emit(&self, element: ResponseElement) -> Outcome {
        tracing::trace!(?element, "emit");
        self.tx
            .send(Signal::Element(element))
            .await
            .map_err(|_| Stop::Cancelled)
    }

    async fn finish(&self, outcome: Outcome) {
        let elapsed_ms = self.submitted_at.elapsed().as_millis() as u64;
        let signal = match outcome {
            Ok(()) => {
                tracing::debug!(elapsed_ms, "exchange completed");
                Signal::Complete
            }
            Err(Stop::Failed(err)) => {
                tracing::debug!(elapsed_ms, error = %err, "exchange failed");
                Signal::Error(err)
            }
            Err(Stop::Cancelled) => {
                tracing::debug!(elapsed_ms, "exchange cancelled");
                return;
            }
        };
        if !self.control.claim_terminal() {
            return;
        }
        // The queue may be full; a consumer that cancels meanwhile must not
        // keep this task alive.
        tokio::select! {
            biased;
            _ = self.control.cancelled() => {}
            _ = self.tx.send(signal) => {}
        }
    }
}
