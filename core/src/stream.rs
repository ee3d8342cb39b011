//! Single-consumer element stream with cancellation and backpressure.
//!
//! # Design
//! The exchange task and the consumer share an `ExchangeControl` and are
//! connected by a bounded `mpsc` queue of `Signal`s. When the queue is full
//! the exchange suspends in `send`, stops polling the response body, and
//! hyper stops reading from the socket; a slow consumer therefore slows the
//! network instead of growing memory.
//!
//! Termination is exactly-once:
//! - The consumer side moves from open to either cancelled or
//!   terminal-observed with one compare-exchange. Cancelling stops delivery
//!   and tells the exchange to stop through a cancellation token; once the
//!   consumer has observed completion or an error, cancelling does nothing.
//! - `terminal_sent` is set by the exchange when it enqueues completion or an
//!   error. The exchange only enqueues a terminal if it wins this flag and
//!   the consumer has not cancelled.
//!
//! A stream is consumed either by pulling it as a `futures_util::Stream` or
//! by `subscribe`, never both.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use bytes::BytesMut;
use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{HttpError, Result};
use crate::types::{ResponseElement, ServerResponse};

/// What the exchange puts on the queue.
#[derive(Debug)]
pub(crate) enum Signal {
    Element(ResponseElement),
    Complete,
    Error(HttpError),
}

const OPEN: u8 = 0;
const CANCELLED: u8 = 1;
const TERMINAL_OBSERVED: u8 = 2;

/// State shared by one exchange and its consumer.
#[derive(Debug, Default)]
pub(crate) struct ExchangeControl {
    consumer: AtomicU8,
    terminal_sent: AtomicBool,
    token: CancellationToken,
}

impl ExchangeControl {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Consumer-side cancellation. Returns true for the call that cancelled;
    /// false if already cancelled or the terminal was already observed.
    pub(crate) fn cancel(&self) -> bool {
        if self
            .consumer
            .compare_exchange(OPEN, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        self.token.cancel();
        true
    }

    /// Record that the consumer is about to see the terminal signal. False
    /// if the consumer cancelled first, in which case it must not see it.
    pub(crate) fn observe_terminal(&self) -> bool {
        match self
            .consumer
            .compare_exchange(OPEN, TERMINAL_OBSERVED, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => true,
            Err(state) => state == TERMINAL_OBSERVED,
        }
    }

    pub(crate) fn is_cancel_requested(&self) -> bool {
        self.consumer.load(Ordering::Acquire) == CANCELLED
    }

    /// Resolves once the consumer cancels.
    pub(crate) async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Claim the right to send the terminal signal. False if the consumer
    /// cancelled or a terminal was already claimed.
    pub(crate) fn claim_terminal(&self) -> bool {
        !self.is_cancel_requested() && !self.terminal_sent.swap(true, Ordering::AcqRel)
    }
}

/// Cancels an exchange from any task or thread.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    control: Arc<ExchangeControl>,
}

impl CancelHandle {
    /// Stop the exchange and release its connection. Idempotent.
    pub fn cancel(&self) {
        if self.control.cancel() {
            tracing::debug!("exchange cancelled by consumer");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.control.is_cancel_requested()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Consumer {
    Unclaimed,
    Pulling,
    Subscribed,
    Finished,
}

/// Ordered stream of response elements for one exchange.
///
/// Yields `Ok(element)` for each element, ends with `None` on completion, or
/// yields one `Err` and then ends.
#[derive(Debug)]
pub struct ElementStream {
    rx: Option<mpsc::Receiver<Signal>>,
    control: Arc<ExchangeControl>,
    consumer: Consumer,
}

impl ElementStream {
    pub(crate) fn new(rx: mpsc::Receiver<Signal>, control: Arc<ExchangeControl>) -> Self {
        Self {
            rx: Some(rx),
            control,
            consumer: Consumer::Unclaimed,
        }
    }

    /// Register the single consumer.
    ///
    /// Elements are delivered in order from a spawned task; exactly one of
    /// `on_complete` or `on_error` runs afterwards, unless the subscription is
    /// cancelled first, in which case neither does. Callbacks run on the
    /// runtime and should not block for long; a slow `on_element` applies
    /// backpressure to the exchange.
    ///
    /// Fails with `InvalidUsage` if the stream already has a consumer, was
    /// cancelled, or has finished, and with `Internal` outside a Tokio
    /// runtime.
    pub fn subscribe<E, C, F>(&mut self, mut on_element: E, on_complete: C, on_error: F) -> Result<Subscription>
    where
        E: FnMut(ResponseElement) + Send + 'static,
        C: FnOnce() + Send + 'static,
        F: FnOnce(HttpError) + Send + 'static,
    {
        if self.consumer != Consumer::Unclaimed {
            return Err(HttpError::invalid("element stream already has a consumer or has terminated"));
        }
        if self.control.is_cancel_requested() {
            return Err(HttpError::invalid("element stream was cancelled"));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| HttpError::Internal("subscribe requires a Tokio runtime".to_string()))?;
        let Some(mut rx) = self.rx.take() else {
            return Err(HttpError::invalid("element stream has no receiver"));
        };
        self.consumer = Consumer::Subscribed;

        let control = Arc::clone(&self.control);
        let task = runtime.spawn(async move {
            loop {
                let signal = tokio::select! {
                    biased;
                    _ = control.cancelled() => break,
                    signal = rx.recv() => signal,
                };
                if control.is_cancel_requested() {
                    break;
                }
                let element = match signal {
                    Some(Signal::Element(element)) => element,
                    _ if !control.observe_terminal() => break,
                    Some(Signal::Complete) => {
                        on_complete();
                        break;
                    }
                    Some(Signal::Error(err)) => {
                        on_error(err);
                        break;
                    }
                    None => {
                        on_error(HttpError::Internal("exchange ended without a terminal signal".to_string()));
                        break;
                    }
                };
                on_element(element);
            }
        });

        Ok(Subscription {
            handle: self.cancel_handle(),
            task,
        })
    }

    /// Stop the exchange. Idempotent; a no-op once the stream has finished.
    pub fn cancel(&self) {
        if self.consumer == Consumer::Finished {
            return;
        }
        self.cancel_handle().cancel();
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            control: Arc::clone(&self.control),
        }
    }

    /// Drain the stream into a `ServerResponse`.
    ///
    /// Returns the stream's terminal error, if any. Note that this buffers
    /// the whole body.
    pub async fn into_response(mut self) -> Result<ServerResponse> {
        let mut status = None;
        let mut headers = None;
        let mut body = BytesMut::new();
        while let Some(element) = self.next().await {
            match element? {
                ResponseElement::Status(s) => status = Some(s),
                ResponseElement::Headers(h) => headers = Some(h),
                ResponseElement::BodyPart(part) => body.extend_from_slice(&part),
            }
        }
        match (status, headers) {
            (Some(status), Some(headers)) => Ok(ServerResponse {
                status,
                headers,
                body: body.freeze(),
            }),
            _ => Err(HttpError::Internal(
                "stream ended before the response head was received".to_string(),
            )),
        }
    }

    fn finish(&mut self) {
        self.consumer = Consumer::Finished;
        self.rx = None;
    }
}

impl Stream for ElementStream {
    type Item = Result<ResponseElement>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        if this.control.is_cancel_requested() {
            this.finish();
            return Poll::Ready(None);
        }
        let Some(rx) = this.rx.as_mut() else {
            return Poll::Ready(None);
        };
        this.consumer = Consumer::Pulling;

        let signal = ready!(rx.poll_recv(cx));
        if this.control.is_cancel_requested() {
            this.finish();
            return Poll::Ready(None);
        }
        match signal {
            Some(Signal::Element(element)) => Poll::Ready(Some(Ok(element))),
            _ if !this.control.observe_terminal() => {
                this.finish();
                Poll::Ready(None)
            }
            Some(Signal::Complete) => {
                this.finish();
                Poll::Ready(None)
            }
            Some(Signal::Error(err)) => {
                this.finish();
                Poll::Ready(Some(Err(err)))
            }
            None => {
                this.finish();
                Poll::Ready(Some(Err(HttpError::Internal(
                    "exchange ended without a terminal signal".to_string(),
                ))))
            }
        }
    }
}

impl Drop for ElementStream {
    fn drop(&mut self) {
        // A subscribed stream is owned by its delivery task from here on.
        if matches!(self.consumer, Consumer::Unclaimed | Consumer::Pulling) {
            self.control.cancel();
        }
    }
}

/// Handle to a callback subscription.
#[derive(Debug)]
pub struct Subscription {
    handle: CancelHandle,
    task: JoinHandle<()>,
}

impl Subscription {
    /// Stop delivery and the exchange. Idempotent.
    pub fn cancel(&self) {
        self.handle.cancel();
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.handle.clone()
    }

    /// True once the delivery task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait until the terminal callback has run or the subscription was
    /// cancelled.
    pub async fn finished(self) {
        if let Err(err) = self.task.await {
            tracing::warn!(error = %err, "subscriber task failed");
        }
    }
}
