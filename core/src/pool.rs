//! Bounded connection pool for one origin.
//!
//! A `Semaphore` with `max_connections` permits bounds the number of
//! connections checked out at once. Idle HTTP/1.1 connections are kept in a
//! mutex-guarded list and handed out most-recently-used first. A checked-out
//! connection is a `PooledConnection` guard: `release` returns it to the idle
//! list, and dropping it without `release` discards it, so every path that
//! abandons an exchange (error, timeout, cancellation) closes the socket
//! instead of pooling it in an unknown state.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::client::conn::http1::{self, SendRequest};
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::classify;
use crate::error::{HttpError, Result};

type Sender = SendRequest<Full<Bytes>>;

/// Host and port every pooled connection points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Origin {
    pub host: String,
    pub port: u16,
}

/// Point-in-time counters of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    pub max_connections: usize,
    /// Connections waiting for reuse.
    pub idle: usize,
    /// Connections currently owned by an exchange.
    pub in_use: usize,
    /// Connections opened since the pool was created.
    pub opened: u64,
    /// Checkouts served from the idle list.
    pub reused: u64,
    /// Connections closed instead of being returned for reuse.
    pub discarded: u64,
}

struct IdleConnection {
    id: u64,
    sender: Sender,
}

pub struct ConnectionPool {
    origin: Origin,
    max_connections: usize,
    permits: Arc<Semaphore>,
    idle: Mutex<Vec<IdleConnection>>,
    closed: AtomicBool,
    next_id: AtomicU64,
    in_use: AtomicUsize,
    opened: AtomicU64,
    reused: AtomicU64,
    discarded: AtomicU64,
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("origin", &self.origin)
            .field("closed", &self.is_closed())
            .field("stats", &self.stats())
            .finish()
    }
}

impl ConnectionPool {
    pub(crate) fn new(origin: Origin, max_connections: usize) -> Self {
        Self {
            origin,
            max_connections,
            permits: Arc::new(Semaphore::new(max_connections)),
            idle: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            in_use: AtomicUsize::new(0),
            opened: AtomicU64::new(0),
            reused: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
        }
    }

    /// Check out a connection, waiting while the pool is saturated.
    ///
    /// The wait is unbounded here; callers race it against their deadline.
    pub(crate) async fn acquire(self: &Arc<Self>) -> Result<PooledConnection> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| HttpError::Closed)?;

        loop {
            let candidate = self.idle.lock().unwrap_or_else(PoisonError::into_inner).pop();
            let Some(mut idle) = candidate else { break };
            if idle.sender.is_closed() || idle.sender.ready().await.is_err() {
                self.discarded.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(connection = idle.id, "dropping stale idle connection");
                continue;
            }
            self.reused.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(connection = idle.id, "reusing idle connection");
            return Ok(self.checkout(idle.id, idle.sender, permit));
        }

        let (id, sender) = self.connect().await?;
        Ok(self.checkout(id, sender, permit))
    }

    fn checkout(self: &Arc<Self>, id: u64, sender: Sender, permit: OwnedSemaphorePermit) -> PooledConnection {
        self.in_use.fetch_add(1, Ordering::Relaxed);
        PooledConnection {
            id,
            sender: Some(sender),
            pool: Arc::clone(self),
            _permit: permit,
        }
    }

    async fn connect(&self) -> Result<(u64, Sender)> {
        let stream = TcpStream::connect((self.origin.host.as_str(), self.origin.port))
            .await
            .map_err(classify::io_error)?;
        if let Err(err) = stream.set_nodelay(true) {
            tracing::debug!(error = %err, "failed to set TCP_NODELAY");
        }

        let (sender, connection) = http1::handshake(TokioIo::new(stream))
            .await
            .map_err(classify::hyper_error)?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                tracing::warn!(connection = id, error = %err, "connection terminated with error");
            }
        });

        self.opened.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(connection = id, host = %self.origin.host, port = self.origin.port, "opened connection");
        Ok((id, sender))
    }

    fn give_back(&self, id: u64, sender: Sender) {
        self.in_use.fetch_sub(1, Ordering::Relaxed);
        if self.is_closed() || sender.is_closed() {
            self.discarded.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(connection = id, "connection not reusable, closing");
            return;
        }
        self.idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(IdleConnection { id, sender });
        tracing::debug!(connection = id, "connection returned to pool");
    }

    fn discard(&self, id: u64) {
        self.in_use.fetch_sub(1, Ordering::Relaxed);
        self.discarded.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(connection = id, "discarding connection");
    }

    /// Refuse further checkouts and close idle connections.
    pub(crate) fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.permits.close();
        let idle = std::mem::take(&mut *self.idle.lock().unwrap_or_else(PoisonError::into_inner));
        self.discarded.fetch_add(idle.len() as u64, Ordering::Relaxed);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            max_connections: self.max_connections,
            idle: self.idle.lock().unwrap_or_else(PoisonError::into_inner).len(),
            in_use: self.in_use.load(Ordering::Relaxed),
            opened: self.opened.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }
}

/// A connection owned by exactly one exchange.
///
/// Dropping the guard discards the connection; only `release` pools it.
pub(crate) struct PooledConnection {
    id: u64,
    sender: Option<Sender>,
    pool: Arc<ConnectionPool>,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) async fn send(&mut self, request: http::Request<Full<Bytes>>) -> Result<http::Response<Incoming>> {
        let sender = self
            .sender
            .as_mut()
            .ok_or_else(|| HttpError::Internal("connection already released".to_string()))?;
        sender.ready().await.map_err(classify::hyper_error)?;
        sender.send_request(request).await.map_err(classify::hyper_error)
    }

    /// Return the connection for reuse. Only valid after the body was read
    /// to its end.
    pub(crate) fn release(mut self) {
        if let Some(sender) = self.sender.take() {
            self.pool.give_back(self.id, sender);
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if self.sender.take().is_some() {
            self.pool.discard(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(max: usize) -> Arc<ConnectionPool> {
        Arc::new(ConnectionPool::new(
            Origin {
                host: "127.0.0.1".to_string(),
                port: 9,
            },
            max,
        ))
    }

    #[test]
    fn fresh_pool_is_empty() {
        let stats = pool(4).stats();
        assert_eq!(
            stats,
            PoolStats {
                max_connections: 4,
                ..PoolStats::default()
            }
        );
    }

    #[tokio::test]
    async fn acquire_after_close_fails_with_closed() {
        let pool = pool(1);
        pool.close();
        pool.close();
        assert!(pool.is_closed());
        let err = pool.acquire().await.err().unwrap();
        assert!(matches!(err, HttpError::Closed));
    }

    #[tokio::test]
    async fn connect_refused_is_transport_error_and_returns_permit() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let pool = Arc::new(ConnectionPool::new(
            Origin {
                host: "127.0.0.1".to_string(),
                port,
            },
            1,
        ));
        let err = pool.acquire().await.err().unwrap();
        assert!(matches!(err, HttpError::Transport { .. }));
        assert_eq!(pool.permits.available_permits(), 1);
        assert_eq!(pool.stats().in_use, 0);
    }
}
