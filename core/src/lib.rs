//! Streaming HTTP client core.
//!
//! # Overview
//! Submits HTTP/1.1 requests against one base URL and exposes each response
//! as an ordered stream of `ResponseElement`s: one `Status`, one `Headers`,
//! then the body as the chunks the transport delivered. A stream ends exactly
//! once, with completion or a typed `HttpError`, or silently when the
//! consumer cancels it.
//!
//! # Design
//! - `HttpClient` owns the configuration, a bounded `ConnectionPool` and a
//!   shutdown token; `submit` spawns one exchange task per request.
//! - Exchanges and consumers meet at a bounded queue, so a slow consumer
//!   pauses network reads instead of buffering the body.
//! - One deadline covers connection acquisition and the whole exchange.
//!   Timed-out, failed and cancelled exchanges discard their connection;
//!   only cleanly finished ones return it to the pool.
//! - 4xx/5xx responses still stream their elements; the terminal signal is
//!   the classified error, carrying a capped preview of the body.
//!
//! ```no_run
//! use futures_util::StreamExt;
//! use streamclient_core::{ClientConfig, HttpClient, HttpMethod, ResponseElement};
//!
//! # async fn run() -> streamclient_core::Result<()> {
//! let client = HttpClient::new(ClientConfig::new("http://localhost:8089").with_accept("application/json"))?;
//! let request = client
//!     .request(HttpMethod::Get, "/contacts")
//!     .query_param("q", "test")
//!     .build()?;
//!
//! let mut stream = client.submit(request)?;
//! while let Some(element) = stream.next().await {
//!     match element? {
//!         ResponseElement::Status(status) => println!("status {}", status.code()),
//!         ResponseElement::Headers(headers) => println!("type {:?}", headers.content_type()),
//!         ResponseElement::BodyPart(bytes) => println!("{} bytes", bytes.len()),
//!     }
//! }
//! client.close();
//! # Ok(())
//! # }
//! ```

mod classify;
pub mod client;
pub mod config;
pub mod error;
mod exchange;
pub mod http;
pub mod pool;
pub mod stream;
pub mod types;

pub use client::HttpClient;
pub use config::ClientConfig;
pub use error::{ErrorResponse, HttpError, Result, TimeoutPhase};
pub use self::http::{HttpMethod, HttpRequest, RequestBody, RequestBuilder};
pub use pool::PoolStats;
pub use stream::{CancelHandle, ElementStream, Subscription};
pub use types::{ResponseElement, ResponseHeaders, ResponseStatus, ServerResponse};
