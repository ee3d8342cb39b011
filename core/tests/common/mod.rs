#![allow(dead_code)]

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use mock_server::MockServer;
use streamclient_core::{ClientConfig, ElementStream, HttpClient, HttpError, ResponseElement};

pub async fn server() -> MockServer {
    MockServer::start().await.unwrap()
}

pub fn client_for(server: &MockServer, configure: impl FnOnce(ClientConfig) -> ClientConfig) -> HttpClient {
    HttpClient::new(configure(ClientConfig::new(server.url()))).unwrap()
}

/// Read the stream to its end, returning every element and the terminal
/// error, if any.
pub async fn drain(stream: &mut ElementStream) -> (Vec<ResponseElement>, Option<HttpError>) {
    let mut elements = Vec::new();
    while let Some(item) = stream.next().await {
        match item {
            Ok(element) => elements.push(element),
            Err(err) => return (elements, Some(err)),
        }
    }
    (elements, None)
}

pub fn body_of(elements: &[ResponseElement]) -> Bytes {
    let mut body = BytesMut::new();
    for part in elements.iter().filter_map(ResponseElement::as_body_part) {
        body.extend_from_slice(part);
    }
    body.freeze()
}

pub fn body_parts(elements: &[ResponseElement]) -> usize {
    elements.iter().filter(|e| e.as_body_part().is_some()).count()
}

/// Status first, headers second, body parts after.
pub fn assert_head(elements: &[ResponseElement], code: u16) {
    assert!(elements.len() >= 2, "missing response head: {elements:?}");
    assert_eq!(elements[0].as_status().map(|s| s.code()), Some(code));
    assert!(elements[1].as_headers().is_some());
    assert!(elements[2..].iter().all(|e| e.as_body_part().is_some()));
}

/// Poll `condition` until it holds, failing after two seconds.
pub async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
