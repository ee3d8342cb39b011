//! End-to-end exchanges against the stub server.
//!
//! # Design
//! Each test starts its own `MockServer` on a random port, registers the
//! stubs it needs and drives the client over real HTTP/1.1. Assertions are
//! on the element sequence and the terminal signal, the way a consumer
//! sees them.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{assert_head, body_of, body_parts, client_for, drain, server};
use futures_util::StreamExt;
use mock_server::{Stub, StubResponse};
use streamclient_core::{HttpError, HttpMethod, ResponseElement, TimeoutPhase};
use tokio::sync::oneshot;

const CONTACTS: &str = r#"[{"id":1,"name":"Ada"},{"id":2,"name":"Grace"}]"#;

#[tokio::test]
async fn json_response_within_timeout_completes() {
    let server = server().await;
    server
        .stub(
            Stub::get("/contacts")
                .with_query("q", "test")
                .with_header("accept", "application/json")
                .will_return(
                    StubResponse::ok()
                        .with_header("content-type", "application/json")
                        .with_body(CONTACTS)
                        .with_delay(Duration::from_millis(33)),
                ),
        )
        .await;
    let client = client_for(&server, |c| {
        c.with_accept("application/json")
            .with_request_timeout(Duration::from_millis(100))
    });

    let request = client
        .request(HttpMethod::Get, "/contacts")
        .query_param("q", "test")
        .build()
        .unwrap();
    let mut stream = client.submit(request).unwrap();
    let (elements, error) = drain(&mut stream).await;

    assert!(error.is_none(), "unexpected error: {error:?}");
    assert_head(&elements, 200);
    assert_eq!(elements[0].as_status().unwrap().reason(), "OK");
    assert_eq!(elements[1].as_headers().unwrap().content_type(), Some("application/json"));
    assert!(body_parts(&elements) >= 1);
    assert_eq!(body_of(&elements), CONTACTS);

    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn unmatched_route_ends_with_client_error() {
    let server = server().await;
    let client = client_for(&server, |c| c);

    let request = client.request(HttpMethod::Get, "/nowhere").build().unwrap();
    let mut stream = client.submit(request).unwrap();
    let (elements, error) = drain(&mut stream).await;

    assert_head(&elements, 404);
    match error {
        Some(HttpError::ClientError(response)) => {
            assert_eq!(response.status_code(), 404);
            assert_eq!(response.body_text(), "no stub matched");
            assert!(!response.is_truncated());
        }
        other => panic!("expected ClientError, got {other:?}"),
    }
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn response_slower_than_timeout_fails_before_status() {
    let server = server().await;
    server
        .stub(Stub::get("/slow").will_return(StubResponse::ok().with_body("late").with_delay(Duration::from_millis(200))))
        .await;
    let client = client_for(&server, |c| c.with_request_timeout(Duration::from_millis(100)));

    let request = client.request(HttpMethod::Get, "/slow").build().unwrap();
    let mut stream = client.submit(request).unwrap();
    let (elements, error) = drain(&mut stream).await;

    assert!(elements.is_empty(), "no element may precede the timeout: {elements:?}");
    let error = error.expect("timeout");
    assert!(error.is_timeout());
    assert_eq!(error.timeout_phase(), Some(TimeoutPhase::InFlight));

    let stats = client.pool_stats();
    assert_eq!(stats.idle, 0);
    assert_eq!(stats.in_use, 0);
    assert_eq!(stats.discarded, 1);
}

#[tokio::test]
async fn timeout_applies_after_elements_were_emitted() {
    let server = server().await;
    server
        .stub(Stub::get("/feed").will_return(StubResponse::ok().with_chunks(["one", "two", "three"], Duration::from_millis(80))))
        .await;
    let client = client_for(&server, |c| c.with_request_timeout(Duration::from_millis(120)));

    let request = client.request(HttpMethod::Get, "/feed").build().unwrap();
    let mut stream = client.submit(request).unwrap();
    let (elements, error) = drain(&mut stream).await;

    assert_head(&elements, 200);
    assert!(body_parts(&elements) >= 1);
    assert!(!body_of(&elements).ends_with(b"three"));
    let error = error.expect("timeout");
    assert_eq!(error.timeout_phase(), Some(TimeoutPhase::InFlight));
    assert!(stream.next().await.is_none());

    let stats = client.pool_stats();
    assert_eq!(stats.discarded, 1);
    assert_eq!(stats.idle, 0);
    assert_eq!(stats.in_use, 0);
}

#[tokio::test]
async fn server_error_streams_body_then_fails() {
    let server = server().await;
    server
        .stub(
            Stub::get("/contacts").will_return(
                StubResponse::status(500)
                    .with_body("database unavailable")
                    .with_delay(Duration::from_millis(20)),
            ),
        )
        .await;
    let client = client_for(&server, |c| c);

    let request = client.request(HttpMethod::Get, "/contacts").build().unwrap();
    let mut stream = client.submit(request).unwrap();
    let (elements, error) = drain(&mut stream).await;

    assert_head(&elements, 500);
    assert_eq!(body_of(&elements), "database unavailable");
    match error {
        Some(HttpError::ServerError(response)) => {
            assert_eq!(response.status_code(), 500);
            assert_eq!(response.body(), "database unavailable");
        }
        other => panic!("expected ServerError, got {other:?}"),
    }
}

#[tokio::test]
async fn chunked_body_arrives_as_separate_parts() {
    let server = server().await;
    let chunks = ["alpha,", "beta,", "gamma,", "delta"];
    server
        .stub(Stub::get("/feed").will_return(StubResponse::ok().with_chunks(chunks, Duration::from_millis(30))))
        .await;
    let client = client_for(&server, |c| c);

    let request = client.request(HttpMethod::Get, "/feed").build().unwrap();
    let mut stream = client.submit(request).unwrap();
    let (elements, error) = drain(&mut stream).await;

    assert!(error.is_none());
    assert_head(&elements, 200);
    assert!(body_parts(&elements) >= chunks.len());
    assert_eq!(body_of(&elements), chunks.concat());
}

#[tokio::test]
async fn small_buffer_still_delivers_everything() {
    let server = server().await;
    let chunks: Vec<String> = (0..8).map(|i| format!("chunk-{i};")).collect();
    server
        .stub(Stub::get("/feed").will_return(StubResponse::ok().with_chunks(chunks.clone(), Duration::from_millis(5))))
        .await;
    let client = client_for(&server, |c| c.with_stream_buffer(1));

    let request = client.request(HttpMethod::Get, "/feed").build().unwrap();
    let mut stream = client.submit(request).unwrap();
    // Let the exchange run into the full queue before reading.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let (elements, error) = drain(&mut stream).await;

    assert!(error.is_none());
    assert_eq!(body_of(&elements), chunks.concat());
}

#[tokio::test]
async fn error_body_preview_is_capped() {
    let server = server().await;
    server
        .stub(Stub::get("/bad").will_return(StubResponse::status(400).with_body("0123456789abcdef")))
        .await;
    let client = client_for(&server, |c| c.with_error_body_limit(8));

    let request = client.request(HttpMethod::Get, "/bad").build().unwrap();
    match client.send(request).await {
        Err(HttpError::ClientError(response)) => {
            assert_eq!(response.status_code(), 400);
            assert_eq!(response.body(), "01234567");
            assert!(response.is_truncated());
        }
        other => panic!("expected ClientError, got {other:?}"),
    }
}

#[tokio::test]
async fn request_details_reach_the_server() {
    let server = server().await;
    server
        .stub(
            Stub::post("/api/contacts").will_return(
                StubResponse::status(201)
                    .with_header("content-type", "application/json")
                    .with_body(r#"{"id":3}"#),
            ),
        )
        .await;
    let client = streamclient_core::HttpClient::new(
        streamclient_core::ClientConfig::new(format!("{}/api/", server.url()))
            .with_accept("application/json")
            .with_default_header("x-client", "streamclient"),
    )
    .unwrap();

    let request = client
        .request(HttpMethod::Post, "contacts")
        .query_param("source", "import job")
        .header("X-Trace", "t-1")
        .body_with_type(r#"{"name":"Linus"}"#, "application/json")
        .build()
        .unwrap();
    let response = client.send(request).await.unwrap();
    assert_eq!(response.status_code(), 201);
    assert_eq!(response.content_type(), Some("application/json"));
    assert_eq!(response.body_text(), r#"{"id":3}"#);

    let received = server.received().await;
    assert_eq!(received.len(), 1);
    let seen = &received[0];
    assert_eq!(seen.method, "POST");
    assert_eq!(seen.path, "/api/contacts");
    assert_eq!(seen.query["source"], "import job");
    assert_eq!(seen.header("accept"), Some("application/json"));
    assert_eq!(seen.header("x-client"), Some("streamclient"));
    assert_eq!(seen.header("x-trace"), Some("t-1"));
    assert_eq!(seen.header("content-type"), Some("application/json"));
    assert_eq!(seen.header("host"), Some(server.addr().to_string().as_str()));
    assert_eq!(seen.body_text(), r#"{"name":"Linus"}"#);
}

#[tokio::test]
async fn per_request_timeout_overrides_default() {
    let server = server().await;
    server
        .stub(Stub::get("/slow").will_return(StubResponse::ok().with_delay(Duration::from_millis(150))))
        .await;
    let client = client_for(&server, |c| c.with_request_timeout(Duration::from_secs(5)));

    let request = client
        .request(HttpMethod::Get, "/slow")
        .timeout(Duration::from_millis(50))
        .build()
        .unwrap();
    let err = client.send(request).await.unwrap_err();
    assert_eq!(err.timeout_phase(), Some(TimeoutPhase::InFlight));
}

// --- callbacks ---

#[tokio::test]
async fn subscriber_sees_elements_then_completion() {
    let server = server().await;
    server
        .stub(Stub::get("/contacts").will_return(StubResponse::ok().with_chunks(["a", "b"], Duration::from_millis(20))))
        .await;
    let client = client_for(&server, |c| c);

    let request = client.request(HttpMethod::Get, "/contacts").build().unwrap();
    let mut stream = client.submit(request).unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let (done_tx, done_rx) = oneshot::channel();
    let sink = Arc::clone(&seen);
    let subscription = stream
        .subscribe(
            move |element| sink.lock().unwrap().push(element),
            move || {
                let _ = done_tx.send(());
            },
            |err| panic!("unexpected error: {err}"),
        )
        .unwrap();

    done_rx.await.unwrap();
    subscription.finished().await;

    let elements = seen.lock().unwrap().clone();
    assert_head(&elements, 200);
    assert_eq!(body_of(&elements), "ab");
}

#[tokio::test]
async fn subscriber_receives_classified_error() {
    let server = server().await;
    let client = client_for(&server, |c| c);

    let request = client.request(HttpMethod::Delete, "/contacts/9").build().unwrap();
    let mut stream = client.submit(request).unwrap();

    let (err_tx, err_rx) = oneshot::channel();
    let subscription = stream
        .subscribe(
            |_| {},
            || panic!("404 must not complete"),
            move |err| {
                let _ = err_tx.send(err);
            },
        )
        .unwrap();

    let err = err_rx.await.unwrap();
    assert_eq!(err.status_code(), Some(404));
    assert!(matches!(err, HttpError::ClientError(_)));
    subscription.finished().await;
}

#[tokio::test]
async fn second_subscriber_is_rejected() {
    let server = server().await;
    server.stub(Stub::get("/x")).await;
    let client = client_for(&server, |c| c);

    let request = client.request(HttpMethod::Get, "/x").build().unwrap();
    let mut stream = client.submit(request).unwrap();
    let subscription = stream.subscribe(|_| {}, || {}, |_| {}).unwrap();

    let err = stream.subscribe(|_| {}, || {}, |_| {}).unwrap_err();
    assert!(matches!(err, HttpError::InvalidUsage(_)));
    subscription.finished().await;
}

#[tokio::test]
async fn pulled_stream_cannot_be_subscribed() {
    let server = server().await;
    server.stub(Stub::get("/x").will_return(StubResponse::ok().with_body("x"))).await;
    let client = client_for(&server, |c| c);

    let request = client.request(HttpMethod::Get, "/x").build().unwrap();
    let mut stream = client.submit(request).unwrap();
    let first = stream.next().await.unwrap().unwrap();
    assert!(matches!(first, ResponseElement::Status(_)));

    let err = stream.subscribe(|_| {}, || {}, |_| {}).unwrap_err();
    assert!(matches!(err, HttpError::InvalidUsage(_)));
}
