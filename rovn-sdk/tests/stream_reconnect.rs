//! Live stream connection, resume and shutdown against a mock SSE endpoint.
//!
//! A mocked SSE response has a fixed body, so every response is one session
//! that ends in a server-side disconnect once the body is read.

mod helpers;

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use helpers::{NoHeader, TEST_AGENT_ID, config, fast_stream, ok, request_count, sse, wait_until};
use parking_lot::Mutex;
use rovn_sdk::{RovnClient, StreamEvent, StreamOptions, StreamState};
use serde_json::{Value, json};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn stream_path(agent_id: &str) -> String {
    format!("/api/agents/{agent_id}/stream")
}

fn collector() -> (Arc<Mutex<Vec<StreamEvent>>>, impl Fn(StreamEvent) + Send + Sync + 'static) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let handler = {
        let seen = Arc::clone(&seen);
        move |event: StreamEvent| seen.lock().push(event)
    };
    (seen, handler)
}

fn counter() -> Arc<AtomicU32> {
    Arc::new(AtomicU32::new(0))
}

fn data_values(events: &[StreamEvent]) -> Vec<Value> {
    events.iter().map(|e| e.data.clone()).collect()
}

#[tokio::test]
async fn test_reconnect_resumes_from_last_event_id() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(stream_path(TEST_AGENT_ID)))
        .and(header("accept", "text/event-stream"))
        .and(NoHeader("last-event-id"))
        .respond_with(sse(
            "id: 1\nevent: command\ndata: {\"n\":1}\n\nid: 2\nevent: command\ndata: {\"n\":2}\n\n",
        ))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(stream_path(TEST_AGENT_ID)))
        .and(header("last-event-id", "2"))
        .respond_with(sse(": resumed\nid: 3\nevent: task_assigned\ndata: {\"n\":3}\n\n"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    // Once caught up, hold the connection open.
    Mock::given(method("GET"))
        .and(path(stream_path(TEST_AGENT_ID)))
        .and(header("last-event-id", "3"))
        .respond_with(sse(": idle\n\n").set_delay(Duration::from_secs(30)))
        .mount(&server)
        .await;

    let client = RovnClient::new(config(&server).with_stream(fast_stream())).unwrap();
    let (seen, handler) = collector();
    let connects = counter();
    let disconnects = counter();
    let options = StreamOptions::new()
        .on_connect({
            let connects = Arc::clone(&connects);
            move || {
                connects.fetch_add(1, Ordering::SeqCst);
            }
        })
        .on_disconnect({
            let disconnects = Arc::clone(&disconnects);
            move || {
                disconnects.fetch_add(1, Ordering::SeqCst);
            }
        });

    client.connect(handler, options).await.unwrap();
    assert!(
        wait_until(Duration::from_secs(5), || async { seen.lock().len() >= 3 }).await,
        "expected three events, got {:?}",
        seen.lock()
    );
    // Give a duplicate delivery a chance to show up.
    tokio::time::sleep(Duration::from_millis(150)).await;

    let events = seen.lock().clone();
    assert_eq!(
        data_values(&events),
        vec![json!({"n": 1}), json!({"n": 2}), json!({"n": 3})]
    );
    assert_eq!(events[2].event, "task_assigned");
    assert_eq!(events[2].id.as_deref(), Some("3"));
    assert_eq!(client.stream_cursor().as_deref(), Some("3"));
    assert_eq!(connects.load(Ordering::SeqCst), 2);
    assert_eq!(disconnects.load(Ordering::SeqCst), 2);

    client.disconnect().await;
    assert_eq!(client.stream_state(), StreamState::Stopped);
}

#[tokio::test]
async fn test_without_reconnect_stream_stops_after_server_close() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(stream_path(TEST_AGENT_ID)))
        .respond_with(sse(
            "id: 1\nevent: command\ndata: {not json\n\nid: 2\nevent: command\ndata: {\"ok\":true}\n\n",
        ))
        .mount(&server)
        .await;

    let client = RovnClient::new(config(&server).with_stream(fast_stream())).unwrap();
    let mut states = client.subscribe_stream_state();
    let (seen, handler) = collector();
    let disconnects = counter();
    let options = StreamOptions::new().with_reconnect(false).on_disconnect({
        let disconnects = Arc::clone(&disconnects);
        move || {
            disconnects.fetch_add(1, Ordering::SeqCst);
        }
    });

    client.connect(handler, options).await.unwrap();
    tokio::time::timeout(
        Duration::from_secs(5),
        states.wait_for(|s| *s == StreamState::Stopped),
    )
    .await
    .expect("stream did not stop")
    .unwrap();

    // The malformed block is skipped but still advances the cursor.
    assert_eq!(data_values(&seen.lock()), vec![json!({"ok": true})]);
    assert_eq!(client.stream_cursor().as_deref(), Some("2"));
    assert_eq!(disconnects.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(request_count(&server, &stream_path(TEST_AGENT_ID)).await, 1);
}

#[tokio::test]
async fn test_failed_connection_counts_as_disconnect() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(stream_path(TEST_AGENT_ID)))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let client = RovnClient::new(config(&server).with_stream(fast_stream())).unwrap();
    let (seen, handler) = collector();
    let connects = counter();
    let disconnects = counter();
    let options = StreamOptions::new()
        .on_connect({
            let connects = Arc::clone(&connects);
            move || {
                connects.fetch_add(1, Ordering::SeqCst);
            }
        })
        .on_disconnect({
            let disconnects = Arc::clone(&disconnects);
            move || {
                disconnects.fetch_add(1, Ordering::SeqCst);
            }
        });

    client.connect(handler, options).await.unwrap();
    // Keeps retrying with the reconnect delay between attempts.
    assert!(
        wait_until(Duration::from_secs(5), || async {
            disconnects.load(Ordering::SeqCst) >= 3
        })
        .await
    );
    client.disconnect().await;

    assert_eq!(connects.load(Ordering::SeqCst), 0);
    assert!(seen.lock().is_empty());
    assert_eq!(client.stream_state(), StreamState::Stopped);
}

#[tokio::test]
async fn test_connect_discovers_agent_id() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/agents/me"))
        .respond_with(ok(json!({"id": "agent-9", "name": "Scout"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(stream_path("agent-9")))
        .respond_with(sse("event: command\ndata: {\"cmd\":\"pause\"}\n\n"))
        .mount(&server)
        .await;

    let client = RovnClient::new(
        rovn_sdk::ClientConfig::new(server.uri(), helpers::TEST_API_KEY)
            .with_stream(fast_stream()),
    )
    .unwrap();
    let (seen, handler) = collector();

    client
        .connect(handler, StreamOptions::new().with_reconnect(false))
        .await
        .unwrap();
    assert!(wait_until(Duration::from_secs(5), || async { !seen.lock().is_empty() }).await);

    assert_eq!(client.agent_id().as_deref(), Some("agent-9"));
    assert_eq!(seen.lock()[0].data, json!({"cmd": "pause"}));
    // No id line, so there is nothing to resume from.
    assert!(client.stream_cursor().is_none());
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_disconnect_is_prompt_while_connecting() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(stream_path(TEST_AGENT_ID)))
        .respond_with(sse(": hello\n\n").set_delay(Duration::from_secs(30)))
        .mount(&server)
        .await;

    let client = RovnClient::new(config(&server).with_stream(fast_stream())).unwrap();
    let (_, handler) = collector();
    client
        .connect(handler, StreamOptions::new())
        .await
        .unwrap();
    assert!(
        wait_until(Duration::from_secs(5), || async {
            request_count(&server, &stream_path(TEST_AGENT_ID)).await == 1
        })
        .await
    );
    assert_eq!(client.stream_state(), StreamState::Connecting);

    tokio::time::timeout(Duration::from_secs(1), client.disconnect())
        .await
        .expect("disconnect should not wait for the pending response");
    assert_eq!(client.stream_state(), StreamState::Stopped);

    // Idempotent.
    client.disconnect().await;
    assert_eq!(client.stream_state(), StreamState::Stopped);
}
