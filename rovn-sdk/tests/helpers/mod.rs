//! Shared fixtures for rovn-sdk integration tests.
//!
//! - response templates for the Rovn API envelope and SSE bodies
//! - client configs pointed at a wiremock server, with fast timings
//! - a matcher for "header absent" and a polling helper

#![allow(dead_code)] // Not every test file uses every helper

use std::future::Future;
use std::time::Duration;

use rovn_sdk::{ClientConfig, DeliveryConfig, StreamConfig};
use serde_json::{Value, json};
use wiremock::{Match, MockServer, Request, ResponseTemplate};

pub const TEST_API_KEY: &str = "rovn_test_key";
pub const TEST_AGENT_ID: &str = "agent-1";

/// `200 {"success": true, "data": ...}`
pub fn ok(data: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "success": true, "data": data }))
}

/// Error response with the API's `{"success": false, "error", "code"}` body.
pub fn api_error(status: u16, error: &str, code: &str) -> ResponseTemplate {
    ResponseTemplate::new(status).set_body_json(json!({
        "success": false,
        "error": error,
        "code": code,
    }))
}

/// `200 text/event-stream` with the given raw body.
pub fn sse(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.as_bytes().to_vec(), "text/event-stream")
}

/// Synchronous config for `server` with a known agent id.
pub fn config(server: &MockServer) -> ClientConfig {
    ClientConfig::new(server.uri(), TEST_API_KEY).with_agent_id(TEST_AGENT_ID)
}

/// Retry and shutdown timings short enough for real-time tests.
pub fn fast_delivery(queue_capacity: usize) -> DeliveryConfig {
    DeliveryConfig {
        queue_capacity,
        backoff_base: Duration::from_millis(10),
        backoff_max: Duration::from_millis(40),
        shutdown_timeout: Duration::from_secs(2),
    }
}

pub fn fast_stream() -> StreamConfig {
    StreamConfig {
        reconnect_delay: Duration::from_millis(50),
        stop_timeout: Duration::from_secs(2),
    }
}

/// Matches requests that do NOT carry the named header.
pub struct NoHeader(pub &'static str);

impl Match for NoHeader {
    fn matches(&self, request: &Request) -> bool {
        !request.headers.contains_key(self.0)
    }
}

/// Poll `condition` every 10ms until it holds or `timeout` elapses.
pub async fn wait_until<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Number of requests the server has received for `path`.
pub async fn request_count(server: &MockServer, path: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == path)
        .count()
}
