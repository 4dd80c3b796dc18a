//! Scripted transport for testing.
//!
//! [`ScriptedTransport`] replays a queue of canned results and records every
//! call it receives (method, path, body and the tokio instant of the call).
//! Once the script is exhausted it answers `{"received": true}`.
//!
//! A gated transport holds each call until [`ScriptedTransport::release`]
//! grants it a permit, which lets tests keep the delivery worker busy while
//! they fill the queue.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Method;
use serde_json::{Value, json};
use tokio::sync::Semaphore;
use tokio::time::Instant;

use super::Transport;
use crate::error::RovnError;

/// One call observed by a [`ScriptedTransport`].
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
    /// When the call started (tokio clock, so paused-time tests see virtual time).
    pub at: Instant,
}

/// Test double for [`Transport`].
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Result<Value, RovnError>>>,
    calls: Mutex<Vec<RecordedCall>>,
    call_count: AtomicU32,
    gate: Option<Arc<Semaphore>>,
}

impl ScriptedTransport {
    /// Create a transport that answers every call with success.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transport that replays `results` in order.
    #[must_use]
    pub fn with_script(results: impl IntoIterator<Item = Result<Value, RovnError>>) -> Self {
        let transport = Self::new();
        transport.script.lock().extend(results);
        transport
    }

    /// Create a transport whose calls block until released.
    #[must_use]
    pub fn gated() -> Self {
        Self {
            gate: Some(Arc::new(Semaphore::new(0))),
            ..Self::default()
        }
    }

    /// Append a result to the script.
    pub fn push(&self, result: Result<Value, RovnError>) {
        self.script.lock().push_back(result);
    }

    /// Let `n` gated calls proceed. No-op for ungated transports.
    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    /// Number of calls received so far (including ones still gated).
    #[must_use]
    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Snapshot of the recorded calls.
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    /// Request bodies of the recorded calls, in call order.
    #[must_use]
    pub fn bodies(&self) -> Vec<Value> {
        self.calls
            .lock()
            .iter()
            .map(|call| call.body.clone().unwrap_or(Value::Null))
            .collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, RovnError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().push(RecordedCall {
            method,
            path: path.to_string(),
            body: body.cloned(),
            at: Instant::now(),
        });

        if let Some(gate) = &self.gate {
            match gate.acquire().await {
                Ok(permit) => permit.forget(),
                Err(_) => {
                    return Err(RovnError::Network {
                        message: "scripted transport gate closed".to_string(),
                    });
                }
            }
        }

        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(json!({"received": true})))
    }
}
