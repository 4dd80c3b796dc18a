//! Live event stream.
//!
//! [`StreamClient`] keeps a long-lived `GET /api/agents/{id}/stream` request
//! open, parses the Server-Sent Events body incrementally and hands every
//! decoded event to a [`StreamHandler`].
//!
//! # State machine
//!
//! ```text
//! Idle -> Connecting -> Streaming -> (Disconnected -> Connecting)* -> Stopped
//! ```
//!
//! A failed connection attempt, a body read failure and a server-side close
//! all count as a disconnect: `on_disconnect` runs, then the loop stops when
//! reconnection is disabled or waits `reconnect_delay` and tries again,
//! indefinitely. Reconnects send the last committed event id as
//! `Last-Event-ID` so the server can resume without gaps.
//!
//! The cursor belongs to the `StreamClient` instance: it survives reconnects
//! and later `connect` calls on the same instance, and is never persisted.

pub mod parser;

use std::sync::Arc;

use parking_lot::Mutex;
use reqwest::header::ACCEPT;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{ClientConfig, StreamConfig};
use crate::error::RovnError;
use parser::{SseFrame, SseParser};

/// Header carrying the resume cursor.
pub const LAST_EVENT_ID: &str = "Last-Event-ID";

/// Lifecycle of a [`StreamClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Never connected.
    Idle,
    /// Opening the stream request.
    Connecting,
    /// Connected and reading events.
    Streaming,
    /// Connection lost; waiting to reconnect (or about to stop).
    Disconnected,
    /// Stopped by `disconnect()` or by a disconnect with reconnection off.
    Stopped,
}

/// A decoded stream event.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEvent {
    /// The event's `id:`, if the server sent one.
    pub id: Option<String>,
    /// The event type (`event:` line), e.g. `command`.
    pub event: String,
    /// The JSON-decoded `data:` payload.
    pub data: Value,
}

/// Receives stream events on the stream task.
///
/// Implemented for every `Fn(StreamEvent) + Send + Sync + 'static`.
pub trait StreamHandler: Send + Sync + 'static {
    fn handle(&self, event: StreamEvent);
}

impl<F> StreamHandler for F
where
    F: Fn(StreamEvent) + Send + Sync + 'static,
{
    fn handle(&self, event: StreamEvent) {
        self(event);
    }
}

/// Connection lifecycle callback.
pub type StreamCallback = Arc<dyn Fn() + Send + Sync>;

/// Per-connection options.
#[derive(Clone)]
pub struct StreamOptions {
    /// Agent to stream for. Defaults to the client's own agent.
    pub agent_id: Option<String>,
    /// Reconnect after a disconnect (default: true).
    pub reconnect: bool,
    /// Called after each successful connection.
    pub on_connect: Option<StreamCallback>,
    /// Called after each disconnect or failed connection attempt.
    pub on_disconnect: Option<StreamCallback>,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            agent_id: None,
            reconnect: true,
            on_connect: None,
            on_disconnect: None,
        }
    }
}

impl std::fmt::Debug for StreamOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamOptions")
            .field("agent_id", &self.agent_id)
            .field("reconnect", &self.reconnect)
            .field("on_connect", &self.on_connect.is_some())
            .field("on_disconnect", &self.on_disconnect.is_some())
            .finish()
    }
}

impl StreamOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    #[must_use]
    pub fn with_reconnect(mut self, reconnect: bool) -> Self {
        self.reconnect = reconnect;
        self
    }

    #[must_use]
    pub fn on_connect(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_connect = Some(Arc::new(callback));
        self
    }

    #[must_use]
    pub fn on_disconnect(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_disconnect = Some(Arc::new(callback));
        self
    }
}

/// Running stream task.
struct Session {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Auto-reconnecting SSE client.
pub struct StreamClient {
    client: reqwest::Client,
    base_url: String,
    /// API key (NEVER log this value)
    api_key: String,
    config: StreamConfig,
    cursor: Arc<Mutex<Option<String>>>,
    state: Arc<watch::Sender<StreamState>>,
    session: Mutex<Option<Session>>,
    /// Serializes `connect` so a replaced session is fully stopped first.
    switching: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for StreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamClient")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("config", &self.config)
            .field("state", &self.state())
            .field("cursor", &self.cursor())
            .finish()
    }
}

impl StreamClient {
    /// Create a stream client from a client configuration.
    ///
    /// The stream request gets the connect timeout but no overall request
    /// timeout, since the response body is open-ended.
    ///
    /// # Errors
    ///
    /// Returns `RovnError::InvalidConfig` if the HTTP client cannot be built.
    pub fn new(config: &ClientConfig) -> Result<Self, RovnError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.http.connect_timeout)
            .tcp_nodelay(true)
            .build()
            .map_err(|e| RovnError::InvalidConfig {
                details: format!("failed to build stream HTTP client: {e}"),
            })?;
        let (state, _) = watch::channel(StreamState::Idle);

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key().to_string(),
            config: config.stream.clone(),
            cursor: Arc::new(Mutex::new(None)),
            state: Arc::new(state),
            session: Mutex::new(None),
            switching: tokio::sync::Mutex::new(()),
        })
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> StreamState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<StreamState> {
        self.state.subscribe()
    }

    /// Last committed event id.
    #[must_use]
    pub fn cursor(&self) -> Option<String> {
        self.cursor.lock().clone()
    }

    /// Start streaming events for `agent_id` on a background task.
    ///
    /// A session that is already running is stopped first.
    ///
    /// # Errors
    ///
    /// Returns `RovnError::InvalidConfig` when called outside a tokio runtime.
    pub async fn connect(
        &self,
        agent_id: &str,
        handler: impl StreamHandler,
        options: &StreamOptions,
    ) -> Result<(), RovnError> {
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| RovnError::InvalidConfig {
                details: "the event stream must be started inside a tokio runtime".to_string(),
            })?;

        let _switching = self.switching.lock().await;
        self.disconnect().await;

        let cancel = CancellationToken::new();
        let task = StreamTask {
            client: self.client.clone(),
            url: format!("{}/api/agents/{agent_id}/stream", self.base_url),
            api_key: self.api_key.clone(),
            config: self.config.clone(),
            options: options.clone(),
            handler: Arc::new(handler),
            cursor: Arc::clone(&self.cursor),
            state: Arc::clone(&self.state),
            cancel: cancel.clone(),
        };

        info!(agent_id = %agent_id, reconnect = options.reconnect, "Starting event stream");
        task.set_state(StreamState::Connecting);
        let handle = runtime.spawn(task.run());
        let replaced = self.session.lock().replace(Session { cancel, handle });
        if let Some(replaced) = replaced {
            warn!("Replacing a stream session that was not stopped");
            replaced.cancel.cancel();
        }
        Ok(())
    }

    /// Stop the stream and wait (bounded) for the task to finish.
    ///
    /// Idempotent, and a no-op when never connected.
    pub async fn disconnect(&self) {
        let Some(session) = self.session.lock().take() else {
            return;
        };

        session.cancel.cancel();
        match tokio::time::timeout(self.config.stop_timeout, session.handle).await {
            Ok(Ok(())) => debug!("Event stream stopped"),
            Ok(Err(e)) => error!(error = %e, "Event stream task failed"),
            Err(_) => warn!(
                timeout_secs = self.config.stop_timeout.as_secs(),
                "Event stream did not stop in time, abandoning"
            ),
        }
        self.state.send_replace(StreamState::Stopped);
    }
}

impl Drop for StreamClient {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().take() {
            session.cancel.cancel();
        }
    }
}

/// Everything the stream task owns.
struct StreamTask {
    client: reqwest::Client,
    url: String,
    api_key: String,
    config: StreamConfig,
    options: StreamOptions,
    handler: Arc<dyn StreamHandler>,
    cursor: Arc<Mutex<Option<String>>>,
    state: Arc<watch::Sender<StreamState>>,
    cancel: CancellationToken,
}

impl StreamTask {
    async fn run(self) {
        let mut parser = SseParser::new();

        loop {
            self.set_state(StreamState::Connecting);
            let outcome = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                outcome = self.session(&mut parser) => outcome,
            };

            match outcome {
                Ok(()) => info!("Event stream closed by server"),
                Err(e) => warn!(status = e.status(), error = %e, "Event stream disconnected"),
            }
            parser.reset();
            self.set_state(StreamState::Disconnected);
            if let Some(callback) = &self.options.on_disconnect {
                callback();
            }

            if !self.options.reconnect {
                break;
            }
            debug!(
                delay_ms = self.config.reconnect_delay.as_millis() as u64,
                "Reconnecting event stream"
            );
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(self.config.reconnect_delay) => {}
            }
        }

        self.set_state(StreamState::Stopped);
    }

    /// One connection: open, then read until the body ends or fails.
    async fn session(&self, parser: &mut SseParser) -> Result<(), RovnError> {
        let mut request = self
            .client
            .get(&self.url)
            .bearer_auth(&self.api_key)
            .header(ACCEPT, "text/event-stream");
        let cursor = self.cursor.lock().clone();
        if let Some(cursor) = &cursor {
            request = request.header(LAST_EVENT_ID, cursor);
        }

        let mut response = request.send().await.map_err(|e| RovnError::Network {
            message: format!("Stream connection failed: {e}"),
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(RovnError::from_status(
                status.as_u16(),
                "Stream connection failed",
                None,
            ));
        }

        info!(resume_from = ?cursor, "Event stream connected");
        if let Some(callback) = &self.options.on_connect {
            callback();
        }
        self.set_state(StreamState::Streaming);

        while let Some(chunk) = response.chunk().await.map_err(|e| RovnError::Network {
            message: format!("Stream read failed: {e}"),
        })? {
            for frame in parser.feed(&chunk) {
                self.handle_frame(frame);
            }
        }
        Ok(())
    }

    fn handle_frame(&self, frame: SseFrame) {
        if frame.is_dispatchable() {
            match serde_json::from_str::<Value>(&frame.data) {
                Ok(data) => self.handler.handle(StreamEvent {
                    id: frame.id.clone(),
                    event: frame.event,
                    data,
                }),
                Err(e) => debug!(
                    event = %frame.event,
                    error = %e,
                    "Skipping stream event with malformed JSON"
                ),
            }
        }

        // The block is complete, so its id is committed even if it was skipped.
        if let Some(id) = frame.id.filter(|id| !id.is_empty()) {
            *self.cursor.lock() = Some(id);
        }
    }

    fn set_state(&self, state: StreamState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = ?previous, to = ?state, "Stream state changed");
        }
    }
}
