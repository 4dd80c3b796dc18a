//! Client configuration.
//!
//! [`ClientConfig`] is built either programmatically
//! (`ClientConfig::new(base_url, api_key)` plus `with_*` methods) or from the
//! environment via [`ClientConfig::from_env`].
//!
//! # Environment Variables
//!
//! - `ROVN_BASE_URL` (required): API base URL, e.g. `http://localhost:3000`
//! - `ROVN_API_KEY` (required): agent API key (`rovn_...`)
//! - `ROVN_AGENT_ID`: agent id, skips self-discovery
//! - `ROVN_FIRE_AND_FORGET` (default: false): queue events for background delivery
//! - `ROVN_QUEUE_CAPACITY` (default: 10000)
//! - `ROVN_BACKOFF_BASE_MS` / `ROVN_BACKOFF_MAX_MS` (default: 1000 / 30000)
//! - `ROVN_SHUTDOWN_TIMEOUT_SECS` (default: 10)
//! - `ROVN_GUARDRAIL_TTL_SECS` (default: 60)
//! - `ROVN_STREAM_RECONNECT_DELAY_MS` (default: 3000)
//! - `ROVN_REQUEST_TIMEOUT_SECS` / `ROVN_CONNECT_TIMEOUT_SECS` (default: 30 / 5)

pub mod defaults;

use std::time::Duration;

use crate::error::RovnError;

// ============================================================================
// Delivery Mode
// ============================================================================

/// Base delivery mode of a client, fixed at construction.
///
/// Batching is not a mode of its own: it is entered and exited at runtime and
/// layers on top of whichever base mode the client was built with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Every event is sent before the dispatching call returns.
    #[default]
    Synchronous,
    /// Events are queued and delivered by a background worker.
    FireAndForget,
}

// ============================================================================
// Section Configs
// ============================================================================

/// Fire-and-forget queue and retry policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryConfig {
    /// Maximum number of queued events; excess events are dropped.
    pub queue_capacity: usize,
    /// First retry delay.
    pub backoff_base: Duration,
    /// Retry delay cap.
    pub backoff_max: Duration,
    /// Bounded wait for the worker to drain on `close()`.
    pub shutdown_timeout: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            queue_capacity: defaults::QUEUE_CAPACITY,
            backoff_base: defaults::BACKOFF_BASE,
            backoff_max: defaults::BACKOFF_MAX,
            shutdown_timeout: defaults::SHUTDOWN_TIMEOUT,
        }
    }
}

/// Live stream reconnection policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    /// Wait between reconnection attempts.
    pub reconnect_delay: Duration,
    /// Bounded wait for the reader task on `disconnect()`.
    pub stop_timeout: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: defaults::STREAM_RECONNECT_DELAY,
            stop_timeout: defaults::STREAM_STOP_TIMEOUT,
        }
    }
}

/// HTTP client tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpConfig {
    /// Request timeout (connect + response). Not applied to the stream.
    pub request_timeout: Duration,
    /// TCP + TLS handshake timeout.
    pub connect_timeout: Duration,
    /// Largest accepted response body in bytes.
    pub max_response_size: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout: defaults::REQUEST_TIMEOUT,
            connect_timeout: defaults::CONNECT_TIMEOUT,
            max_response_size: defaults::MAX_RESPONSE_SIZE,
        }
    }
}

// ============================================================================
// Client Config
// ============================================================================

/// Complete configuration for a [`crate::RovnClient`].
#[derive(Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// API base URL without trailing slash.
    pub base_url: String,
    /// API key (NEVER log this value)
    api_key: String,
    /// Agent id, if already known.
    pub agent_id: Option<String>,
    /// Base delivery mode.
    pub mode: DeliveryMode,
    /// Queue and retry policy.
    pub delivery: DeliveryConfig,
    /// Guardrail snapshot lifetime.
    pub guardrail_ttl: Duration,
    /// Stream reconnection policy.
    pub stream: StreamConfig,
    /// HTTP client tuning.
    pub http: HttpConfig,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("agent_id", &self.agent_id)
            .field("mode", &self.mode)
            .field("delivery", &self.delivery)
            .field("guardrail_ttl", &self.guardrail_ttl)
            .field("stream", &self.stream)
            .field("http", &self.http)
            .finish()
    }
}

impl ClientConfig {
    /// Create a configuration with default policies.
    ///
    /// Trailing slashes are stripped from `base_url`.
    #[must_use]
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            agent_id: None,
            mode: DeliveryMode::default(),
            delivery: DeliveryConfig::default(),
            guardrail_ttl: defaults::GUARDRAIL_TTL,
            stream: StreamConfig::default(),
            http: HttpConfig::default(),
        }
    }

    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `RovnError::InvalidConfig` if a required variable is missing
    /// or a numeric/boolean variable cannot be parsed.
    pub fn from_env() -> Result<Self, RovnError> {
        let base_url = required_env("ROVN_BASE_URL")?;
        let api_key = required_env("ROVN_API_KEY")?;

        let mut config = Self::new(base_url, api_key);
        config.agent_id = std::env::var("ROVN_AGENT_ID")
            .ok()
            .filter(|id| !id.trim().is_empty());

        if let Some(enabled) = parse_env::<bool>("ROVN_FIRE_AND_FORGET")? {
            config.mode = if enabled {
                DeliveryMode::FireAndForget
            } else {
                DeliveryMode::Synchronous
            };
        }
        if let Some(capacity) = parse_env::<usize>("ROVN_QUEUE_CAPACITY")? {
            config.delivery.queue_capacity = capacity;
        }
        if let Some(ms) = parse_env::<u64>("ROVN_BACKOFF_BASE_MS")? {
            config.delivery.backoff_base = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_env::<u64>("ROVN_BACKOFF_MAX_MS")? {
            config.delivery.backoff_max = Duration::from_millis(ms);
        }
        if let Some(secs) = parse_env::<u64>("ROVN_SHUTDOWN_TIMEOUT_SECS")? {
            config.delivery.shutdown_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_env::<u64>("ROVN_GUARDRAIL_TTL_SECS")? {
            config.guardrail_ttl = Duration::from_secs(secs);
        }
        if let Some(ms) = parse_env::<u64>("ROVN_STREAM_RECONNECT_DELAY_MS")? {
            config.stream.reconnect_delay = Duration::from_millis(ms);
        }
        if let Some(secs) = parse_env::<u64>("ROVN_REQUEST_TIMEOUT_SECS")? {
            config.http.request_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_env::<u64>("ROVN_CONNECT_TIMEOUT_SECS")? {
            config.http.connect_timeout = Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }

    /// The configured API key.
    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Set a known agent id.
    #[must_use]
    pub fn with_agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    /// Set the base delivery mode.
    #[must_use]
    pub fn with_mode(mut self, mode: DeliveryMode) -> Self {
        self.mode = mode;
        self
    }

    /// Shorthand for `with_mode(DeliveryMode::FireAndForget)`.
    #[must_use]
    pub fn fire_and_forget(self) -> Self {
        self.with_mode(DeliveryMode::FireAndForget)
    }

    /// Set the queue and retry policy.
    #[must_use]
    pub fn with_delivery(mut self, delivery: DeliveryConfig) -> Self {
        self.delivery = delivery;
        self
    }

    /// Set the guardrail snapshot lifetime.
    #[must_use]
    pub fn with_guardrail_ttl(mut self, ttl: Duration) -> Self {
        self.guardrail_ttl = ttl;
        self
    }

    /// Set the stream reconnection policy.
    #[must_use]
    pub fn with_stream(mut self, stream: StreamConfig) -> Self {
        self.stream = stream;
        self
    }

    /// Set HTTP client tuning.
    #[must_use]
    pub fn with_http(mut self, http: HttpConfig) -> Self {
        self.http = http;
        self
    }

    /// Check invariants that would otherwise surface as runtime misbehaviour.
    ///
    /// # Errors
    ///
    /// Returns `RovnError::InvalidConfig` if the base URL is empty or not an
    /// absolute URL, the queue capacity is zero, or the backoff base exceeds
    /// the cap.
    pub fn validate(&self) -> Result<(), RovnError> {
        if self.base_url.is_empty() {
            return Err(RovnError::InvalidConfig {
                details: "base_url must not be empty".to_string(),
            });
        }
        if let Err(e) = reqwest::Url::parse(&self.base_url) {
            return Err(RovnError::InvalidConfig {
                details: format!("invalid base_url '{}': {e}", self.base_url),
            });
        }
        if self.delivery.queue_capacity == 0 {
            return Err(RovnError::InvalidConfig {
                details: "queue_capacity must be at least 1".to_string(),
            });
        }
        if self.delivery.backoff_base > self.delivery.backoff_max {
            return Err(RovnError::InvalidConfig {
                details: format!(
                    "backoff_base ({:?}) exceeds backoff_max ({:?})",
                    self.delivery.backoff_base, self.delivery.backoff_max
                ),
            });
        }
        Ok(())
    }
}

fn required_env(name: &str) -> Result<String, RovnError> {
    std::env::var(name).map_err(|_| RovnError::InvalidConfig {
        details: format!("{name} environment variable is required"),
    })
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Result<Option<T>, RovnError> {
    match std::env::var(name) {
        Ok(val) => val
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| RovnError::InvalidConfig {
                details: format!("{name} has an invalid value, got: '{val}'"),
            }),
        Err(_) => Ok(None),
    }
}
