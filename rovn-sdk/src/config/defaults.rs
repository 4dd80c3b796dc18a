//! Centralized default values for the Rovn client.
//!
//! All timing and sizing knobs reference these constants so the defaults in
//! [`super::ClientConfig`] and its environment loader stay consistent.

use std::time::Duration;

/// Capacity of the fire-and-forget delivery queue.
pub const QUEUE_CAPACITY: usize = 10_000;

/// First retry delay after a failed delivery.
pub const BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Upper bound for the retry delay.
pub const BACKOFF_MAX: Duration = Duration::from_secs(30);

/// How long `close()` waits for the delivery worker to drain.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Age after which a guardrail snapshot must be refreshed.
pub const GUARDRAIL_TTL: Duration = Duration::from_secs(60);

/// Wait between stream reconnection attempts.
pub const STREAM_RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// How long `disconnect()` waits for the stream task to stop.
pub const STREAM_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-request timeout (connect + response) for API calls.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// TCP + TLS handshake timeout.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Largest response body accepted from the API (10 MiB).
pub const MAX_RESPONSE_SIZE: usize = 10 * 1024 * 1024;
