//! Request/response transport.
//!
//! [`Transport`] is the seam between the delivery core and the network. The
//! dispatcher, delivery worker and guardrail cache only ever see this trait,
//! so tests can drive them with [`mock::ScriptedTransport`] instead of a live
//! server.

pub mod http;
pub mod mock;

pub use http::HttpTransport;
pub use mock::{RecordedCall, ScriptedTransport};
pub use reqwest::Method;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::RovnError;

/// A single request/response exchange with the Rovn API.
///
/// Implementations return the envelope's `data` payload on success and a
/// classified [`RovnError`] otherwise. That classification is what the
/// delivery worker's retry decision is based on.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one request.
    ///
    /// `path` starts with `/` and may carry an already-encoded query string.
    async fn send(&self, method: Method, path: &str, body: Option<&Value>)
    -> Result<Value, RovnError>;
}
