//! HTTP transport backed by reqwest.
//!
//! # Response classification
//!
//! | Response | Result |
//! |----------|--------|
//! | 2xx, `success: true` | `Ok(data)` (`null` when absent) |
//! | 2xx, `success` not true | `RovnError::Api` (status 0) |
//! | 204 No Content | `Ok(null)` |
//! | 2xx, body not a JSON object | `RovnError::Protocol` |
//! | 429 | `RovnError::RateLimited` |
//! | 5xx | `RovnError::Server` |
//! | other non-2xx | `RovnError::Client` |
//! | no status obtained | `RovnError::Network` |
//!
//! Non-2xx errors take `error`/`code` from the JSON error body when present,
//! otherwise the message is synthesized as `Request failed: <METHOD> <path>`.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method, StatusCode};
use serde_json::{Map, Value};
use tracing::{debug, error, warn};

use super::Transport;
use crate::config::{ClientConfig, HttpConfig};
use crate::error::RovnError;

/// reqwest-based [`Transport`].
///
/// Cheap to clone; the underlying reqwest client pools connections.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
    /// Bearer token (NEVER log this value). `None` for unauthenticated calls.
    api_key: Option<String>,
    max_response_size: usize,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("max_response_size", &self.max_response_size)
            .finish()
    }
}

impl HttpTransport {
    /// Create an authenticated transport from a client configuration.
    ///
    /// # Errors
    ///
    /// Returns `RovnError::InvalidConfig` if the base URL is invalid or the
    /// HTTP client cannot be built.
    pub fn new(config: &ClientConfig) -> Result<Self, RovnError> {
        Self::build(
            &config.base_url,
            Some(config.api_key().to_string()),
            &config.http,
        )
    }

    /// Create a transport that sends no `Authorization` header.
    ///
    /// Only agent registration is served without a key.
    ///
    /// # Errors
    ///
    /// Same as [`HttpTransport::new`].
    pub fn anonymous(base_url: &str, http: &HttpConfig) -> Result<Self, RovnError> {
        Self::build(base_url, None, http)
    }

    fn build(base_url: &str, api_key: Option<String>, http: &HttpConfig) -> Result<Self, RovnError> {
        let base_url = base_url.trim_end_matches('/');
        if base_url.is_empty() {
            return Err(RovnError::InvalidConfig {
                details: "base_url must not be empty".to_string(),
            });
        }
        if let Err(e) = reqwest::Url::parse(base_url) {
            return Err(RovnError::InvalidConfig {
                details: format!("invalid base_url '{base_url}': {e}"),
            });
        }

        let client = Client::builder()
            .timeout(http.request_timeout)
            .connect_timeout(http.connect_timeout)
            .tcp_nodelay(true)
            .build()
            .map_err(|e| RovnError::InvalidConfig {
                details: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            base_url: base_url.to_string(),
            api_key,
            max_response_size: http.max_response_size,
        })
    }

    /// Base URL without trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[tracing::instrument(skip(self, body), fields(method = %method, path = %path))]
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, RovnError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, has_body = body.is_some(), "Sending request");

        let mut builder = self
            .client
            .request(method.clone(), &url)
            .header(CONTENT_TYPE, "application/json");
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| self.classify_error(e, &method, path))?;
        let status = response.status();

        if !status.is_success() {
            // The error body is informational only; a failed read must not hide the status.
            let bytes = read_capped(response, self.max_response_size, &method, path)
                .await
                .unwrap_or_default();
            let err = error_from_status(status.as_u16(), &bytes, &method, path);
            warn!(
                status = status.as_u16(),
                kind = err.kind().as_str(),
                error = %err,
                "Request rejected"
            );
            return Err(err);
        }

        if status == StatusCode::NO_CONTENT {
            return Ok(Value::Null);
        }

        let bytes = read_capped(response, self.max_response_size, &method, path).await?;
        let data = decode_envelope(&bytes, &method, path)?;
        debug!(status = status.as_u16(), "Request succeeded");
        Ok(data)
    }

    /// Classify a reqwest error (no HTTP status obtained).
    fn classify_error(&self, error: reqwest::Error, method: &Method, path: &str) -> RovnError {
        if error.is_timeout() {
            warn!(url = %self.base_url, "Request timed out");
        } else if error.is_connect() {
            warn!(url = %self.base_url, "Failed to connect");
        } else {
            error!(error = %error, "Request failed");
        }
        RovnError::Network {
            message: format!("Request failed: {method} {path}: {error}"),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, RovnError> {
        self.request(method, path, body).await
    }
}

/// Collect a response body, failing once it grows past `limit` bytes.
async fn read_capped(
    mut response: reqwest::Response,
    limit: usize,
    method: &Method,
    path: &str,
) -> Result<Vec<u8>, RovnError> {
    let too_large = |size: u64| RovnError::Protocol {
        details: format!("response to {method} {path} too large: {size} bytes, limit {limit}"),
    };

    let declared = response.content_length();
    if let Some(len) = declared.filter(|&len| len > limit as u64) {
        return Err(too_large(len));
    }

    let mut body = Vec::with_capacity(declared.map_or(0, |len| len as usize));
    while let Some(chunk) = response.chunk().await.map_err(|e| RovnError::Network {
        message: format!("Request failed: {method} {path}: {e}"),
    })? {
        if body.len() + chunk.len() > limit {
            return Err(too_large((body.len() + chunk.len()) as u64));
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

fn string_field(object: &Map<String, Value>, key: &str) -> Option<String> {
    object.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Decode a 2xx response envelope into its `data` payload.
fn decode_envelope(bytes: &[u8], method: &Method, path: &str) -> Result<Value, RovnError> {
    let body: Value = serde_json::from_slice(bytes).map_err(|e| RovnError::Protocol {
        details: format!("invalid response envelope from {method} {path}: {e}"),
    })?;
    let Value::Object(mut envelope) = body else {
        return Err(RovnError::Protocol {
            details: format!("response envelope from {method} {path} is not a JSON object"),
        });
    };

    if envelope.get("success").and_then(Value::as_bool) == Some(true) {
        return Ok(envelope.remove("data").unwrap_or(Value::Null));
    }

    Err(RovnError::Api {
        message: string_field(&envelope, "error")
            .unwrap_or_else(|| format!("Request failed: {method} {path}")),
        code: string_field(&envelope, "code"),
    })
}

/// Build the error for a non-2xx response.
fn error_from_status(status: u16, bytes: &[u8], method: &Method, path: &str) -> RovnError {
    let body = match serde_json::from_slice::<Value>(bytes) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    };
    let message = body
        .as_ref()
        .and_then(|b| string_field(b, "error"))
        .unwrap_or_else(|| format!("Request failed: {method} {path}"));
    let code = body.as_ref().and_then(|b| string_field(b, "code"));
    RovnError::from_status(status, message, code)
}
