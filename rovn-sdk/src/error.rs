//! Error type shared by every Rovn client component.
//!
//! Every outcome of a request is classified once, in the transport, into a
//! [`RovnError`] variant. The classification carries the HTTP status (or 0
//! when no status was obtained) and decides whether the delivery worker
//! retries the event.
//!
//! ## Classification
//!
//! | Variant | Kind | `status()` | Retried by worker |
//! |---------|------|------------|-------------------|
//! | `Network` | NetworkFailure | 0 | yes |
//! | `Api` | ServerError | 0 | yes |
//! | `Server` | ServerError | 5xx | yes |
//! | `RateLimited` | RateLimited | 429 | yes |
//! | `Client` | ClientError | 4xx | no |
//! | `Protocol` | ProtocolError | 0 | no |
//! | `MissingAgentId` / `InvalidConfig` | Usage | 0 | no |

use thiserror::Error;

/// All errors returned by the Rovn client.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RovnError {
    /// No HTTP status was obtained: connection refused, DNS failure,
    /// timeout, or the body could not be read.
    #[error("{message}")]
    Network {
        /// Description of the underlying failure
        message: String,
    },

    /// The server answered 2xx but the envelope carried `success: false`.
    #[error("{message}")]
    Api {
        /// Server-supplied error message
        message: String,
        /// Server-supplied error code
        code: Option<String>,
    },

    /// The server answered with a 5xx status.
    #[error("{message} (HTTP {status})")]
    Server {
        /// HTTP status code
        status: u16,
        /// Server-supplied or synthesized message
        message: String,
        /// Server-supplied error code
        code: Option<String>,
    },

    /// The server answered 429 Too Many Requests.
    #[error("{message} (HTTP 429)")]
    RateLimited {
        /// Server-supplied or synthesized message
        message: String,
        /// Server-supplied error code
        code: Option<String>,
    },

    /// The server rejected the request with a non-retryable status.
    #[error("{message} (HTTP {status})")]
    Client {
        /// HTTP status code
        status: u16,
        /// Server-supplied or synthesized message
        message: String,
        /// Server-supplied error code
        code: Option<String>,
    },

    /// A payload could not be decoded (response envelope, stream event,
    /// typed record).
    #[error("Protocol error: {details}")]
    Protocol {
        /// What could not be decoded
        details: String,
    },

    /// An agent-scoped call was made before the agent id was known.
    #[error("agent_id is not set. Call get_info() first or provide agent_id during registration.")]
    MissingAgentId,

    /// Client configuration is invalid.
    #[error("Invalid configuration: {details}")]
    InvalidConfig {
        /// Description of the invalid setting
        details: String,
    },
}

/// Coarse error taxonomy used for retry decisions, logging and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No HTTP status obtained.
    NetworkFailure,
    /// 5xx, or an application-level `success: false`.
    ServerError,
    /// HTTP 429.
    RateLimited,
    /// Any other non-2xx status.
    ClientError,
    /// Malformed payload.
    ProtocolError,
    /// Caller or configuration mistake; never reached the server.
    Usage,
}

impl ErrorKind {
    /// Stable lowercase label for logs and metric labels.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NetworkFailure => "network_failure",
            Self::ServerError => "server_error",
            Self::RateLimited => "rate_limited",
            Self::ClientError => "client_error",
            Self::ProtocolError => "protocol_error",
            Self::Usage => "usage",
        }
    }
}

impl RovnError {
    /// Build the error for a non-2xx HTTP status.
    ///
    /// 429 becomes [`RovnError::RateLimited`], 5xx becomes
    /// [`RovnError::Server`], everything else [`RovnError::Client`].
    #[must_use]
    pub fn from_status(status: u16, message: impl Into<String>, code: Option<String>) -> Self {
        let message = message.into();
        match status {
            429 => Self::RateLimited { message, code },
            500.. => Self::Server {
                status,
                message,
                code,
            },
            _ => Self::Client {
                status,
                message,
                code,
            },
        }
    }

    /// HTTP status carried by the error, 0 when none was obtained.
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            Self::Server { status, .. } | Self::Client { status, .. } => *status,
            Self::RateLimited { .. } => 429,
            Self::Network { .. }
            | Self::Api { .. }
            | Self::Protocol { .. }
            | Self::MissingAgentId
            | Self::InvalidConfig { .. } => 0,
        }
    }

    /// Server-supplied error code, if any.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Api { code, .. }
            | Self::Server { code, .. }
            | Self::RateLimited { code, .. }
            | Self::Client { code, .. } => code.as_deref(),
            Self::MissingAgentId => Some("missing_agent_id"),
            Self::Network { .. } | Self::Protocol { .. } | Self::InvalidConfig { .. } => None,
        }
    }

    /// Taxonomy class of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network { .. } => ErrorKind::NetworkFailure,
            Self::Api { .. } | Self::Server { .. } => ErrorKind::ServerError,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::Client { .. } => ErrorKind::ClientError,
            Self::Protocol { .. } => ErrorKind::ProtocolError,
            Self::MissingAgentId | Self::InvalidConfig { .. } => ErrorKind::Usage,
        }
    }

    /// Whether the delivery worker should retry the event that produced
    /// this error.
    ///
    /// Network failures, server errors (including `success: false`) and
    /// rate limiting are retried; every other classification is terminal.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::NetworkFailure | ErrorKind::ServerError | ErrorKind::RateLimited
        )
    }
}
