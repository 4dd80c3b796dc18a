//! Outbound webhook events.
//!
//! An [`Event`] is an immutable `(kind, payload)` pair. It is created per
//! call and handed off by value: caller → batch buffer or queue → worker.
//! On the wire it becomes `{"event": <kind>, "data": <payload>}` posted to
//! `/api/webhook/agent`.
//!
//! The payload structs in this module ([`Activity`], [`TaskUpdate`], ...)
//! build the payloads the server expects for each kind. Optional fields are
//! omitted from the payload when unset.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::RovnError;

/// Webhook path all events are posted to.
pub const WEBHOOK_PATH: &str = "/api/webhook/agent";

/// Event kinds accepted by the webhook endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Activity,
    TaskUpdate,
    Message,
    Status,
    ShareData,
    CommandResponse,
    ApprovalRequest,
    PeerMessage,
}

impl EventKind {
    /// Wire name of the kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Activity => "activity",
            Self::TaskUpdate => "task_update",
            Self::Message => "message",
            Self::Status => "status",
            Self::ShareData => "share_data",
            Self::CommandResponse => "command_response",
            Self::ApprovalRequest => "approval_request",
            Self::PeerMessage => "peer_message",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable outbound event.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    kind: EventKind,
    payload: Map<String, Value>,
}

impl Event {
    /// Create an event from a kind and an ordered payload object.
    #[must_use]
    pub fn new(kind: EventKind, payload: Map<String, Value>) -> Self {
        Self { kind, payload }
    }

    /// Create an event from any serializable payload struct.
    ///
    /// # Errors
    ///
    /// Returns `RovnError::Protocol` if the payload does not serialize to a
    /// JSON object.
    pub fn from_payload<T: Serialize>(kind: EventKind, payload: &T) -> Result<Self, RovnError> {
        match serde_json::to_value(payload) {
            Ok(Value::Object(map)) => Ok(Self::new(kind, map)),
            Ok(other) => Err(RovnError::Protocol {
                details: format!("{kind} payload must be a JSON object, got {other}"),
            }),
            Err(e) => Err(RovnError::Protocol {
                details: format!("failed to serialize {kind} payload: {e}"),
            }),
        }
    }

    #[must_use]
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    #[must_use]
    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    /// Webhook request body: `{"event": <kind>, "data": <payload>}`.
    #[must_use]
    pub fn to_body(&self) -> Value {
        let mut body = Map::with_capacity(2);
        body.insert("event".to_string(), Value::from(self.kind.as_str()));
        body.insert("data".to_string(), Value::Object(self.payload.clone()));
        Value::Object(body)
    }
}

// ============================================================================
// Payloads
// ============================================================================

/// Agent presence status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Active,
    Idle,
    Busy,
    Offline,
    Error,
}

/// Urgency attached to approval requests and pre-flight checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Low,
    Medium,
    High,
    Critical,
}

impl Urgency {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

/// `activity` payload: a log line in the agent's activity feed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Activity {
    pub title: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub activity_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl Activity {
    #[must_use]
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_type(mut self, activity_type: impl Into<String>) -> Self {
        self.activity_type = Some(activity_type.into());
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// `task_update` payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskUpdate {
    pub task_id: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Map<String, Value>>,
}

/// `message` payload: a message to the agent's owner.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Message {
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl Message {
    #[must_use]
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_type(mut self, message_type: impl Into<String>) -> Self {
        self.message_type = Some(message_type.into());
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// `share_data` payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SharedData {
    pub title: String,
    pub content: Map<String, Value>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
}

/// `command_response` payload, answering a `command` stream event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandResponse {
    pub command_id: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<Map<String, Value>>,
}

/// `approval_request` payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ApprovalRequest {
    #[serde(rename = "type")]
    pub request_type: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub urgency: Option<Urgency>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl ApprovalRequest {
    #[must_use]
    pub fn new(request_type: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            request_type: request_type.into(),
            title: title.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn with_urgency(mut self, urgency: Urgency) -> Self {
        self.urgency = Some(urgency);
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// `peer_message` payload: a message to another agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeerMessageDraft {
    pub to_agent_id: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl PeerMessageDraft {
    #[must_use]
    pub fn new(to_agent_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            to_agent_id: to_agent_id.into(),
            content: content.into(),
            message_type: None,
            metadata: None,
        }
    }
}
