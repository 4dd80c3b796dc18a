//! Typed records returned by the Rovn API.
//!
//! Field defaults mirror what the server omits for optional fields, so a
//! minimal record (only the required identifiers) still decodes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::RovnError;

/// Decode an API `data` payload into a typed record.
///
/// # Errors
///
/// Returns `RovnError::Protocol` naming the target type if the payload does
/// not match.
pub fn decode<T: serde::de::DeserializeOwned>(data: Value) -> Result<T, RovnError> {
    serde_json::from_value(data).map_err(|e| RovnError::Protocol {
        details: format!("failed to decode {}: {e}", std::any::type_name::<T>()),
    })
}

fn default_active() -> String {
    "active".to_string()
}

fn default_general() -> String {
    "general".to_string()
}

fn default_pending() -> String {
    "pending".to_string()
}

fn default_medium() -> String {
    "medium".to_string()
}

fn default_text() -> String {
    "text".to_string()
}

fn default_daily() -> String {
    "daily".to_string()
}

fn default_block() -> String {
    "block".to_string()
}

fn default_grade() -> String {
    "F".to_string()
}

fn default_true() -> bool {
    true
}

/// Agent information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_active")]
    pub status: String,
    #[serde(rename = "type", default = "default_general")]
    pub agent_type: String,
    #[serde(default)]
    pub approved: bool,
    #[serde(default)]
    pub capabilities: Option<Vec<String>>,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
    #[serde(default)]
    pub last_seen_at: Option<String>,
}

/// Credentials returned by agent registration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RegisteredAgent {
    pub id: String,
    pub api_key: String,
}

/// Registration request for a new agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AgentRegistration {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl AgentRegistration {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// A task assigned to the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub agent_id: String,
    pub owner_id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_pending")]
    pub status: String,
    #[serde(default = "default_medium")]
    pub priority: String,
    #[serde(default)]
    pub result: Option<Map<String, Value>>,
    #[serde(default)]
    pub scheduled_at: Option<String>,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub completed_at: Option<String>,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

/// A message between two agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerMessage {
    pub id: String,
    pub from_agent_id: String,
    pub to_agent_id: String,
    pub content: String,
    #[serde(default = "default_text")]
    pub message_type: String,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
    #[serde(default)]
    pub read_at: Option<String>,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub from_agent_name: Option<String>,
    #[serde(default)]
    pub to_agent_name: Option<String>,
}

/// A server-defined usage limit with its current counter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Guardrail {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub agent_id: String,
    #[serde(default)]
    pub owner_id: String,
    pub metric: String,
    pub limit_value: i64,
    #[serde(default)]
    pub current_value: i64,
    #[serde(default = "default_daily")]
    pub window: String,
    #[serde(default = "default_block")]
    pub action: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

impl Guardrail {
    /// Units left before the limit is reached (may be negative).
    #[must_use]
    pub fn remaining(&self) -> i64 {
        self.limit_value.saturating_sub(self.current_value)
    }
}

/// A self-constraint declared for a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    pub id: String,
    #[serde(default)]
    pub agent_id: String,
    #[serde(default)]
    pub task: String,
    #[serde(default)]
    pub constraints: Map<String, Value>,
    #[serde(default)]
    pub actual_usage: Option<Map<String, Value>>,
    #[serde(default = "default_pending")]
    pub compliance: String,
    #[serde(default)]
    pub started_at: String,
    #[serde(default)]
    pub completed_at: Option<String>,
}

/// An approval request as stored by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Approval {
    pub id: String,
    #[serde(default)]
    pub agent_id: String,
    #[serde(rename = "type", default)]
    pub approval_type: String,
    #[serde(default)]
    pub title: String,
    #[serde(default = "default_pending")]
    pub status: String,
    #[serde(default = "default_medium")]
    pub urgency: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub decided_at: Option<String>,
    #[serde(default)]
    pub decided_by: Option<String>,
    #[serde(default)]
    pub decision_note: Option<String>,
    #[serde(default)]
    pub created_at: String,
}

/// Computed trust score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustScore {
    #[serde(default)]
    pub agent_id: String,
    #[serde(default)]
    pub score: i64,
    #[serde(default = "default_grade")]
    pub grade: String,
    #[serde(default)]
    pub breakdown: Map<String, Value>,
    #[serde(default)]
    pub computed_at: String,
}

/// Outcome of a pre-flight action check.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub allowed: bool,
    #[serde(default)]
    pub needs_approval: bool,
    #[serde(default)]
    pub would_auto_approve: bool,
    #[serde(default)]
    pub checks: Vec<Map<String, Value>>,
    #[serde(default)]
    pub summary: String,
}

/// Agent performance report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportCard {
    #[serde(default)]
    pub agent: Map<String, Value>,
    #[serde(default)]
    pub period: String,
    #[serde(default)]
    pub productivity: Map<String, Value>,
    #[serde(default)]
    pub reliability: Map<String, Value>,
    #[serde(default)]
    pub compliance: Map<String, Value>,
    #[serde(default)]
    pub trust: Map<String, Value>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_agent_info_minimal() {
        let info: AgentInfo = decode(json!({"id": "a1", "name": "Bot"})).unwrap();
        assert_eq!(info.status, "active");
        assert_eq!(info.agent_type, "general");
        assert!(!info.approved);
        assert!(info.capabilities.is_none());
        assert_eq!(info.created_at, "");
    }

    #[test]
    fn test_agent_info_full() {
        let info: AgentInfo = decode(json!({
            "id": "a1",
            "name": "Bot",
            "description": "does things",
            "status": "busy",
            "type": "coding",
            "approved": true,
            "capabilities": ["read", "write"],
            "metadata": {"team": "core"},
            "created_at": "2026-01-01T00:00:00Z",
            "updated_at": "2026-01-02T00:00:00Z",
            "last_seen_at": "2026-01-03T00:00:00Z"
        }))
        .unwrap();
        assert_eq!(info.agent_type, "coding");
        assert!(info.approved);
        assert_eq!(info.capabilities, Some(vec!["read".into(), "write".into()]));
        assert_eq!(info.last_seen_at.as_deref(), Some("2026-01-03T00:00:00Z"));
    }

    #[test]
    fn test_guardrail_defaults_and_remaining() {
        let guardrail: Guardrail = decode(json!({
            "metric": "tokens",
            "limit_value": 1000,
            "current_value": 250
        }))
        .unwrap();
        assert_eq!(guardrail.window, "daily");
        assert_eq!(guardrail.action, "block");
        assert!(guardrail.enabled);
        assert_eq!(guardrail.remaining(), 750);
    }

    #[test]
    fn test_guardrail_remaining_saturates() {
        let guardrail: Guardrail = decode(json!({
            "metric": "cost",
            "limit_value": i64::MIN,
            "current_value": i64::MAX
        }))
        .unwrap();
        assert_eq!(guardrail.remaining(), i64::MIN);

        let guardrail: Guardrail = decode(json!({
            "metric": "cost",
            "limit_value": i64::MAX,
            "current_value": -1
        }))
        .unwrap();
        assert_eq!(guardrail.remaining(), i64::MAX);
    }

    #[test]
    fn test_task_minimal() {
        let task: Task = decode(json!({
            "id": "t1", "agent_id": "a1", "owner_id": "o1", "title": "Write report"
        }))
        .unwrap();
        assert_eq!(task.status, "pending");
        assert_eq!(task.priority, "medium");
        assert!(task.result.is_none());
    }

    #[test]
    fn test_peer_message_minimal() {
        let message: PeerMessage = decode(json!({
            "id": "m1", "from_agent_id": "a1", "to_agent_id": "a2", "content": "hello"
        }))
        .unwrap();
        assert_eq!(message.message_type, "text");
        assert!(message.read_at.is_none());
    }

    #[test]
    fn test_check_result_defaults() {
        let check: CheckResult = decode(json!({"allowed": true})).unwrap();
        assert!(check.allowed);
        assert!(!check.needs_approval);
        assert!(check.checks.is_empty());
    }

    #[test]
    fn test_decode_error_names_type() {
        let result: Result<Task, _> = decode(json!({"id": "t1"}));
        match result {
            Err(RovnError::Protocol { details }) => assert!(details.contains("Task")),
            other => panic!("Expected Protocol error, got: {other:?}"),
        }
    }

    #[test]
    fn test_registration_skips_unset_fields() {
        let registration = AgentRegistration::new("scout");
        assert_eq!(serde_json::to_value(&registration).unwrap(), json!({"name": "scout"}));
    }
}
