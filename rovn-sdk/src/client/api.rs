//! Read and control-plane calls.
//!
//! These always go straight to the transport: they are never batched or
//! queued, whatever the delivery mode.

use std::sync::Arc;

use reqwest::Method;
use serde_json::{Map, Value, json};

use super::RovnClient;
use crate::error::RovnError;
use crate::event::Urgency;
use crate::guardrail::GuardrailSnapshot;
use crate::types::{
    self, Approval, CheckResult, Constraint, Guardrail, PeerMessage, ReportCard, Task, TrustScore,
};

/// Placeholder origin used only to run `application/x-www-form-urlencoded`
/// serialization through [`reqwest::Url`].
const QUERY_ORIGIN: &str = "http://query.invalid/";

/// Filters for [`RovnClient::get_tasks`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskQuery {
    pub status: Option<String>,
    pub limit: Option<u32>,
}

/// Which side of a peer conversation to list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerDirection {
    Inbox,
    Outbox,
    All,
}

impl PeerDirection {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inbox => "inbox",
            Self::Outbox => "outbox",
            Self::All => "all",
        }
    }
}

/// Filters for [`RovnClient::get_peer_messages`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerMessageQuery {
    pub direction: Option<PeerDirection>,
    pub limit: Option<u32>,
}

/// Filters for [`RovnClient::get_approvals`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApprovalQuery {
    pub status: Option<String>,
    pub limit: Option<u32>,
}

/// A pre-flight check for [`RovnClient::check_action`].
#[derive(Debug, Clone, PartialEq)]
pub struct ActionCheck {
    pub action: String,
    pub urgency: Option<Urgency>,
    pub cost: Option<f64>,
    pub data_fields: Vec<String>,
}

impl ActionCheck {
    #[must_use]
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            urgency: None,
            cost: None,
            data_fields: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_urgency(mut self, urgency: Urgency) -> Self {
        self.urgency = Some(urgency);
        self
    }

    #[must_use]
    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = Some(cost);
        self
    }

    #[must_use]
    pub fn with_data_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.data_fields = fields.into_iter().map(Into::into).collect();
        self
    }
}

impl RovnClient {
    async fn get(&self, path: &str) -> Result<Value, RovnError> {
        self.transport.send(Method::GET, path, None).await
    }

    fn agent_path(&self, suffix: &str) -> Result<String, RovnError> {
        let agent_id = self.require_agent_id()?;
        Ok(format!("/api/agents/{agent_id}{suffix}"))
    }

    /// List tasks assigned to the agent.
    ///
    /// # Errors
    ///
    /// `RovnError::MissingAgentId`, the classified transport error, or a
    /// decode error.
    pub async fn get_tasks(&self, query: &TaskQuery) -> Result<Vec<Task>, RovnError> {
        let mut params = Vec::new();
        push_opt(&mut params, "status", query.status.clone());
        push_limit(&mut params, query.limit);
        let path = with_query(&self.agent_path("/tasks")?, &params)?;
        types::decode(self.get(&path).await?)
    }

    /// List messages exchanged with other agents.
    ///
    /// # Errors
    ///
    /// `RovnError::MissingAgentId`, the classified transport error, or a
    /// decode error.
    pub async fn get_peer_messages(
        &self,
        query: &PeerMessageQuery,
    ) -> Result<Vec<PeerMessage>, RovnError> {
        let mut params = Vec::new();
        push_opt(&mut params, "direction", query.direction.map(|d| d.as_str().to_string()));
        push_limit(&mut params, query.limit);
        let path = with_query(&self.agent_path("/peer")?, &params)?;
        types::decode(self.get(&path).await?)
    }

    // ========================================================================
    // Guardrails
    // ========================================================================

    /// Fetch the agent's guardrails and refresh the cache with them.
    ///
    /// # Errors
    ///
    /// `RovnError::MissingAgentId`, the classified transport error, or a
    /// decode error. The cache is left untouched on error.
    pub async fn get_guardrails(&self) -> Result<Vec<Guardrail>, RovnError> {
        let agent_id = self.require_agent_id()?;
        let guardrails = self.fetch_guardrails(&agent_id).await?;
        self.guardrails.store(guardrails.clone());
        Ok(guardrails)
    }

    /// Remaining allowance for `metric` (`limit_value - current_value`).
    ///
    /// Answers from the cache while it is fresh; otherwise performs one
    /// fetch. `None` means no guardrail exists for the metric.
    ///
    /// # Errors
    ///
    /// `RovnError::MissingAgentId`, or the refresh error when the cache was
    /// stale.
    pub async fn guardrail_remaining(&self, metric: &str) -> Result<Option<i64>, RovnError> {
        let agent_id = self.require_agent_id()?;
        self.guardrails
            .remaining(metric, || self.fetch_guardrails(&agent_id))
            .await
    }

    /// The cached guardrail snapshot regardless of age, if any.
    #[must_use]
    pub fn cached_guardrails(&self) -> Option<Arc<GuardrailSnapshot>> {
        self.guardrails.snapshot()
    }

    async fn fetch_guardrails(&self, agent_id: &str) -> Result<Vec<Guardrail>, RovnError> {
        let data = self
            .get(&format!("/api/agents/{agent_id}/guardrails"))
            .await?;
        types::decode(data)
    }

    // ========================================================================
    // Constraints
    // ========================================================================

    /// Declare self-imposed limits for a task.
    ///
    /// # Errors
    ///
    /// `RovnError::MissingAgentId`, the classified transport error, or a
    /// decode error.
    pub async fn declare_constraint(
        &self,
        task: &str,
        constraints: Map<String, Value>,
    ) -> Result<Constraint, RovnError> {
        let path = self.agent_path("/constraints")?;
        let body = json!({ "task": task, "constraints": constraints });
        types::decode(self.transport.send(Method::POST, &path, Some(&body)).await?)
    }

    /// Report actual usage against a declared constraint.
    ///
    /// Returns the raw response data.
    ///
    /// # Errors
    ///
    /// `RovnError::MissingAgentId` or the classified transport error.
    pub async fn update_constraint(
        &self,
        constraint_id: &str,
        actual_usage: Map<String, Value>,
        completed: bool,
    ) -> Result<Value, RovnError> {
        let path = self.agent_path("/constraints")?;
        let body = json!({
            "constraint_id": constraint_id,
            "actual_usage": actual_usage,
            "completed": completed,
        });
        self.transport.send(Method::PATCH, &path, Some(&body)).await
    }

    /// List the agent's declared constraints.
    ///
    /// # Errors
    ///
    /// `RovnError::MissingAgentId`, the classified transport error, or a
    /// decode error.
    pub async fn get_constraints(&self) -> Result<Vec<Constraint>, RovnError> {
        let path = self.agent_path("/constraints")?;
        types::decode(self.get(&path).await?)
    }

    // ========================================================================
    // Trust and approvals
    // ========================================================================

    /// # Errors
    ///
    /// `RovnError::MissingAgentId`, the classified transport error, or a
    /// decode error.
    pub async fn get_trust_score(&self) -> Result<TrustScore, RovnError> {
        let path = self.agent_path("/trust-score")?;
        types::decode(self.get(&path).await?)
    }

    /// List approvals visible to the API key.
    ///
    /// Accepts both a bare list and an `{"approvals": [...]}` wrapper.
    ///
    /// # Errors
    ///
    /// The classified transport error or a decode error.
    pub async fn get_approvals(&self, query: &ApprovalQuery) -> Result<Vec<Approval>, RovnError> {
        let mut params = Vec::new();
        push_opt(&mut params, "status", query.status.clone());
        push_limit(&mut params, query.limit);
        let path = with_query("/api/approvals", &params)?;

        let data = match self.get(&path).await? {
            Value::Object(mut map) if map.contains_key("approvals") => {
                map.remove("approvals").unwrap_or(Value::Null)
            }
            other => other,
        };
        types::decode(data)
    }

    /// Fetch one approval, e.g. to poll for a decision.
    ///
    /// # Errors
    ///
    /// The classified transport error or a decode error.
    pub async fn poll_approval(&self, approval_id: &str) -> Result<Approval, RovnError> {
        types::decode(self.get(&format!("/api/approvals/{approval_id}")).await?)
    }

    // ========================================================================
    // Pre-flight and reporting
    // ========================================================================

    /// Ask whether an action would be allowed before attempting it.
    ///
    /// # Errors
    ///
    /// `RovnError::MissingAgentId`, the classified transport error, or a
    /// decode error.
    pub async fn check_action(&self, check: &ActionCheck) -> Result<CheckResult, RovnError> {
        let mut params = vec![("action", check.action.clone())];
        push_opt(&mut params, "urgency", check.urgency.map(|u| u.as_str().to_string()));
        push_opt(&mut params, "cost", check.cost.map(|c| c.to_string()));
        if !check.data_fields.is_empty() {
            params.push(("data_fields", check.data_fields.join(",")));
        }
        let path = with_query(&self.agent_path("/check")?, &params)?;
        types::decode(self.get(&path).await?)
    }

    /// Performance report over the last `days` days (server default when
    /// `None`).
    ///
    /// # Errors
    ///
    /// `RovnError::MissingAgentId`, the classified transport error, or a
    /// decode error.
    pub async fn get_report_card(&self, days: Option<u32>) -> Result<ReportCard, RovnError> {
        let mut params = Vec::new();
        push_opt(&mut params, "days", days.map(|d| d.to_string()));
        let path = with_query(&self.agent_path("/report-card")?, &params)?;
        types::decode(self.get(&path).await?)
    }
}

fn push_opt(params: &mut Vec<(&'static str, String)>, key: &'static str, value: Option<String>) {
    if let Some(value) = value {
        params.push((key, value));
    }
}

/// A zero limit means "server default" and is omitted.
fn push_limit(params: &mut Vec<(&'static str, String)>, limit: Option<u32>) {
    push_opt(params, "limit", limit.filter(|&l| l > 0).map(|l| l.to_string()));
}

/// Append form-encoded query parameters to `path`.
fn with_query(path: &str, params: &[(&'static str, String)]) -> Result<String, RovnError> {
    if params.is_empty() {
        return Ok(path.to_string());
    }
    let mut url = reqwest::Url::parse(QUERY_ORIGIN).map_err(|e| RovnError::InvalidConfig {
        details: format!("failed to build query string: {e}"),
    })?;
    url.query_pairs_mut()
        .extend_pairs(params.iter().map(|(k, v)| (*k, v.as_str())));
    Ok(format!("{path}?{}", url.query().unwrap_or_default()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::transport::{ScriptedTransport, Transport};

    fn client(transport: &Arc<ScriptedTransport>, agent_id: Option<&str>) -> RovnClient {
        let mut config = ClientConfig::new("http://rovn.test", "k");
        if let Some(id) = agent_id {
            config = config.with_agent_id(id);
        }
        RovnClient::builder(config)
            .with_transport(Arc::clone(transport) as Arc<dyn Transport>)
            .build()
            .unwrap()
    }

    fn paths(transport: &ScriptedTransport) -> Vec<String> {
        transport.calls().into_iter().map(|c| c.path).collect()
    }

    #[test]
    fn test_with_query_encoding() {
        assert_eq!(with_query("/p", &[]).unwrap(), "/p");
        assert_eq!(
            with_query(
                "/p",
                &[("action", "send email".to_string()), ("f", "a,b&c".to_string())]
            )
            .unwrap(),
            "/p?action=send+email&f=a%2Cb%26c"
        );
    }

    #[tokio::test]
    async fn test_agent_scoped_calls_require_agent_id() {
        let transport = Arc::new(ScriptedTransport::new());
        let client = client(&transport, None);

        assert!(matches!(
            client.get_tasks(&TaskQuery::default()).await,
            Err(RovnError::MissingAgentId)
        ));
        assert!(matches!(
            client.guardrail_remaining("tokens").await,
            Err(RovnError::MissingAgentId)
        ));
        assert!(matches!(
            client.check_action(&ActionCheck::new("x")).await,
            Err(RovnError::MissingAgentId)
        ));
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn test_query_paths() {
        let transport = Arc::new(ScriptedTransport::with_script([
            Ok(json!([])),
            Ok(json!([])),
            Ok(json!({"allowed": true})),
            Ok(json!({})),
        ]));
        let client = client(&transport, Some("a1"));

        client
            .get_tasks(&TaskQuery {
                status: Some("pending".to_string()),
                limit: Some(0),
            })
            .await
            .unwrap();
        client
            .get_peer_messages(&PeerMessageQuery {
                direction: Some(PeerDirection::Inbox),
                limit: Some(5),
            })
            .await
            .unwrap();
        let result = client
            .check_action(
                &ActionCheck::new("send email")
                    .with_urgency(Urgency::High)
                    .with_cost(2.5)
                    .with_data_fields(["email", "name"]),
            )
            .await
            .unwrap();
        assert!(result.allowed);
        client.get_report_card(Some(7)).await.unwrap();

        assert_eq!(
            paths(&transport),
            vec![
                "/api/agents/a1/tasks?status=pending",
                "/api/agents/a1/peer?direction=inbox&limit=5",
                "/api/agents/a1/check?action=send+email&urgency=high&cost=2.5&data_fields=email%2Cname",
                "/api/agents/a1/report-card?days=7",
            ]
        );
    }

    #[tokio::test]
    async fn test_get_approvals_accepts_wrapper_and_list() {
        let approval = json!({"id": "ap-1", "type": "deploy", "title": "Ship", "status": "approved"});
        let transport = Arc::new(ScriptedTransport::with_script([
            Ok(json!({ "approvals": [approval.clone()] })),
            Ok(json!([approval])),
        ]));
        let client = client(&transport, None);

        let wrapped = client
            .get_approvals(&ApprovalQuery {
                status: Some("approved".to_string()),
                limit: Some(10),
            })
            .await
            .unwrap();
        let bare = client.get_approvals(&ApprovalQuery::default()).await.unwrap();

        assert_eq!(wrapped, bare);
        assert_eq!(wrapped[0].approval_type, "deploy");
        assert_eq!(
            paths(&transport),
            vec!["/api/approvals?status=approved&limit=10", "/api/approvals"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_guardrail_remaining_uses_cache() {
        let guardrails = json!([
            {"metric": "tokens", "limit_value": 1000, "current_value": 250},
        ]);
        let transport = Arc::new(ScriptedTransport::with_script([
            Ok(guardrails.clone()),
            Ok(guardrails),
        ]));
        let client = client(&transport, Some("a1"));

        assert_eq!(client.guardrail_remaining("tokens").await.unwrap(), Some(750));
        assert_eq!(client.guardrail_remaining("unknown").await.unwrap(), None);
        assert_eq!(transport.call_count(), 1);

        tokio::time::advance(client.config().guardrail_ttl).await;
        assert_eq!(client.guardrail_remaining("tokens").await.unwrap(), Some(750));
        assert_eq!(transport.call_count(), 2);
        assert_eq!(paths(&transport)[0], "/api/agents/a1/guardrails");
    }

    #[tokio::test]
    async fn test_get_guardrails_refreshes_cache() {
        let transport = Arc::new(ScriptedTransport::with_script([Ok(json!([
            {"metric": "cost", "limit_value": 50, "current_value": 60},
        ]))]));
        let client = client(&transport, Some("a1"));
        assert!(client.cached_guardrails().is_none());

        let guardrails = client.get_guardrails().await.unwrap();
        assert_eq!(guardrails[0].remaining(), -10);
        assert_eq!(client.guardrail_remaining("cost").await.unwrap(), Some(-10));
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn test_constraint_calls() {
        let transport = Arc::new(ScriptedTransport::with_script([
            Ok(json!({"id": "c-1", "task": "crawl", "constraints": {"max_pages": 10}})),
            Ok(json!({"compliance": "compliant"})),
        ]));
        let client = client(&transport, Some("a1"));

        let mut limits = Map::new();
        limits.insert("max_pages".to_string(), json!(10));
        let constraint = client.declare_constraint("crawl", limits).await.unwrap();
        assert_eq!(constraint.id, "c-1");
        assert_eq!(constraint.compliance, "pending");

        let mut usage = Map::new();
        usage.insert("max_pages".to_string(), json!(8));
        let data = client.update_constraint("c-1", usage, true).await.unwrap();
        assert_eq!(data["compliance"], "compliant");

        let calls = transport.calls();
        assert_eq!(calls[1].method, Method::PATCH);
        assert_eq!(
            calls[1].body,
            Some(json!({"constraint_id": "c-1", "actual_usage": {"max_pages": 8}, "completed": true}))
        );
    }
}
