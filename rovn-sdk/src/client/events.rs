//! Outbound event helpers.
//!
//! Every helper except [`RovnClient::request_approval`] goes through the
//! dispatcher, so it buffers inside a batch, enqueues in fire-and-forget mode
//! and sends immediately otherwise.

use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::debug;

use super::RovnClient;
use crate::error::RovnError;
use crate::event::{
    Activity, AgentStatus, ApprovalRequest, CommandResponse, Event, EventKind, Message,
    PeerMessageDraft, SharedData, TaskUpdate,
};

impl RovnClient {
    /// Dispatch a prebuilt event.
    ///
    /// Returns the response `data` only when the event was sent immediately.
    ///
    /// # Errors
    ///
    /// Only immediate sends fail.
    pub async fn send_event(&self, event: Event) -> Result<Option<Value>, RovnError> {
        self.dispatcher.dispatch(event).await
    }

    /// Append an entry to the agent's activity feed.
    ///
    /// # Errors
    ///
    /// Only immediate sends fail.
    pub async fn log_activity(&self, activity: Activity) -> Result<(), RovnError> {
        self.emit(EventKind::Activity, &activity).await
    }

    /// Report progress on an assigned task.
    ///
    /// # Errors
    ///
    /// Only immediate sends fail.
    pub async fn update_task_status(
        &self,
        task_id: &str,
        status: &str,
        result: Option<Map<String, Value>>,
    ) -> Result<(), RovnError> {
        let update = TaskUpdate {
            task_id: task_id.to_string(),
            status: status.to_string(),
            result,
        };
        self.emit(EventKind::TaskUpdate, &update).await
    }

    /// Send a message to the agent's owner.
    ///
    /// # Errors
    ///
    /// Only immediate sends fail.
    pub async fn send_message(&self, message: Message) -> Result<(), RovnError> {
        self.emit(EventKind::Message, &message).await
    }

    /// Update the agent's presence status.
    ///
    /// # Errors
    ///
    /// Only immediate sends fail.
    pub async fn update_status(&self, status: AgentStatus) -> Result<(), RovnError> {
        self.emit(EventKind::Status, &json!({ "status": status })).await
    }

    /// Share a structured document with the owner.
    ///
    /// # Errors
    ///
    /// Only immediate sends fail.
    pub async fn share_data(
        &self,
        title: &str,
        content: Map<String, Value>,
        data_type: Option<&str>,
    ) -> Result<(), RovnError> {
        let shared = SharedData {
            title: title.to_string(),
            content,
            data_type: data_type.map(str::to_string),
        };
        self.emit(EventKind::ShareData, &shared).await
    }

    /// Answer a command received over the live stream.
    ///
    /// # Errors
    ///
    /// Only immediate sends fail.
    pub async fn respond_to_command(
        &self,
        command_id: &str,
        status: &str,
        response: Option<Map<String, Value>>,
    ) -> Result<(), RovnError> {
        let reply = CommandResponse {
            command_id: command_id.to_string(),
            status: status.to_string(),
            response,
        };
        self.emit(EventKind::CommandResponse, &reply).await
    }

    /// Send a message to another agent.
    ///
    /// # Errors
    ///
    /// Only immediate sends fail.
    pub async fn send_peer_message(&self, draft: PeerMessageDraft) -> Result<(), RovnError> {
        self.emit(EventKind::PeerMessage, &draft).await
    }

    /// Ask the owner for approval and return the server-assigned approval id.
    ///
    /// Always sent immediately, even in fire-and-forget mode or inside a
    /// batch, because the id is only known once the server answers.
    ///
    /// # Errors
    ///
    /// Returns the classified transport error.
    pub async fn request_approval(
        &self,
        request: &ApprovalRequest,
    ) -> Result<Option<String>, RovnError> {
        let event = Event::from_payload(EventKind::ApprovalRequest, request)?;
        let data = self.dispatcher.send_now(&event).await?;
        let approval_id = data
            .get("approval_id")
            .and_then(Value::as_str)
            .map(str::to_string);
        debug!(approval_id = ?approval_id, title = %request.title, "Approval requested");
        Ok(approval_id)
    }

    async fn emit<T: Serialize>(&self, kind: EventKind, payload: &T) -> Result<(), RovnError> {
        let event = Event::from_payload(kind, payload)?;
        self.dispatcher.dispatch(event).await.map(|_| ())
    }
}
