//! Rovn SDK: client library for agents reporting to Rovn Agent OS.
//!
//! The client posts agent events (activity, task updates, messages, approval
//! requests, ...) to the Rovn webhook, queries the agent's tasks, guardrails,
//! constraints and approvals, and follows the live command stream over
//! Server-Sent Events.
//!
//! Events are delivered either synchronously or fire-and-forget. In
//! fire-and-forget mode a single background worker drains a bounded queue
//! and retries retryable failures with capped exponential backoff; events
//! are dropped rather than blocking the caller. Any number of events can be
//! grouped with [`RovnClient::batch`].

pub mod batch;
pub mod client;
pub mod config;
pub mod delivery;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod guardrail;
pub mod stream;
pub mod transport;
pub mod types;

pub use client::{
    ActionCheck, ApprovalQuery, ClientBuilder, PeerDirection, PeerMessageQuery, RovnClient,
    TaskQuery,
};
pub use config::{ClientConfig, DeliveryConfig, DeliveryMode, HttpConfig, StreamConfig};
pub use delivery::{CloseOutcome, DeliveryMetrics, DropHook, DropReason};
pub use dispatch::Route;
pub use error::{ErrorKind, RovnError};
pub use event::{
    Activity, AgentStatus, ApprovalRequest, CommandResponse, Event, EventKind, Message,
    PeerMessageDraft, SharedData, TaskUpdate, Urgency,
};
pub use stream::{StreamEvent, StreamHandler, StreamOptions, StreamState};
pub use types::{
    AgentInfo, AgentRegistration, Approval, CheckResult, Constraint, Guardrail, PeerMessage,
    RegisteredAgent, ReportCard, Task, TrustScore,
};
