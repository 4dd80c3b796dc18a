//! The Rovn agent client.
//!
//! [`RovnClient`] ties the components together: events go through the
//! [`Dispatcher`], queries through the [`Transport`], the guardrail cache and
//! the live stream are owned per instance.
//!
//! # Example
//!
//! ```no_run
//! use rovn_sdk::{Activity, ClientConfig, RovnClient};
//!
//! # async fn run() -> Result<(), rovn_sdk::RovnError> {
//! let client = RovnClient::new(
//!     ClientConfig::new("https://rovn.example.com", "rovn_...").fire_and_forget(),
//! )?;
//! client.get_info().await?;
//! client.log_activity(Activity::new("Started nightly sync")).await?;
//! client.close().await?;
//! # Ok(())
//! # }
//! ```

mod api;
mod events;

pub use api::{ActionCheck, ApprovalQuery, PeerDirection, PeerMessageQuery, TaskQuery};

use std::future::Future;
use std::sync::Arc;

use parking_lot::RwLock;
use reqwest::Method;
use tracing::{debug, info};

use crate::config::{ClientConfig, DeliveryMode, HttpConfig};
use crate::delivery::{CloseOutcome, DeliveryMetrics, DeliveryObserver, DropHook, DropReason};
use crate::dispatch::{Dispatcher, Route};
use crate::error::RovnError;
use crate::event::Event;
use crate::guardrail::GuardrailCache;
use crate::stream::{StreamClient, StreamHandler, StreamOptions, StreamState};
use crate::transport::{HttpTransport, Transport};
use crate::types::{self, AgentInfo, AgentRegistration, RegisteredAgent};

/// Builder for [`RovnClient`] with optional collaborators.
pub struct ClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
    drop_hook: Option<DropHook>,
    metrics: Option<Arc<DeliveryMetrics>>,
}

impl ClientBuilder {
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            transport: None,
            drop_hook: None,
            metrics: None,
        }
    }

    /// Use a custom transport instead of [`HttpTransport`].
    #[must_use]
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Observe events dropped by fire-and-forget delivery.
    #[must_use]
    pub fn with_drop_hook(
        mut self,
        hook: impl Fn(&Event, &DropReason) + Send + Sync + 'static,
    ) -> Self {
        self.drop_hook = Some(Arc::new(hook));
        self
    }

    /// Record delivery metrics.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<DeliveryMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Build the client. In fire-and-forget mode this spawns the delivery
    /// worker, so it must run inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `RovnError::InvalidConfig` if the configuration is invalid or
    /// fire-and-forget mode is requested outside a tokio runtime.
    pub fn build(self) -> Result<RovnClient, RovnError> {
        let config = self.config;
        config.validate()?;

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(&config)?),
        };
        let observer = DeliveryObserver::new(self.drop_hook, self.metrics);
        let dispatcher = Dispatcher::new(
            Arc::clone(&transport),
            config.mode,
            &config.delivery,
            observer,
        )?;
        let stream = StreamClient::new(&config)?;

        info!(
            base_url = %config.base_url,
            mode = ?config.mode,
            agent_id = ?config.agent_id,
            "Rovn client created"
        );

        Ok(RovnClient {
            transport,
            dispatcher,
            guardrails: GuardrailCache::new(config.guardrail_ttl),
            stream,
            agent_id: RwLock::new(config.agent_id.clone()),
            config,
        })
    }
}

/// Client for one Rovn agent.
pub struct RovnClient {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    dispatcher: Dispatcher,
    guardrails: GuardrailCache,
    stream: StreamClient,
    agent_id: RwLock<Option<String>>,
}

impl std::fmt::Debug for RovnClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RovnClient")
            .field("config", &self.config)
            .field("agent_id", &self.agent_id())
            .field("dispatcher", &self.dispatcher)
            .field("stream_state", &self.stream.state())
            .finish_non_exhaustive()
    }
}

impl RovnClient {
    /// Create a client with the default HTTP transport.
    ///
    /// # Errors
    ///
    /// See [`ClientBuilder::build`].
    pub fn new(config: ClientConfig) -> Result<Self, RovnError> {
        ClientBuilder::new(config).build()
    }

    /// Create a client configured from `ROVN_*` environment variables.
    ///
    /// # Errors
    ///
    /// See [`ClientConfig::from_env`] and [`ClientBuilder::build`].
    pub fn from_env() -> Result<Self, RovnError> {
        Self::new(ClientConfig::from_env()?)
    }

    #[must_use]
    pub fn builder(config: ClientConfig) -> ClientBuilder {
        ClientBuilder::new(config)
    }

    /// Register a new agent and return a client authenticated as it.
    ///
    /// Registration is the only unauthenticated call.
    ///
    /// # Errors
    ///
    /// Returns the classified transport error, or `RovnError::Protocol` if
    /// the response lacks the new agent's credentials.
    pub async fn register(
        base_url: &str,
        registration: &AgentRegistration,
        mode: DeliveryMode,
    ) -> Result<(Self, RegisteredAgent), RovnError> {
        let transport = HttpTransport::anonymous(base_url, &HttpConfig::default())?;
        let body = serde_json::to_value(registration).map_err(|e| RovnError::Protocol {
            details: format!("failed to serialize registration: {e}"),
        })?;
        let data = transport
            .send(Method::POST, "/api/agents/register", Some(&body))
            .await?;
        let registered: RegisteredAgent = types::decode(data)?;
        info!(agent_id = %registered.id, name = %registration.name, "Agent registered");

        let config = ClientConfig::new(base_url, registered.api_key.clone())
            .with_agent_id(registered.id.clone())
            .with_mode(mode);
        Ok((Self::new(config)?, registered))
    }

    /// The client's configuration.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Agent id, if known.
    #[must_use]
    pub fn agent_id(&self) -> Option<String> {
        self.agent_id.read().clone()
    }

    pub(crate) fn require_agent_id(&self) -> Result<String, RovnError> {
        self.agent_id().ok_or(RovnError::MissingAgentId)
    }

    fn set_agent_id(&self, agent_id: &str) {
        *self.agent_id.write() = Some(agent_id.to_string());
    }

    /// Fetch the agent's information.
    ///
    /// Without a known agent id this calls `GET /api/agents/me` and stores
    /// the discovered id.
    ///
    /// # Errors
    ///
    /// Returns the classified transport error or a decode error.
    pub async fn get_info(&self) -> Result<AgentInfo, RovnError> {
        let path = match self.agent_id() {
            Some(id) => format!("/api/agents/{id}"),
            None => "/api/agents/me".to_string(),
        };
        let info: AgentInfo = types::decode(self.transport.send(Method::GET, &path, None).await?)?;
        if self.agent_id().is_none() {
            debug!(agent_id = %info.id, "Discovered agent id");
            self.set_agent_id(&info.id);
        }
        Ok(info)
    }

    // ========================================================================
    // Delivery
    // ========================================================================

    /// Base delivery mode.
    #[must_use]
    pub fn mode(&self) -> DeliveryMode {
        self.dispatcher.mode()
    }

    /// Where an event dispatched now would go.
    #[must_use]
    pub fn route(&self) -> Route {
        self.dispatcher.route()
    }

    /// Fire-and-forget events not yet delivered or dropped.
    #[must_use]
    pub fn pending_events(&self) -> usize {
        self.dispatcher.pending()
    }

    /// Start buffering events. Prefer [`RovnClient::batch`].
    pub fn begin_batch(&self) {
        self.dispatcher.enter_batch();
    }

    /// Stop buffering and deliver the buffered events in order.
    ///
    /// # Errors
    ///
    /// In synchronous mode, the first failed send.
    pub async fn end_batch(&self) -> Result<(), RovnError> {
        self.dispatcher.exit_batch().await
    }

    /// Run `f` with batching active, then deliver everything it dispatched.
    ///
    /// The batch ends even if this future is dropped early. Events buffered
    /// up to that point are queued in fire-and-forget mode, or held for the
    /// next [`RovnClient::flush`] or [`RovnClient::close`] in synchronous mode.
    ///
    /// # Errors
    ///
    /// In synchronous mode, the first failed send of the batch. The value
    /// returned by `f` is discarded in that case.
    pub async fn batch<F, Fut, T>(&self, f: F) -> Result<T, RovnError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let scope = self.dispatcher.batch_scope();
        let value = f().await;
        scope.finish().await?;
        Ok(value)
    }

    /// Deliver buffered events now and wait for the delivery queue to drain.
    ///
    /// # Errors
    ///
    /// In synchronous mode, the first failed send of the buffered events.
    pub async fn flush(&self) -> Result<(), RovnError> {
        self.dispatcher.flush().await
    }

    /// Drain and stop delivery, then stop the live stream.
    ///
    /// Safe to call more than once.
    ///
    /// # Errors
    ///
    /// In synchronous mode, the first failed send of a pending batch. The
    /// stream is stopped either way.
    pub async fn close(&self) -> Result<CloseOutcome, RovnError> {
        let outcome = self.dispatcher.close().await;
        self.stream.disconnect().await;
        outcome
    }

    // ========================================================================
    // Live stream
    // ========================================================================

    /// Connect the live event stream on a background task.
    ///
    /// The agent id comes from `options.agent_id` (which also becomes the
    /// client's id), the known id, or self-discovery.
    ///
    /// # Errors
    ///
    /// Returns the self-discovery error, or `RovnError::InvalidConfig` when
    /// called outside a tokio runtime.
    pub async fn connect(
        &self,
        handler: impl StreamHandler,
        options: StreamOptions,
    ) -> Result<(), RovnError> {
        let agent_id = match &options.agent_id {
            Some(id) => {
                self.set_agent_id(id);
                id.clone()
            }
            None => match self.agent_id() {
                Some(id) => id,
                None => self.get_info().await?.id,
            },
        };
        self.stream.connect(&agent_id, handler, &options).await
    }

    /// Stop the live stream. Idempotent.
    pub async fn disconnect(&self) {
        self.stream.disconnect().await;
    }

    #[must_use]
    pub fn stream_state(&self) -> StreamState {
        self.stream.state()
    }

    /// Watch live stream state transitions.
    #[must_use]
    pub fn subscribe_stream_state(&self) -> tokio::sync::watch::Receiver<StreamState> {
        self.stream.subscribe()
    }

    /// Last committed stream event id.
    #[must_use]
    pub fn stream_cursor(&self) -> Option<String> {
        self.stream.cursor()
    }
}
