//! Fire-and-forget delivery.
//!
//! A [`worker::DeliveryWorker`] owns a bounded queue ([`queue::EventQueue`])
//! and a single consumer task that posts each event through the
//! [`crate::transport::Transport`], retrying retryable failures with a shared
//! capped exponential [`backoff::Backoff`].
//!
//! Delivery is at-most-once with best-effort retry. Events are dropped when
//! the queue is full, when the worker has stopped, or when the server rejects
//! them with a non-retryable status. Drops never reach the caller that
//! dispatched the event; they are observable through an optional [`DropHook`]
//! and [`metrics::DeliveryMetrics`].

pub mod backoff;
pub mod metrics;
pub(crate) mod queue;
pub(crate) mod worker;

use std::sync::Arc;

use crate::error::RovnError;
use crate::event::Event;

pub use backoff::Backoff;
pub use metrics::DeliveryMetrics;
pub use worker::CloseOutcome;

/// Why an event was dropped without being delivered.
#[derive(Debug, Clone, PartialEq)]
pub enum DropReason {
    /// The queue was at capacity when the event was dispatched.
    QueueFull,
    /// The worker stopped before the event was delivered.
    QueueClosed,
    /// The server answered with a non-retryable error.
    Rejected(RovnError),
}

impl DropReason {
    /// Stable label for logs and metrics.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::QueueFull => "queue_full",
            Self::QueueClosed => "queue_closed",
            Self::Rejected(_) => "rejected",
        }
    }
}

/// Callback invoked for every dropped event.
///
/// Runs on the dispatching task (queue drops) or the worker task (rejections),
/// so it must be cheap and must not block.
pub type DropHook = Arc<dyn Fn(&Event, &DropReason) + Send + Sync>;

/// Drop hook and metrics, shared by the queue producer and the worker.
#[derive(Clone, Default)]
pub(crate) struct DeliveryObserver {
    hook: Option<DropHook>,
    metrics: Option<Arc<DeliveryMetrics>>,
}

impl DeliveryObserver {
    pub(crate) fn new(hook: Option<DropHook>, metrics: Option<Arc<DeliveryMetrics>>) -> Self {
        Self { hook, metrics }
    }

    pub(crate) fn enqueued(&self, depth: usize) {
        if let Some(metrics) = &self.metrics {
            metrics.record_enqueued(depth);
        }
    }

    pub(crate) fn delivered(&self, depth: usize) {
        if let Some(metrics) = &self.metrics {
            metrics.record_delivered(depth);
        }
    }

    /// Nothing is outstanding any more.
    pub(crate) fn idle(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.record_depth(0);
        }
    }

    pub(crate) fn retried(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.record_retry();
        }
    }

    pub(crate) fn dropped(&self, event: &Event, reason: &DropReason, depth: usize) {
        if let Some(metrics) = &self.metrics {
            metrics.record_dropped(reason.as_str(), depth);
        }
        if let Some(hook) = &self.hook {
            hook(event, reason);
        }
    }
}

impl std::fmt::Debug for DeliveryObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryObserver")
            .field("hook", &self.hook.is_some())
            .field("metrics", &self.metrics.is_some())
            .finish()
    }
}
