//! Delivery metrics using prometheus-client.
//!
//! Registered into a caller-supplied [`Registry`]; the crate never exposes an
//! endpoint of its own.

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

/// Labels for dropped-event counters.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct DropLabels {
    /// Drop reason: "queue_full", "queue_closed" or "rejected"
    pub reason: String,
}

/// Counters and gauges for the fire-and-forget queue.
#[derive(Debug, Clone)]
pub struct DeliveryMetrics {
    enqueued_total: Counter,
    delivered_total: Counter,
    dropped_total: Family<DropLabels, Counter>,
    retries_total: Counter,
    queue_depth: Gauge,
}

impl DeliveryMetrics {
    /// Create and register all delivery metrics.
    ///
    /// Counter names get the `_total` suffix from the OpenMetrics encoder.
    pub fn new(registry: &mut Registry) -> Self {
        let enqueued_total = Counter::default();
        registry.register(
            "rovn_events_enqueued",
            "Events accepted into the delivery queue",
            enqueued_total.clone(),
        );

        let delivered_total = Counter::default();
        registry.register(
            "rovn_events_delivered",
            "Events delivered by the background worker",
            delivered_total.clone(),
        );

        let dropped_total = Family::<DropLabels, Counter>::default();
        registry.register(
            "rovn_events_dropped",
            "Events dropped without delivery, by reason",
            dropped_total.clone(),
        );

        let retries_total = Counter::default();
        registry.register(
            "rovn_delivery_retries",
            "Delivery attempts that failed with a retryable error",
            retries_total.clone(),
        );

        let queue_depth = Gauge::default();
        registry.register(
            "rovn_queue_depth",
            "Events accepted but not yet delivered or dropped",
            queue_depth.clone(),
        );

        Self {
            enqueued_total,
            delivered_total,
            dropped_total,
            retries_total,
            queue_depth,
        }
    }

    pub(crate) fn record_enqueued(&self, depth: usize) {
        self.enqueued_total.inc();
        self.set_depth(depth);
    }

    pub(crate) fn record_delivered(&self, depth: usize) {
        self.delivered_total.inc();
        self.set_depth(depth);
    }

    pub(crate) fn record_retry(&self) {
        self.retries_total.inc();
    }

    pub(crate) fn record_dropped(&self, reason: &str, depth: usize) {
        self.dropped_total
            .get_or_create(&DropLabels {
                reason: reason.to_string(),
            })
            .inc();
        self.set_depth(depth);
    }

    pub(crate) fn record_depth(&self, depth: usize) {
        self.set_depth(depth);
    }

    fn set_depth(&self, depth: usize) {
        self.queue_depth
            .set(i64::try_from(depth).unwrap_or(i64::MAX));
    }

    /// Total events accepted into the queue.
    #[must_use]
    pub fn enqueued(&self) -> u64 {
        self.enqueued_total.get()
    }

    /// Total events delivered.
    #[must_use]
    pub fn delivered(&self) -> u64 {
        self.delivered_total.get()
    }

    /// Events dropped for `reason` (see [`super::DropReason::as_str`]).
    #[must_use]
    pub fn dropped(&self, reason: &str) -> u64 {
        self.dropped_total
            .get_or_create(&DropLabels {
                reason: reason.to_string(),
            })
            .get()
    }

    /// Total retryable failures.
    #[must_use]
    pub fn retries(&self) -> u64 {
        self.retries_total.get()
    }

    /// Current queue depth.
    #[must_use]
    pub fn queue_depth(&self) -> i64 {
        self.queue_depth.get()
    }
}
