//! Event dispatcher.
//!
//! Routes each event by precedence:
//!
//! 1. batch active: append to the [`BatchBuffer`], return `None`
//! 2. fire-and-forget: non-blocking enqueue for the delivery worker, return `None`
//! 3. otherwise: synchronous transport call, return the response `data`
//!
//! [`Dispatcher::send_now`] bypasses routing entirely. Approval requests use
//! it because the caller needs the server-assigned id immediately.

use std::sync::Arc;

use reqwest::Method;
use serde_json::Value;
use tracing::{debug, warn};

use crate::batch::BatchBuffer;
use crate::config::{DeliveryConfig, DeliveryMode};
use crate::delivery::worker::DeliveryWorker;
use crate::delivery::{CloseOutcome, DeliveryObserver};
use crate::error::RovnError;
use crate::event::{Event, WEBHOOK_PATH};
use crate::transport::Transport;

/// Where the next dispatched event would go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Appended to the batch buffer.
    Buffered,
    /// Queued for the delivery worker.
    Queued,
    /// Sent before `dispatch` returns.
    Immediate,
}

/// Routes events to the batch buffer, the delivery queue or the transport.
pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    mode: DeliveryMode,
    batch: BatchBuffer,
    worker: Option<DeliveryWorker>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("mode", &self.mode)
            .field("batch", &self.batch)
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Create a dispatcher, spawning the delivery worker in fire-and-forget
    /// mode.
    ///
    /// # Errors
    ///
    /// Returns `RovnError::InvalidConfig` if fire-and-forget mode is requested
    /// outside a tokio runtime.
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        mode: DeliveryMode,
        delivery: &DeliveryConfig,
        observer: DeliveryObserver,
    ) -> Result<Self, RovnError> {
        let worker = match mode {
            DeliveryMode::FireAndForget => Some(DeliveryWorker::spawn(
                Arc::clone(&transport),
                delivery,
                observer,
            )?),
            DeliveryMode::Synchronous => None,
        };
        Ok(Self {
            transport,
            mode,
            batch: BatchBuffer::new(),
            worker,
        })
    }

    /// Base delivery mode.
    #[must_use]
    pub fn mode(&self) -> DeliveryMode {
        self.mode
    }

    /// Effective route for an event dispatched now.
    #[must_use]
    pub fn route(&self) -> Route {
        if self.batch.is_active() {
            Route::Buffered
        } else if self.worker.is_some() {
            Route::Queued
        } else {
            Route::Immediate
        }
    }

    /// Events accepted by the queue but not yet delivered or dropped.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.worker.as_ref().map_or(0, DeliveryWorker::pending)
    }

    /// Dispatch an event according to the current route.
    ///
    /// Returns the response `data` only for immediate sends.
    ///
    /// # Errors
    ///
    /// Only immediate sends fail; buffered and queued events never do.
    pub async fn dispatch(&self, event: Event) -> Result<Option<Value>, RovnError> {
        let event = match self.batch.try_buffer(event) {
            Ok(()) => {
                debug!(buffered = self.batch.len(), "Event buffered");
                return Ok(None);
            }
            Err(event) => event,
        };
        self.deliver(event).await
    }

    /// Send an event synchronously regardless of mode or batching.
    ///
    /// # Errors
    ///
    /// Returns the classified transport error.
    pub async fn send_now(&self, event: &Event) -> Result<Value, RovnError> {
        self.transport
            .send(Method::POST, WEBHOOK_PATH, Some(&event.to_body()))
            .await
    }

    /// Start buffering events.
    pub fn enter_batch(&self) {
        self.batch.enter();
    }

    /// Start a batch that ends even if the caller's future is dropped.
    pub(crate) fn batch_scope(&self) -> BatchScope<'_> {
        self.enter_batch();
        BatchScope {
            dispatcher: self,
            armed: true,
        }
    }

    /// End a batch whose scope was dropped without finishing.
    ///
    /// Fire-and-forget: the events go to the queue. Synchronous: nothing can
    /// be sent from here, so they stay held for the next `flush` or `close`.
    fn abandon_batch(&self) {
        match &self.worker {
            Some(worker) => {
                let events = self.batch.exit();
                if !events.is_empty() {
                    debug!(count = events.len(), "Batch cancelled, queueing its events");
                }
                for event in events {
                    worker.enqueue(event);
                }
            }
            None => {
                let held = self.batch.suspend();
                if held > 0 {
                    warn!(held, "Batch cancelled, events held until the next flush or close");
                }
            }
        }
    }

    /// Stop buffering and deliver the buffered events in order with the base
    /// mode's terminal step.
    ///
    /// # Errors
    ///
    /// In synchronous mode every buffered event is attempted; the first
    /// failure is returned.
    pub async fn exit_batch(&self) -> Result<(), RovnError> {
        let events = self.batch.exit();
        self.deliver_all(events).await
    }

    /// Deliver buffered events now and, in fire-and-forget mode, wait until
    /// the queue has drained. An active batch stays active.
    ///
    /// # Errors
    ///
    /// Same as [`Dispatcher::exit_batch`].
    pub async fn flush(&self) -> Result<(), RovnError> {
        let result = self.deliver_all(self.batch.drain()).await;
        if let Some(worker) = &self.worker {
            worker.wait_idle().await;
        }
        result
    }

    /// Shut delivery down.
    ///
    /// Fire-and-forget: buffered events are moved into the queue, then the
    /// worker is drained and joined with the shutdown timeout. Synchronous:
    /// buffered events are sent. Calling `close` again is harmless.
    ///
    /// # Errors
    ///
    /// Synchronous mode returns the first failure among buffered events.
    pub async fn close(&self) -> Result<CloseOutcome, RovnError> {
        let buffered = self.batch.exit();
        match &self.worker {
            Some(worker) => {
                if !buffered.is_empty() {
                    debug!(count = buffered.len(), "Moving batch into delivery queue");
                }
                for event in buffered {
                    worker.enqueue(event);
                }
                Ok(worker.close().await)
            }
            None => {
                self.deliver_all(buffered).await?;
                Ok(CloseOutcome::Drained)
            }
        }
    }

    /// Terminal step of the base mode.
    async fn deliver(&self, event: Event) -> Result<Option<Value>, RovnError> {
        match &self.worker {
            Some(worker) => {
                worker.enqueue(event);
                Ok(None)
            }
            None => self.send_now(&event).await.map(Some),
        }
    }

    async fn deliver_all(&self, events: Vec<Event>) -> Result<(), RovnError> {
        if events.is_empty() {
            return Ok(());
        }
        debug!(count = events.len(), "Delivering batch");

        let mut first_error = None;
        for event in events {
            let kind = event.kind();
            if let Err(e) = self.deliver(event).await {
                warn!(kind = %kind, error = %e, "Batched event failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

/// An active batch tied to a [`Dispatcher`].
///
/// [`BatchScope::finish`] ends it normally. Dropping the scope first, for
/// instance when the enclosing future is cancelled, ends it anyway.
pub(crate) struct BatchScope<'a> {
    dispatcher: &'a Dispatcher,
    armed: bool,
}

impl BatchScope<'_> {
    /// Leave the batch and deliver its events.
    ///
    /// # Errors
    ///
    /// Same as [`Dispatcher::exit_batch`].
    pub(crate) async fn finish(mut self) -> Result<(), RovnError> {
        self.armed = false;
        self.dispatcher.exit_batch().await
    }
}

impl Drop for BatchScope<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.dispatcher.abandon_batch();
        }
    }
}
