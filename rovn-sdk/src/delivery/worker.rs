//! Background delivery worker.
//!
//! One tokio task per fire-and-forget client consumes the queue in FIFO
//! order. A retryable failure (see [`RovnError::is_retryable`]) waits the
//! current backoff and retries the same event, indefinitely; any other
//! failure drops the event and moves on.
//!
//! Shutdown sends [`WorkItem::Shutdown`] behind the queued events and joins
//! the task with a bounded timeout. If the worker does not drain in time its
//! cancellation token is fired and the task is abandoned. Events still in the
//! channel when the worker stops, including any that raced in behind the
//! shutdown marker, are reported as [`DropReason::QueueClosed`].

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use reqwest::Method;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::backoff::Backoff;
use super::queue::{EventQueue, Pending, WorkItem};
use super::{DeliveryObserver, DropReason};
use crate::config::DeliveryConfig;
use crate::error::RovnError;
use crate::event::{Event, WEBHOOK_PATH};
use crate::transport::Transport;

/// Outcome of a worker shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// Every queued event was processed before the worker stopped.
    Drained,
    /// The worker had already been closed.
    AlreadyClosed,
    /// The timeout elapsed; the worker was cancelled and abandoned.
    TimedOut,
}

/// Handle to the delivery task and the producer side of its queue.
pub(crate) struct DeliveryWorker {
    queue: EventQueue,
    handle: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
    shutdown_timeout: Duration,
}

impl DeliveryWorker {
    /// Spawn the worker on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `RovnError::InvalidConfig` when called outside a tokio runtime.
    pub(crate) fn spawn(
        transport: Arc<dyn Transport>,
        config: &DeliveryConfig,
        observer: DeliveryObserver,
    ) -> Result<Self, RovnError> {
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| RovnError::InvalidConfig {
                details: "fire-and-forget delivery must be started inside a tokio runtime"
                    .to_string(),
            })?;

        let (queue, rx, pending) = EventQueue::new(config.queue_capacity, observer.clone());
        let cancel = CancellationToken::new();
        let state = WorkerState {
            transport,
            backoff: Backoff::new(config.backoff_base, config.backoff_max),
            observer,
            pending,
            cancel: cancel.clone(),
        };
        let handle = runtime.spawn(state.run(rx));

        info!(
            queue_capacity = config.queue_capacity,
            backoff_base_ms = config.backoff_base.as_millis() as u64,
            backoff_max_ms = config.backoff_max.as_millis() as u64,
            "Delivery worker started"
        );

        Ok(Self {
            queue,
            handle: Mutex::new(Some(handle)),
            cancel,
            shutdown_timeout: config.shutdown_timeout,
        })
    }

    /// Offer an event to the queue without waiting.
    pub(crate) fn enqueue(&self, event: Event) -> bool {
        self.queue.enqueue(event)
    }

    /// Wait until every accepted event has been delivered or dropped.
    pub(crate) async fn wait_idle(&self) {
        self.queue.pending().wait_idle().await;
    }

    /// Events accepted but not yet finished.
    pub(crate) fn pending(&self) -> usize {
        self.queue.pending().get()
    }

    /// Stop the worker after it drains the queue, waiting at most the
    /// configured shutdown timeout.
    pub(crate) async fn close(&self) -> CloseOutcome {
        let Some(handle) = self.handle.lock().take() else {
            return CloseOutcome::AlreadyClosed;
        };

        let pending = self.pending();
        debug!(pending, "Stopping delivery worker");

        let drain = async {
            if !self.queue.send_shutdown().await {
                debug!("Delivery worker already stopped");
            }
            handle.await
        };

        match tokio::time::timeout(self.shutdown_timeout, drain).await {
            Ok(Ok(())) => {
                info!("Delivery worker drained and stopped");
                CloseOutcome::Drained
            }
            Ok(Err(e)) => {
                error!(error = %e, "Delivery worker task failed");
                CloseOutcome::TimedOut
            }
            Err(_) => {
                warn!(
                    timeout_secs = self.shutdown_timeout.as_secs(),
                    pending = self.pending(),
                    "Delivery worker did not drain in time, abandoning"
                );
                self.cancel.cancel();
                CloseOutcome::TimedOut
            }
        }
    }
}

impl Drop for DeliveryWorker {
    fn drop(&mut self) {
        // Without close() queued events are discarded rather than retried forever.
        self.cancel.cancel();
    }
}

/// State owned by the worker task.
struct WorkerState {
    transport: Arc<dyn Transport>,
    backoff: Backoff,
    observer: DeliveryObserver,
    pending: Arc<Pending>,
    cancel: CancellationToken,
}

impl WorkerState {
    async fn run(mut self, mut rx: mpsc::Receiver<WorkItem>) {
        loop {
            let item = tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    debug!("Delivery worker cancelled");
                    break;
                }
                item = rx.recv() => item,
            };

            let event = match item {
                Some(WorkItem::Deliver(event)) => event,
                Some(WorkItem::Shutdown) => {
                    debug!("Delivery worker received shutdown");
                    break;
                }
                None => break,
            };

            if !self.deliver(&event).await {
                self.drop_unsent(&event);
                break;
            }
        }

        // Producers see Closed from here on; whatever got in before is reported.
        rx.close();
        let mut abandoned = 0usize;
        while let Ok(item) = rx.try_recv() {
            if let WorkItem::Deliver(event) = item {
                self.drop_unsent(&event);
                abandoned += 1;
            }
        }
        if abandoned > 0 {
            warn!(abandoned, "Delivery worker stopped with events still queued");
        }
        self.pending.clear();
        self.observer.idle();
    }

    fn drop_unsent(&self, event: &Event) {
        let depth = self.pending.get().saturating_sub(1);
        self.observer.dropped(event, &DropReason::QueueClosed, depth);
        self.pending.finish_one();
    }

    /// Deliver one event, retrying retryable failures.
    ///
    /// Returns `false` if cancelled before the event was finished.
    async fn deliver(&mut self, event: &Event) -> bool {
        let body = event.to_body();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let result = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return false,
                result = self.transport.send(Method::POST, WEBHOOK_PATH, Some(&body)) => result,
            };

            match result {
                Ok(_) => {
                    self.backoff.reset();
                    // Observe before finishing so flush() never returns ahead of the hook.
                    let depth = self.pending.get().saturating_sub(1);
                    debug!(kind = %event.kind(), attempt, depth, "Event delivered");
                    self.observer.delivered(depth);
                    self.pending.finish_one();
                    return true;
                }
                Err(e) if e.is_retryable() => {
                    let delay = self.backoff.next_delay();
                    warn!(
                        kind = %event.kind(),
                        attempt,
                        status = e.status(),
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "Event delivery failed, will retry"
                    );
                    self.observer.retried();
                    tokio::select! {
                        biased;
                        () = self.cancel.cancelled() => return false,
                        () = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => {
                    let depth = self.pending.get().saturating_sub(1);
                    warn!(
                        kind = %event.kind(),
                        status = e.status(),
                        error = %e,
                        "Event rejected, dropping"
                    );
                    self.observer
                        .dropped(event, &DropReason::Rejected(e), depth);
                    self.pending.finish_one();
                    return true;
                }
            }
        }
    }
}
