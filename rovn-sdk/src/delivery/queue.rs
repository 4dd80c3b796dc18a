//! Bounded delivery queue.
//!
//! A `tokio::sync::mpsc` channel carrying [`WorkItem`]s. Producers use
//! `try_send` and never wait: when the channel is full the *new* event is
//! dropped and everything already queued stays in place.
//!
//! [`Pending`] counts events that were accepted but not yet finished
//! (delivered or dropped by the worker) so `flush()` can wait for the queue
//! to drain.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Notify;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use super::{DeliveryObserver, DropReason};
use crate::event::Event;

/// Item carried by the delivery channel.
#[derive(Debug)]
pub(crate) enum WorkItem {
    Deliver(Event),
    /// Stop after everything queued ahead of this item.
    Shutdown,
}

/// Accepted-but-unfinished event counter.
#[derive(Debug, Default)]
pub(crate) struct Pending {
    count: AtomicUsize,
    drained: Notify,
}

impl Pending {
    pub(crate) fn get(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    fn begin(&self) -> usize {
        self.count.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Mark one event finished. Returns the remaining count.
    pub(crate) fn finish_one(&self) -> usize {
        let previous = self
            .count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .unwrap_or(0);
        let remaining = previous.saturating_sub(1);
        if remaining == 0 {
            self.drained.notify_waiters();
        }
        remaining
    }

    /// Forget every outstanding event (worker stopped) and wake waiters.
    pub(crate) fn clear(&self) {
        self.count.store(0, Ordering::SeqCst);
        self.drained.notify_waiters();
    }

    /// Wait until no accepted event is outstanding.
    pub(crate) async fn wait_idle(&self) {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            // Register before checking so a concurrent finish cannot be missed.
            notified.as_mut().enable();
            if self.get() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Producer side of the delivery channel.
#[derive(Debug)]
pub(crate) struct EventQueue {
    tx: mpsc::Sender<WorkItem>,
    pending: Arc<Pending>,
    observer: DeliveryObserver,
}

impl EventQueue {
    /// Create a queue holding at most `capacity` waiting events.
    pub(crate) fn new(
        capacity: usize,
        observer: DeliveryObserver,
    ) -> (Self, mpsc::Receiver<WorkItem>, Arc<Pending>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let pending = Arc::new(Pending::default());
        let queue = Self {
            tx,
            pending: Arc::clone(&pending),
            observer,
        };
        (queue, rx, pending)
    }

    /// Offer an event without waiting. Returns `false` if it was dropped.
    pub(crate) fn enqueue(&self, event: Event) -> bool {
        // Count first so the worker can never finish an event we have not counted.
        let depth = self.pending.begin();
        match self.tx.try_send(WorkItem::Deliver(event)) {
            Ok(()) => {
                debug!(depth, "Event queued");
                self.observer.enqueued(depth);
                true
            }
            Err(TrySendError::Full(item)) => {
                let depth = self.pending.finish_one();
                warn!(
                    capacity = self.tx.max_capacity(),
                    "Delivery queue full, dropping event"
                );
                self.report_drop(item, &DropReason::QueueFull, depth);
                false
            }
            Err(TrySendError::Closed(item)) => {
                let depth = self.pending.finish_one();
                warn!("Delivery worker stopped, dropping event");
                self.report_drop(item, &DropReason::QueueClosed, depth);
                false
            }
        }
    }

    /// Send the shutdown marker behind everything already queued.
    ///
    /// Waits for channel space; callers bound this with a timeout.
    pub(crate) async fn send_shutdown(&self) -> bool {
        self.tx.send(WorkItem::Shutdown).await.is_ok()
    }

    pub(crate) fn pending(&self) -> &Pending {
        &self.pending
    }

    fn report_drop(&self, item: WorkItem, reason: &DropReason, depth: usize) {
        if let WorkItem::Deliver(event) = item {
            self.observer.dropped(&event, reason, depth);
        }
    }
}
