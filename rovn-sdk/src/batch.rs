//! Batch buffer.
//!
//! While a batch is active every dispatched event is appended here instead of
//! being sent. The lock is held only for an append or a swap, never across
//! network I/O; the dispatcher delivers the swapped-out events afterwards.

use parking_lot::Mutex;

use crate::event::Event;

#[derive(Debug, Default)]
struct BatchState {
    active: bool,
    events: Vec<Event>,
}

/// Mutex-guarded batching flag and buffer.
#[derive(Debug, Default)]
pub struct BatchBuffer {
    state: Mutex<BatchState>,
}

impl BatchBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start buffering. Entering an already active batch is a no-op.
    pub fn enter(&self) {
        self.state.lock().active = true;
    }

    /// Whether a batch is currently active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state.lock().active
    }

    /// Append `event` if a batch is active, otherwise hand it back.
    ///
    /// # Errors
    ///
    /// Returns the event unchanged when no batch is active.
    pub fn try_buffer(&self, event: Event) -> Result<(), Event> {
        let mut state = self.state.lock();
        if state.active {
            state.events.push(event);
            Ok(())
        } else {
            Err(event)
        }
    }

    /// Stop buffering and take the buffered events, in buffering order.
    ///
    /// The flag is cleared and the contents swapped out under one lock, so
    /// an event dispatched concurrently is either in the returned list or
    /// routed normally, never lost.
    pub fn exit(&self) -> Vec<Event> {
        let mut state = self.state.lock();
        state.active = false;
        std::mem::take(&mut state.events)
    }

    /// Stop buffering but keep what was buffered for the next
    /// [`BatchBuffer::drain`] or [`BatchBuffer::exit`]. Returns how many
    /// events are held.
    pub fn suspend(&self) -> usize {
        let mut state = self.state.lock();
        state.active = false;
        state.events.len()
    }

    /// Take the buffered events without leaving the batch.
    pub fn drain(&self) -> Vec<Event> {
        std::mem::take(&mut self.state.lock().events)
    }

    /// Number of buffered events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use serde_json::Map;

    fn event(kind: EventKind) -> Event {
        Event::new(kind, Map::new())
    }

    #[test]
    fn test_inactive_buffer_returns_event() {
        let buffer = BatchBuffer::new();
        let result = buffer.try_buffer(event(EventKind::Activity));
        assert!(result.is_err());
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_exit_returns_events_in_order_and_deactivates() {
        let buffer = BatchBuffer::new();
        buffer.enter();
        assert!(buffer.is_active());

        for kind in [EventKind::Activity, EventKind::Message, EventKind::Status] {
            assert!(buffer.try_buffer(event(kind)).is_ok());
        }
        assert_eq!(buffer.len(), 3);

        let kinds: Vec<EventKind> = buffer.exit().iter().map(Event::kind).collect();
        assert_eq!(
            kinds,
            vec![EventKind::Activity, EventKind::Message, EventKind::Status]
        );
        assert!(!buffer.is_active());
        assert!(buffer.is_empty());
        assert!(buffer.try_buffer(event(EventKind::Activity)).is_err());
    }

    #[test]
    fn test_exit_without_events_is_empty() {
        let buffer = BatchBuffer::new();
        buffer.enter();
        assert!(buffer.exit().is_empty());
    }

    #[test]
    fn test_suspend_holds_events_until_drained() {
        let buffer = BatchBuffer::new();
        buffer.enter();
        buffer.try_buffer(event(EventKind::Activity)).unwrap();

        assert_eq!(buffer.suspend(), 1);
        assert!(!buffer.is_active());
        assert!(buffer.try_buffer(event(EventKind::Message)).is_err());
        assert_eq!(buffer.drain().len(), 1);
    }

    #[test]
    fn test_drain_keeps_batch_active() {
        let buffer = BatchBuffer::new();
        buffer.enter();
        buffer.try_buffer(event(EventKind::Activity)).unwrap();

        assert_eq!(buffer.drain().len(), 1);
        assert!(buffer.is_active());
        assert!(buffer.try_buffer(event(EventKind::Message)).is_ok());
    }
}
