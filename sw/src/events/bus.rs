//! Event Bus - pub/sub for run events
//!
//! Uses a tokio broadcast channel; emitting never blocks the run.

use tokio::sync::broadcast;
use tracing::debug;

use super::types::RunEvent;

/// Default channel capacity (events)
pub const DEFAULT_CHANNEL_CAPACITY: usize = 10_000;

/// Central event bus for run activity streaming
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<RunEvent>,
}

impl EventBus {
    /// Create a new event bus with the given capacity
    pub fn new(capacity: usize) -> Self {
        debug!(capacity, "EventBus::new: creating event bus");
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Emit an event to all subscribers
    ///
    /// Fire-and-forget: with no subscribers the event is dropped; when the
    /// channel is full the oldest events are dropped.
    pub fn emit(&self, event: RunEvent) {
        debug!(event_type = event.event_type(), step_id = ?event.step_id(), "EventBus::emit");
        let _ = self.tx.send(event);
    }

    /// Receive all events emitted after this call
    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        debug!("EventBus::subscribe: new subscriber");
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_and_receive() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        bus.emit(RunEvent::AnswerProgress {
            content: "partial".to_string(),
        });
        match rx.recv().await.unwrap() {
            RunEvent::AnswerProgress { content } => assert_eq!(content, "partial"),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new(4);
        bus.emit(RunEvent::AnswerProgress { content: String::new() });
        assert_eq!(bus.subscriber_count(), 0);
    }
}
