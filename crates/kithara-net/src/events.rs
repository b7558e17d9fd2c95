use tokio::sync::broadcast;

use crate::error::NetError;

/// Notifications published by a [`NetworkEngine`](crate::NetworkEngine).
#[derive(Clone, Debug)]
pub enum NetEvent {
    /// A recoverable failure triggered another attempt. `error` is `None`
    /// when the failure was not a typed transport error.
    Retry { error: Option<NetError> },
}

/// Per-engine event bus.
///
/// `publish()` is a sync call. Without subscribers, events are dropped.
#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<NetEvent>,
}

impl EventBus {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, event: NetEvent) {
        let _ = self.tx.send(event);
    }

    /// Subscribe to all future events. Slow subscribers see
    /// `RecvError::Lagged(n)` instead of blocking the engine.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<NetEvent> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_without_subscribers_does_not_panic() {
        let bus = EventBus::new(4);
        bus.publish(NetEvent::Retry { error: None });
    }

    #[tokio::test]
    async fn test_subscribers_receive_retries() {
        let bus = EventBus::new(4);
        let mut rx = bus.subscribe();

        bus.publish(NetEvent::Retry {
            error: Some(NetError::missing_uris()),
        });

        let NetEvent::Retry { error } = rx.recv().await.unwrap();
        assert!(error.is_some());
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let bus = EventBus::new(0);
        let mut rx = bus.subscribe();
        bus.publish(NetEvent::Retry { error: None });
        assert!(rx.try_recv().is_ok());
    }
}
