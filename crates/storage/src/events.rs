//! History change notifications over a `tokio::sync::broadcast` channel.
//!
//! Every successful mutation of a [`HistoryStore`](crate::history::HistoryStore)
//! publishes one [`HistoryEvent`]. Views that render history subscribe and
//! refresh on receipt.

use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

/// What changed in the history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HistoryEvent {
    Appended { id: Uuid },
    Removed { id: Uuid },
    Cleared,
    /// The list was re-read from storage and now holds `count` items.
    Reloaded { count: usize },
}

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 64;

/// Fan-out bus for [`HistoryEvent`]s.
pub struct HistoryEvents {
    sender: broadcast::Sender<HistoryEvent>,
}

impl HistoryEvents {
    /// Create a bus with a specific channel capacity.
    ///
    /// Slow receivers observe `RecvError::Lagged` once the buffer is full.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish to all current subscribers. Dropped when nobody listens.
    pub fn publish(&self, event: HistoryEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HistoryEvent> {
        self.sender.subscribe()
    }
}

impl Default for HistoryEvents {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = HistoryEvents::default();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(HistoryEvent::Reloaded { count: 3 });

        assert_eq!(rx1.recv().await.unwrap(), HistoryEvent::Reloaded { count: 3 });
        assert_eq!(rx2.recv().await.unwrap(), HistoryEvent::Reloaded { count: 3 });
    }

    #[test]
    fn publish_without_subscribers_does_not_panic() {
        HistoryEvents::default().publish(HistoryEvent::Cleared);
    }

    #[test]
    fn events_serialize_with_kind_tag() {
        let json = serde_json::to_value(HistoryEvent::Reloaded { count: 2 }).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "reloaded", "count": 2}));
    }
}
