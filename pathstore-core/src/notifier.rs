//! Publication of change events to an external bus.

use std::fmt::Debug;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::debug;

use crate::{change::DataChangedEvent, error::DocumentStoreResult};

/// Sink for [`DataChangedEvent`]s, keyed by topic.
#[async_trait]
pub trait ChangeNotifier: Send + Sync + Debug {
    async fn publish(&self, topic: &str, event: DataChangedEvent) -> DocumentStoreResult<()>;
}

/// Topic of a mutated document: `{prefix}/{collection}/{id}`.
pub fn topic(prefix: &str, collection: &str, id: &str) -> String {
    format!("{}/{}/{}", prefix, collection, id)
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

#[async_trait]
impl ChangeNotifier for NoopNotifier {
    async fn publish(&self, _topic: &str, _event: DataChangedEvent) -> DocumentStoreResult<()> {
        Ok(())
    }
}

/// In-process bus built on a tokio broadcast channel.
///
/// Events published while nobody subscribes are dropped.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<(String, DataChangedEvent)>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<(String, DataChangedEvent)> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl ChangeNotifier for BroadcastNotifier {
    async fn publish(&self, topic: &str, event: DataChangedEvent) -> DocumentStoreResult<()> {
        if self.sender.send((topic.to_string(), event)).is_err() {
            debug!(topic, "no subscriber for change event");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::Patch;
    use rstest::rstest;

    fn event() -> DataChangedEvent {
        DataChangedEvent {
            path: "/items/1".into(),
            data: None,
            patches: vec![Patch::remove("/")],
            user: None,
        }
    }

    #[rstest]
    fn test_topic() {
        assert_eq!(topic("data-changed", "items", "1"), "data-changed/items/1");
    }

    #[tokio::test]
    async fn test_broadcast_delivers_to_subscribers() {
        let notifier = BroadcastNotifier::new(4);
        let mut receiver = notifier.subscribe();

        notifier.publish("data-changed/items/1", event()).await.unwrap();

        let (topic, received) = receiver.recv().await.unwrap();
        assert_eq!(topic, "data-changed/items/1");
        assert_eq!(received, event());
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        assert!(BroadcastNotifier::default().publish("t", event()).await.is_ok());
        assert!(NoopNotifier.publish("t", event()).await.is_ok());
    }
}
