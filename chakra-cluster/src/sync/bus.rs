//! Publish/subscribe fabric between nodes

use crate::error::{Error, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Buffered messages per subscriber before publishes are dropped
pub const SUBSCRIBER_CAPACITY: usize = 1024;

/// Best-effort message fabric: delivery may be lost, duplicated or reordered.
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, channel: &str, payload: String) -> Result<()>;

    /// Receive every message later published on `channel`. The subscription
    /// ends when the receiver is dropped.
    async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<String>>;

    fn shutdown(&self) {}
}

/// In-process bus for single-node deployments and tests
#[derive(Default)]
pub struct LocalBus {
    subscribers: DashMap<String, Vec<mpsc::Sender<String>>>,
}

impl LocalBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageBus for LocalBus {
    async fn publish(&self, channel: &str, payload: String) -> Result<()> {
        let Some(mut senders) = self.subscribers.get_mut(channel) else {
            debug!(channel, "No subscribers for channel");
            return Ok(());
        };

        senders.retain(|tx| match tx.try_send(payload.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(channel, "Subscriber queue full, dropping message");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<String>> {
        if channel.is_empty() {
            return Err(Error::Bus("channel name is empty".to_string()));
        }
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
        self.subscribers.entry(channel.to_string()).or_default().push(tx);
        Ok(rx)
    }

    fn shutdown(&self) {
        self.subscribers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_delivers_to_every_subscriber_of_channel() {
        let bus = LocalBus::new();
        let mut a = bus.subscribe("chakra.a").await.unwrap();
        let mut a2 = bus.subscribe("chakra.a").await.unwrap();
        let mut b = bus.subscribe("chakra.b").await.unwrap();

        bus.publish("chakra.a", "hello".to_string()).await.unwrap();

        assert_eq!(a.recv().await.unwrap(), "hello");
        assert_eq!(a2.recv().await.unwrap(), "hello");
        assert!(b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dropped_subscriber_is_pruned() {
        let bus = LocalBus::new();
        let rx = bus.subscribe("chakra.a").await.unwrap();
        drop(rx);

        bus.publish("chakra.a", "x".to_string()).await.unwrap();
        assert!(bus.subscribers.get("chakra.a").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = LocalBus::new();
        assert!(bus.publish("nobody", "x".to_string()).await.is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_closes_subscriptions() {
        let bus = LocalBus::new();
        let mut rx = bus.subscribe("chakra.a").await.unwrap();
        bus.shutdown();
        assert!(rx.recv().await.is_none());
    }
}
