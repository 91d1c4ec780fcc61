use crate::error::{Error, Result};
use crate::sync::bus::{MessageBus, SUBSCRIBER_CAPACITY};
use async_trait::async_trait;
use futures::stream::StreamExt;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client as RedisClient};
use tokio::sync::{mpsc, Mutex};
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Timeout for Redis operations in seconds
const REDIS_TIMEOUT_SECS: u64 = 5;

/// Initial backoff delay for subscriber reconnection
const INITIAL_BACKOFF_SECS: u64 = 1;

/// Maximum backoff delay for subscriber reconnection
const MAX_BACKOFF_SECS: u64 = 30;

/// Redis Pub/Sub fabric for multi-node deployments
///
/// Publishing shares one multiplexed connection, re-established on the next
/// publish after a failure. Each subscription runs its own task that
/// reconnects with exponential backoff.
pub struct RedisBus {
    redis_client: RedisClient,
    publisher: Mutex<Option<MultiplexedConnection>>,
    cancel_token: CancellationToken,
}

impl RedisBus {
    pub fn new(redis_url: &str) -> Result<Self> {
        let redis_client = RedisClient::open(redis_url)
            .map_err(|e| Error::Configuration(format!("invalid Redis URL: {e}")))?;

        Ok(Self {
            redis_client,
            publisher: Mutex::new(None),
            cancel_token: CancellationToken::new(),
        })
    }

    async fn publisher_connection(&self) -> Result<MultiplexedConnection> {
        let mut publisher = self.publisher.lock().await;
        if let Some(conn) = publisher.as_ref() {
            return Ok(conn.clone());
        }

        let conn = timeout(
            Duration::from_secs(REDIS_TIMEOUT_SECS),
            self.redis_client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| Error::Timeout("connecting to Redis for publishing".to_string()))??;

        info!("Redis publisher connected");
        *publisher = Some(conn.clone());
        Ok(conn)
    }

    /// Run one subscriber connection until it drops, forwarding payloads to `tx`.
    async fn run_subscriber(
        client: &RedisClient,
        channel: &str,
        tx: &mpsc::Sender<String>,
        cancel: &CancellationToken,
    ) -> SubscriberExit {
        let mut pubsub = match timeout(
            Duration::from_secs(REDIS_TIMEOUT_SECS),
            client.get_async_pubsub(),
        )
        .await
        {
            Ok(Ok(ps)) => ps,
            Ok(Err(e)) => return SubscriberExit::ConnectFailed(e.to_string()),
            Err(_) => {
                return SubscriberExit::ConnectFailed(
                    "timed out getting Redis Pub/Sub connection".to_string(),
                )
            }
        };

        match timeout(
            Duration::from_secs(REDIS_TIMEOUT_SECS),
            pubsub.subscribe(channel),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return SubscriberExit::ConnectFailed(e.to_string()),
            Err(_) => {
                return SubscriberExit::ConnectFailed(format!(
                    "timed out subscribing to {channel}"
                ))
            }
        }

        info!(channel, "Redis subscriber connected");

        let mut messages = pubsub.on_message();
        loop {
            let msg = tokio::select! {
                () = cancel.cancelled() => return SubscriberExit::Cancelled,
                msg = messages.next() => msg,
            };

            let Some(msg) = msg else {
                return SubscriberExit::Disconnected;
            };

            let payload: String = match msg.get_payload() {
                Ok(p) => p,
                Err(e) => {
                    warn!(error = %e, channel, "Invalid payload");
                    continue;
                }
            };

            if tx.send(payload).await.is_err() {
                return SubscriberExit::Cancelled;
            }
        }
    }
}

#[async_trait]
impl MessageBus for RedisBus {
    async fn publish(&self, channel: &str, payload: String) -> Result<()> {
        let mut conn = self.publisher_connection().await?;

        let published: redis::RedisResult<usize> = match timeout(
            Duration::from_secs(REDIS_TIMEOUT_SECS),
            conn.publish(channel, payload),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                *self.publisher.lock().await = None;
                return Err(Error::Timeout(format!("publishing to {channel}")));
            }
        };

        match published {
            Ok(receivers) => {
                debug!(channel, receivers, "Published to Redis");
                Ok(())
            }
            Err(e) => {
                // Reconnect on the next publish
                *self.publisher.lock().await = None;
                Err(e.into())
            }
        }
    }

    async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<String>> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
        let client = self.redis_client.clone();
        let channel = channel.to_string();
        let cancel = self.cancel_token.clone();

        tokio::spawn(async move {
            let mut backoff_secs = INITIAL_BACKOFF_SECS;

            loop {
                if cancel.is_cancelled() || tx.is_closed() {
                    break;
                }

                match Self::run_subscriber(&client, &channel, &tx, &cancel).await {
                    SubscriberExit::Cancelled => break,
                    SubscriberExit::Disconnected => {
                        error!(
                            channel = %channel,
                            "Redis subscriber stream ended (connection lost), reconnecting after {}s",
                            INITIAL_BACKOFF_SECS
                        );
                        backoff_secs = INITIAL_BACKOFF_SECS;
                    }
                    SubscriberExit::ConnectFailed(e) => {
                        error!(
                            channel = %channel,
                            error = %e,
                            backoff_secs = backoff_secs,
                            "Redis subscriber failed to connect, retrying after backoff"
                        );
                    }
                }

                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(Duration::from_secs(backoff_secs)) => {}
                }

                backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF_SECS);
            }

            info!(channel = %channel, "Redis subscriber task stopped");
        });

        Ok(rx)
    }

    fn shutdown(&self) {
        info!("Shutting down Redis bus");
        self.cancel_token.cancel();
    }
}

enum SubscriberExit {
    /// Connection was healthy before it dropped; backoff resets
    Disconnected,
    /// Could not connect or subscribe; backoff keeps growing
    ConnectFailed(String),
    /// Shutdown or the receiver was dropped
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_bad_url() {
        assert!(matches!(
            RedisBus::new("not-a-url"),
            Err(Error::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_publish_to_unreachable_redis_fails() {
        let bus = RedisBus::new("redis://127.0.0.1:1").unwrap();
        assert!(bus.publish("chakra.a", "x".to_string()).await.is_err());
    }

    // Integration tests require Redis running
    #[tokio::test]
    #[ignore = "Requires Redis server"]
    async fn test_pubsub_integration() {
        let bus = RedisBus::new("redis://127.0.0.1:6379").unwrap();
        let mut rx = bus.subscribe("chakra.test-node").await.unwrap();

        // Let the subscriber connect
        tokio::time::sleep(Duration::from_millis(200)).await;
        bus.publish("chakra.test-node", "hello".to_string())
            .await
            .unwrap();

        let received = timeout(Duration::from_secs(2), rx.recv()).await.unwrap();
        assert_eq!(received.as_deref(), Some("hello"));
        bus.shutdown();
    }
}
