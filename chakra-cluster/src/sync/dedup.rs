//! Message deduplication for cross-node messaging
//!
//! The pub/sub fabric is best effort and may deliver an envelope more than
//! once. Envelopes are remembered by correlation id for a short window.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Message deduplicator with automatic cleanup
#[derive(Clone)]
pub struct MessageDeduplicator {
    /// Map of dedup keys to expiration times
    entries: Arc<DashMap<String, Instant>>,
    dedup_window: Duration,
}

impl MessageDeduplicator {
    /// Create a deduplicator and start its cleanup task, which runs until `cancel` fires.
    #[must_use]
    pub fn new(dedup_window: Duration, cleanup_interval: Duration, cancel: CancellationToken) -> Self {
        let dedup = Self {
            entries: Arc::new(DashMap::new()),
            dedup_window,
        };

        let dedup_clone = dedup.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(cleanup_interval);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = interval.tick() => dedup_clone.cleanup_expired(),
                }
            }
        });

        dedup
    }

    /// Create with default settings (60 second window)
    #[must_use]
    pub fn with_defaults(cancel: CancellationToken) -> Self {
        Self::new(Duration::from_secs(60), Duration::from_secs(30), cancel)
    }

    /// Returns `true` the first time a key is seen within the window.
    #[must_use]
    pub fn should_process(&self, key: &str) -> bool {
        let now = Instant::now();

        match self.entries.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(mut entry) => {
                if *entry.get() > now {
                    return false;
                }
                entry.insert(now + self.dedup_window);
                true
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(now + self.dedup_window);
                true
            }
        }
    }

    fn cleanup_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_key, expires_at| *expires_at > now);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_duplicate_rejected_within_window() {
        let dedup = MessageDeduplicator::new(
            Duration::from_secs(5),
            Duration::from_secs(30),
            CancellationToken::new(),
        );

        assert!(dedup.should_process("create-peer:c1"));
        assert!(!dedup.should_process("create-peer:c1"));
        assert!(dedup.should_process("create-peer-result:c1"));
        assert_eq!(dedup.len(), 2);
    }

    #[tokio::test]
    async fn test_accepted_again_after_window() {
        let dedup = MessageDeduplicator::new(
            Duration::from_millis(20),
            Duration::from_secs(30),
            CancellationToken::new(),
        );

        assert!(dedup.should_process("k"));
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(dedup.should_process("k"));
    }

    #[tokio::test]
    async fn test_cleanup_removes_expired() {
        let cancel = CancellationToken::new();
        let dedup = MessageDeduplicator::new(
            Duration::from_millis(10),
            Duration::from_millis(20),
            cancel.clone(),
        );

        assert!(dedup.should_process("k"));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(dedup.is_empty());
        cancel.cancel();
    }
}
