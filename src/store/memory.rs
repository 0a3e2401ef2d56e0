//! In-process counter store.

use async_trait::async_trait;
use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

use crate::error::Result;
use crate::ratelimit::{CounterRecord, CounterStore};

/// A live counting window.
#[derive(Debug, Clone, Copy)]
struct Window {
    total_hits: u64,
    expires_at: Instant,
}

/// Counter store backed by a concurrent in-process map.
///
/// Each increment holds the shard lock for its key, so increments on one key
/// are serialized while unrelated keys proceed in parallel. Expired windows
/// are reset lazily on their next increment.
#[derive(Debug, Default)]
pub struct MemoryStore {
    windows: DashMap<String, Window>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently held, expired or not.
    pub fn counter_count(&self) -> usize {
        self.windows.len()
    }

    /// Drop every window that has expired.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.windows.len();
        self.windows.retain(|_, window| window.expires_at > now);
        before.saturating_sub(self.windows.len())
    }

    /// Clear all counters.
    pub fn clear(&self) {
        self.windows.clear();
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn increment(&self, key: &str, ttl: Duration) -> Result<CounterRecord> {
        let now = Instant::now();
        let mut window = self.windows.entry(key.to_string()).or_insert_with(|| Window {
            total_hits: 0,
            expires_at: now + ttl,
        });

        if window.expires_at <= now {
            window.total_hits = 0;
            window.expires_at = now + ttl;
        }
        window.total_hits += 1;

        let record = CounterRecord::new(window.total_hits, window.expires_at - now);
        drop(window);

        trace!(
            key = %key,
            hits = record.total_hits,
            expires_in = record.time_to_expire,
            "Incremented memory counter"
        );
        Ok(record)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const MINUTE: Duration = Duration::from_secs(60);

    #[tokio::test(start_paused = true)]
    async fn test_first_increment_creates_window() {
        let store = MemoryStore::new();

        let record = store.increment("key", MINUTE).await.unwrap();
        assert_eq!(record.total_hits, 1);
        assert_eq!(record.time_to_expire, 60);
        assert_eq!(store.counter_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_increment_keeps_fixed_expiry() {
        let store = MemoryStore::new();
        store.increment("key", MINUTE).await.unwrap();

        tokio::time::advance(Duration::from_secs(20)).await;
        let record = store.increment("key", MINUTE).await.unwrap();

        assert_eq!(record.total_hits, 2);
        assert_eq!(record.time_to_expire, 40);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_window_resets() {
        let store = MemoryStore::new();
        for _ in 0..7 {
            store.increment("key", MINUTE).await.unwrap();
        }

        tokio::time::advance(Duration::from_secs(60)).await;
        let record = store.increment("key", MINUTE).await.unwrap();

        assert_eq!(record.total_hits, 1);
        assert_eq!(record.time_to_expire, 60);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent() {
        let store = MemoryStore::new();
        store.increment("a", MINUTE).await.unwrap();
        store.increment("a", MINUTE).await.unwrap();

        let record = store.increment("b", MINUTE).await.unwrap();
        assert_eq!(record.total_hits, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let store = MemoryStore::new();
        store.increment("short", Duration::from_secs(1)).await.unwrap();
        store.increment("long", MINUTE).await.unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.counter_count(), 1);

        store.clear();
        assert_eq!(store.counter_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments_are_gap_free() {
        let store = Arc::new(MemoryStore::new());
        let tasks: Vec<_> = (0..200)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    store.increment("shared", MINUTE).await.unwrap().total_hits
                })
            })
            .collect();

        let mut hits: Vec<u64> = futures::future::join_all(tasks)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        hits.sort_unstable();

        assert_eq!(hits, (1..=200).collect::<Vec<u64>>());
    }
}
