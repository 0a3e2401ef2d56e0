//! Counter store trait for abstracting in-memory and external backends.

use async_trait::async_trait;
use std::time::Duration;

use super::counter::CounterRecord;
use crate::error::Result;

/// Trait for counter store implementations.
///
/// `increment` must be atomic per key: concurrent callers in one live window
/// observe distinct, gap-free hit counts. The window's expiry is fixed when
/// the record is created and is not extended by later hits. Once it has
/// elapsed the next increment starts a new window at 1.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment the counter for `key` and report the post-increment state.
    async fn increment(&self, key: &str, ttl: Duration) -> Result<CounterRecord>;

    /// Release any external connection held by the store.
    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    /// Short backend name used in logs.
    fn name(&self) -> &'static str;
}
