//! Counter store backends.
//!
//! The in-memory store is always available. Redis and MongoDB support are
//! behind the `redis` and `mongodb` features.

mod memory;

#[cfg(feature = "mongodb")]
mod mongo;
#[cfg(feature = "redis")]
mod redis;

use std::sync::Arc;
use tracing::info;

use crate::config::{StorageConfig, StorageType};
use crate::error::{Result, ThrottlerError};
use crate::ratelimit::CounterStore;

pub use memory::MemoryStore;

#[cfg(feature = "mongodb")]
pub use mongo::MongoStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisStore;

/// Create the counter store selected by configuration.
pub async fn connect(config: &StorageConfig) -> Result<Arc<dyn CounterStore>> {
    let store: Arc<dyn CounterStore> = match config.kind {
        StorageType::Memory => Arc::new(MemoryStore::new()),
        StorageType::Redis => connect_redis(config).await?,
        StorageType::Mongodb => connect_mongo(config).await?,
    };
    info!(store = store.name(), "Counter store ready");
    Ok(store)
}

#[cfg(feature = "redis")]
async fn connect_redis(config: &StorageConfig) -> Result<Arc<dyn CounterStore>> {
    let options = config.redis.as_ref().ok_or_else(|| {
        ThrottlerError::Config("storage.redis is required for redis storage".to_string())
    })?;
    Ok(Arc::new(RedisStore::connect(options).await?))
}

#[cfg(not(feature = "redis"))]
async fn connect_redis(_config: &StorageConfig) -> Result<Arc<dyn CounterStore>> {
    Err(ThrottlerError::Config(
        "redis storage requires the `redis` feature".to_string(),
    ))
}

#[cfg(feature = "mongodb")]
async fn connect_mongo(config: &StorageConfig) -> Result<Arc<dyn CounterStore>> {
    let options = config.mongodb.as_ref().ok_or_else(|| {
        ThrottlerError::Config("storage.mongodb is required for mongodb storage".to_string())
    })?;
    Ok(Arc::new(MongoStore::connect(options).await?))
}

#[cfg(not(feature = "mongodb"))]
async fn connect_mongo(_config: &StorageConfig) -> Result<Arc<dyn CounterStore>> {
    Err(ThrottlerError::Config(
        "mongodb storage requires the `mongodb` feature".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_connect_memory_by_default() {
        let store = connect(&StorageConfig::default()).await.unwrap();
        assert_eq!(store.name(), "memory");

        let record = store.increment("key", Duration::from_secs(1)).await.unwrap();
        assert_eq!(record.total_hits, 1);
        store.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_redis_without_options_fails() {
        let config = StorageConfig {
            kind: StorageType::Redis,
            ..StorageConfig::default()
        };
        let err = connect(&config).await.err().expect("expected connect to fail");
        assert!(matches!(err, ThrottlerError::Config(_)));
    }

    #[tokio::test]
    async fn test_connect_mongodb_without_options_fails() {
        let config = StorageConfig {
            kind: StorageType::Mongodb,
            ..StorageConfig::default()
        };
        let err = connect(&config).await.err().expect("expected connect to fail");
        assert!(matches!(err, ThrottlerError::Config(_)));
    }
}
