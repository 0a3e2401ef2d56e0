//! Redis-backed counter store.
//!
//! Uses `INCR` plus the key's native TTL. The increment and the expiry are
//! separate commands, so two clients racing on a brand new key may each set
//! the expiry; the window then ends a moment later than it would have. Hit
//! counts themselves are always exact.

use async_trait::async_trait;
use parking_lot::RwLock;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::time::Duration;
use tracing::{debug, info, trace};

use crate::config::RedisOptions;
use crate::error::{Result, ThrottlerError};
use crate::ratelimit::{CounterRecord, CounterStore};

/// Redis `TTL` reply for a key that exists but has no expiry.
const TTL_NO_EXPIRY: i64 = -1;

/// Counter store backed by Redis.
pub struct RedisStore {
    /// Shared multiplexed connection, taken on shutdown
    conn: RwLock<Option<MultiplexedConnection>>,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("connected", &self.conn.read().is_some())
            .finish()
    }
}

impl RedisStore {
    /// Connect to Redis using the configured URL.
    pub async fn connect(options: &RedisOptions) -> Result<Self> {
        let client = redis::Client::open(options.url.as_str())
            .map_err(|e| ThrottlerError::Config(format!("invalid redis url: {}", e)))?;
        let conn = client.get_multiplexed_async_connection().await?;

        info!("Connected to Redis counter store");
        Ok(Self {
            conn: RwLock::new(Some(conn)),
        })
    }

    /// Get a handle on the shared connection.
    fn connection(&self) -> Result<MultiplexedConnection> {
        self.conn.read().clone().ok_or_else(|| {
            ThrottlerError::StoreUnavailable("redis store has been shut down".to_string())
        })
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn increment(&self, key: &str, ttl: Duration) -> Result<CounterRecord> {
        let mut conn = self.connection()?;
        let ttl_secs = ttl.as_secs().max(1) as i64;

        let (total_hits, mut remaining): (u64, i64) = redis::pipe()
            .atomic()
            .incr(key, 1u64)
            .ttl(key)
            .query_async(&mut conn)
            .await?;

        // A new key, or one whose expiry never landed.
        if remaining == TTL_NO_EXPIRY {
            let _: () = conn.expire(key, ttl_secs).await?;
            debug!(key = %key, ttl = ttl_secs, "Started redis counter window");
            remaining = ttl_secs;
        }

        trace!(
            key = %key,
            hits = total_hits,
            expires_in = remaining,
            "Incremented redis counter"
        );

        Ok(CounterRecord {
            total_hits,
            time_to_expire: remaining.max(0) as u64,
        })
    }

    async fn shutdown(&self) -> Result<()> {
        if self.conn.write().take().is_some() {
            info!("Closed Redis counter store connection");
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
