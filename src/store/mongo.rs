//! MongoDB-backed counter store.
//!
//! One document per counting bucket: `{ key, totalHits, expireAt }`. A TTL
//! index on `expireAt` lets the server delete dead windows, and a unique
//! index on `key` keeps concurrent upserts on one document. The TTL monitor
//! only runs periodically, so the increment itself also treats a document
//! past its `expireAt` as a fresh window.

use async_trait::async_trait;
use mongodb::bson::{doc, DateTime, Document};
use mongodb::options::{IndexOptions, ReturnDocument};
use mongodb::{Client, Collection, IndexModel};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, trace};

use crate::config::MongoOptions;
use crate::error::{Result, ThrottlerError};
use crate::ratelimit::{CounterRecord, CounterStore};

/// Stored shape of a counter.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CounterDocument {
    key: String,
    #[serde(rename = "totalHits")]
    total_hits: i64,
    #[serde(rename = "expireAt")]
    expire_at: DateTime,
}

#[derive(Clone)]
struct Connection {
    client: Client,
    counters: Collection<CounterDocument>,
}

/// Counter store backed by a MongoDB collection.
pub struct MongoStore {
    conn: RwLock<Option<Connection>>,
}

impl std::fmt::Debug for MongoStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MongoStore")
            .field("connected", &self.conn.read().is_some())
            .finish()
    }
}

impl MongoStore {
    /// Connect to MongoDB and make sure the counter indexes exist.
    pub async fn connect(options: &MongoOptions) -> Result<Self> {
        let client = Client::with_uri_str(&options.url).await?;
        let database = match &options.database {
            Some(name) => client.database(name),
            None => client.default_database().ok_or_else(|| {
                ThrottlerError::Config(
                    "mongodb url names no database and none is configured".to_string(),
                )
            })?,
        };
        let counters = database.collection::<CounterDocument>(&options.collection);

        counters
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "expireAt": 1 })
                    .options(IndexOptions::builder().expire_after(Duration::ZERO).build())
                    .build(),
            )
            .await?;
        counters
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "key": 1 })
                    .options(IndexOptions::builder().unique(true).build())
                    .build(),
            )
            .await?;

        info!(
            database = %database.name(),
            collection = %options.collection,
            "Connected to MongoDB counter store"
        );
        Ok(Self {
            conn: RwLock::new(Some(Connection { client, counters })),
        })
    }

    fn counters(&self) -> Result<Collection<CounterDocument>> {
        self.conn
            .read()
            .as_ref()
            .map(|conn| conn.counters.clone())
            .ok_or_else(|| {
                ThrottlerError::StoreUnavailable("mongodb store has been shut down".to_string())
            })
    }
}

/// Pipeline update that increments a live window or starts a new one.
fn increment_pipeline(key: &str, now: DateTime, ttl: Duration) -> Vec<Document> {
    let fresh_expiry = DateTime::from_millis(now.timestamp_millis() + ttl.as_millis() as i64);
    let live = doc! { "$gt": ["$expireAt", now] };

    vec![doc! {
        "$set": {
            "key": key,
            "totalHits": { "$cond": [live.clone(), { "$add": ["$totalHits", 1_i64] }, 1_i64] },
            "expireAt": { "$cond": [live, "$expireAt", fresh_expiry] },
        }
    }]
}

#[async_trait]
impl CounterStore for MongoStore {
    async fn increment(&self, key: &str, ttl: Duration) -> Result<CounterRecord> {
        let counters = self.counters()?;
        let now = DateTime::now();

        let counter = counters
            .find_one_and_update(doc! { "key": key }, increment_pipeline(key, now, ttl))
            .upsert(true)
            .return_document(ReturnDocument::After)
            .await?
            .ok_or_else(|| {
                ThrottlerError::StoreUnavailable(format!(
                    "mongodb upsert returned no document for {}",
                    key
                ))
            })?;

        let remaining_ms =
            counter.expire_at.timestamp_millis() - DateTime::now().timestamp_millis();
        let remaining = Duration::from_millis(remaining_ms.max(0) as u64);

        trace!(
            key = %key,
            hits = counter.total_hits,
            expires_in_ms = remaining_ms,
            "Incremented mongodb counter"
        );

        Ok(CounterRecord::new(counter.total_hits.max(0) as u64, remaining))
    }

    async fn shutdown(&self) -> Result<()> {
        let conn = self.conn.write().take();
        if let Some(conn) = conn {
            drop(conn.counters);
            conn.client.shutdown().immediate(true).await;
            info!("Closed MongoDB counter store connection");
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "mongodb"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_increment_pipeline_shape() {
        let now = DateTime::from_millis(1_000_000);
        let pipeline = increment_pipeline("k:minute", now, Duration::from_secs(60));

        assert_eq!(pipeline.len(), 1);
        let set = pipeline[0].get_document("$set").unwrap();
        assert_eq!(set.get_str("key").unwrap(), "k:minute");

        let expire_at = set.get_document("expireAt").unwrap();
        let branches = expire_at.get_array("$cond").unwrap();
        assert_eq!(
            branches[2].as_datetime().unwrap().timestamp_millis(),
            1_060_000
        );
    }

    // The remaining tests require a running MongoDB instance.

    async fn connect() -> MongoStore {
        let options = MongoOptions {
            url: "mongodb://localhost:27017".to_string(),
            database: Some("throttler_test".to_string()),
            collection: "throttler".to_string(),
        };
        MongoStore::connect(&options).await.unwrap()
    }

    fn test_key(name: &str) -> String {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        format!("throttler-test:{}:{}", name, nanos)
    }

    #[tokio::test]
    #[ignore] // Requires MongoDB
    async fn test_mongo_increment_keeps_expiry() {
        let store = connect().await;
        let key = test_key("expiry");

        let first = store.increment(&key, Duration::from_secs(60)).await.unwrap();
        assert_eq!(first.total_hits, 1);
        assert!(first.time_to_expire > 0 && first.time_to_expire <= 60);

        let second = store.increment(&key, Duration::from_secs(60)).await.unwrap();
        assert_eq!(second.total_hits, 2);
        assert!(second.time_to_expire <= first.time_to_expire);

        store.shutdown().await.unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires MongoDB
    async fn test_mongo_expired_document_restarts_window() {
        let store = connect().await;
        let key = test_key("reset");

        store.increment(&key, Duration::from_secs(1)).await.unwrap();
        store.increment(&key, Duration::from_secs(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1100)).await;

        let record = store.increment(&key, Duration::from_secs(1)).await.unwrap();
        assert_eq!(record.total_hits, 1);

        store.shutdown().await.unwrap();
    }
}
