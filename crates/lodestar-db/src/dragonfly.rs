//! `Dragonfly` (Redis-compatible) cache and pub/sub operations.
//!
//! One `Dragonfly` instance holds the snapshot cache and carries the
//! pub/sub channel downstream consumers listen on.
//!
//! # Key Patterns
//!
//! | Pattern | Type | Description |
//! |---------|------|-------------|
//! | `cache:{Type}:global` | Hash | Entities of a global type, field = entity id |
//! | `cache:{Type}:{module}` | Hash | Entities of a module-scoped type |
//!
//! # Channels
//!
//! | Pattern | Payload |
//! |---------|---------|
//! | `{topic}.insert` / `.update` / `.delete` | Entity envelope |
//! | `system.{EventType}` | System event envelope |

use std::collections::HashMap;

use async_trait::async_trait;
use fred::prelude::*;
use fred::types::Key;
use futures_util::TryStreamExt;

use crate::error::DbError;
use crate::store::CacheStore;

/// Keys requested per `SCAN` page during invalidation.
const SCAN_PAGE: u32 = 500;

/// Connection handle to a `Dragonfly` (Redis-compatible) instance.
///
/// Wraps a [`fred::prelude::Client`] and implements [`CacheStore`] over
/// the key patterns listed above.
#[derive(Clone)]
pub struct DragonflyPool {
    client: Client,
}

impl DragonflyPool {
    /// Connect to `Dragonfly` at the given URL.
    ///
    /// The URL should follow the Redis URL scheme:
    /// `redis://host:port` or `redis://host:port/db`
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Config`] if the URL cannot be parsed.
    /// Returns [`DbError::Dragonfly`] if the connection fails.
    pub async fn connect(url: &str) -> Result<Self, DbError> {
        let config = Config::from_url(url)
            .map_err(|e| DbError::Config(format!("Invalid Dragonfly URL: {e}")))?;

        let client = Builder::from_config(config).build()?;
        client.init().await?;

        tracing::info!("Connected to Dragonfly");
        Ok(Self { client })
    }

    /// Close the connection.
    pub async fn close(&self) {
        if let Err(e) = self.client.quit().await {
            tracing::warn!(error = %e, "Dragonfly quit failed");
        }
    }
}

#[async_trait]
impl CacheStore for DragonflyPool {
    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), DbError> {
        let mut entry = HashMap::with_capacity(1);
        entry.insert(field, value);
        let _: i64 = self.client.hset(key, entry).await?;
        Ok(())
    }

    async fn hash_set_many(
        &self,
        key: &str,
        entries: Vec<(String, String)>,
    ) -> Result<(), DbError> {
        if entries.is_empty() {
            return Ok(());
        }
        let map: HashMap<String, String> = entries.into_iter().collect();
        let _: i64 = self.client.hset(key, map).await?;
        Ok(())
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, DbError> {
        Ok(self.client.hget(key, field).await?)
    }

    async fn hash_delete(&self, key: &str, field: &str) -> Result<(), DbError> {
        let _: i64 = self.client.hdel(key, field).await?;
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<(), DbError> {
        let _: i64 = self.client.publish(channel, payload).await?;
        Ok(())
    }

    async fn delete_matching(&self, pattern: &str) -> Result<u64, DbError> {
        let keys: Vec<Key> = self
            .client
            .scan_buffered(pattern, Some(SCAN_PAGE), None)
            .try_collect()
            .await?;
        if keys.is_empty() {
            return Ok(0);
        }
        let removed: u64 = self.client.del(keys).await?;
        tracing::debug!(pattern, removed, "Invalidated cache keys");
        Ok(removed)
    }
}
