//! Store traits consumed by the gateway.
//!
//! [`CacheStore`] covers the hash cache and pub/sub channel (one `Dragonfly`
//! instance serves both). [`DurableStore`] covers batched upserts and
//! deletes against the relational store. Both are object safe so the
//! dispatcher and the writer can run against in-memory doubles in tests.

use async_trait::async_trait;

use crate::definition::{SqlValue, WriteDefinition};
use crate::error::DbError;

/// Hash cache plus publish/subscribe channel.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Set one field of a hash.
    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), DbError>;

    /// Set many fields of a hash in one round trip.
    async fn hash_set_many(&self, key: &str, entries: Vec<(String, String)>)
    -> Result<(), DbError>;

    /// Read one field of a hash.
    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, DbError>;

    /// Remove one field of a hash.
    async fn hash_delete(&self, key: &str, field: &str) -> Result<(), DbError>;

    /// Publish a payload on a channel.
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), DbError>;

    /// Delete every key matching a glob pattern. Returns the number removed.
    async fn delete_matching(&self, pattern: &str) -> Result<u64, DbError>;
}

/// Relational store accepting pre-coerced rows.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Upsert rows in a single round trip. Returns rows affected.
    async fn upsert_rows(
        &self,
        definition: &WriteDefinition,
        rows: &[Vec<SqlValue>],
    ) -> Result<u64, DbError>;

    /// Delete the row with the given primary key. Returns rows affected.
    async fn delete_row(&self, definition: &WriteDefinition, id: &str) -> Result<u64, DbError>;
}
