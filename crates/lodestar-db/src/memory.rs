//! In-memory store doubles.
//!
//! [`MemoryCache`] and [`MemoryStore`] implement the store traits over
//! plain maps and record every call, so pipeline tests can assert on
//! ordering and round-trip counts without live services.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::definition::{SqlValue, WriteDefinition};
use crate::error::DbError;
use crate::store::{CacheStore, DurableStore};

/// One recorded cache operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheOp {
    /// Hash field set.
    HashSet {
        /// Hash key.
        key: String,
        /// Field.
        field: String,
    },
    /// Hash field removed.
    HashDelete {
        /// Hash key.
        key: String,
        /// Field.
        field: String,
    },
    /// Payload published.
    Publish {
        /// Channel.
        channel: String,
        /// Payload.
        payload: String,
    },
    /// Keys matching a pattern removed.
    DeleteMatching {
        /// Glob pattern.
        pattern: String,
    },
}

/// Hash cache and pub/sub channel held in memory.
#[derive(Debug, Default)]
pub struct MemoryCache {
    hashes: Mutex<HashMap<String, HashMap<String, String>>>,
    ops: Mutex<Vec<CacheOp>>,
    fail_publish: AtomicBool,
    fail_hashes: AtomicBool,
}

impl MemoryCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every publish fail.
    pub fn set_fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Make every hash operation fail.
    pub fn set_fail_hashes(&self, fail: bool) {
        self.fail_hashes.store(fail, Ordering::SeqCst);
    }

    /// Every operation applied so far, in order.
    pub fn ops(&self) -> Vec<CacheOp> {
        self.ops.lock().clone()
    }

    /// Payloads published on a channel, in order.
    pub fn published(&self, channel: &str) -> Vec<String> {
        self.ops
            .lock()
            .iter()
            .filter_map(|op| match op {
                CacheOp::Publish { channel: c, payload } if c == channel => Some(payload.clone()),
                _ => None,
            })
            .collect()
    }

    /// Channels published to, in order.
    pub fn channels(&self) -> Vec<String> {
        self.ops
            .lock()
            .iter()
            .filter_map(|op| match op {
                CacheOp::Publish { channel, .. } => Some(channel.clone()),
                _ => None,
            })
            .collect()
    }

    /// Snapshot of one hash.
    pub fn hash(&self, key: &str) -> HashMap<String, String> {
        self.hashes.lock().get(key).cloned().unwrap_or_default()
    }

    /// Pre-populate a hash field without recording an operation.
    pub fn seed(&self, key: &str, field: &str, value: &str) {
        self.hashes
            .lock()
            .entry(key.to_owned())
            .or_default()
            .insert(field.to_owned(), value.to_owned());
    }

    fn check_hashes(&self) -> Result<(), DbError> {
        if self.fail_hashes.load(Ordering::SeqCst) {
            return Err(DbError::Config("hash operations disabled".to_owned()));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), DbError> {
        self.check_hashes()?;
        self.seed(key, field, value);
        self.ops.lock().push(CacheOp::HashSet {
            key: key.to_owned(),
            field: field.to_owned(),
        });
        Ok(())
    }

    async fn hash_set_many(
        &self,
        key: &str,
        entries: Vec<(String, String)>,
    ) -> Result<(), DbError> {
        self.check_hashes()?;
        let mut hashes = self.hashes.lock();
        let hash = hashes.entry(key.to_owned()).or_default();
        let mut ops = self.ops.lock();
        for (field, value) in entries {
            ops.push(CacheOp::HashSet {
                key: key.to_owned(),
                field: field.clone(),
            });
            hash.insert(field, value);
        }
        Ok(())
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, DbError> {
        self.check_hashes()?;
        Ok(self
            .hashes
            .lock()
            .get(key)
            .and_then(|h| h.get(field).cloned()))
    }

    async fn hash_delete(&self, key: &str, field: &str) -> Result<(), DbError> {
        self.check_hashes()?;
        if let Some(hash) = self.hashes.lock().get_mut(key) {
            hash.remove(field);
        }
        self.ops.lock().push(CacheOp::HashDelete {
            key: key.to_owned(),
            field: field.to_owned(),
        });
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<(), DbError> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(DbError::Config("publish disabled".to_owned()));
        }
        self.ops.lock().push(CacheOp::Publish {
            channel: channel.to_owned(),
            payload: payload.to_owned(),
        });
        Ok(())
    }

    async fn delete_matching(&self, pattern: &str) -> Result<u64, DbError> {
        self.check_hashes()?;
        let removed = {
            let mut hashes = self.hashes.lock();
            let before = hashes.len();
            hashes.retain(|key, _| !glob_match(pattern, key));
            before.saturating_sub(hashes.len())
        };
        self.ops.lock().push(CacheOp::DeleteMatching {
            pattern: pattern.to_owned(),
        });
        Ok(u64::try_from(removed).unwrap_or(u64::MAX))
    }
}

/// Match `text` against a glob where `*` matches any run of characters.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let mut parts = pattern.split('*');
    let Some(first) = parts.next() else {
        return text.is_empty();
    };
    let Some(mut rest) = text.strip_prefix(first) else {
        return false;
    };
    let segments: Vec<&str> = parts.collect();
    let Some((last, middle)) = segments.split_last() else {
        return rest.is_empty();
    };
    for segment in middle {
        match rest.find(segment) {
            Some(pos) => rest = rest.get(pos.saturating_add(segment.len())..).unwrap_or(""),
            None => return false,
        }
    }
    rest.ends_with(last)
}

/// One recorded durable-store call.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreCall {
    /// Multi-row upsert.
    Upsert {
        /// Target table.
        table: &'static str,
        /// Rows in the round trip.
        rows: usize,
    },
    /// Single-row delete.
    Delete {
        /// Target table.
        table: &'static str,
        /// Primary key.
        id: String,
    },
}

/// Durable store held in memory, keyed by table then id.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<&'static str, BTreeMap<String, Vec<SqlValue>>>>,
    calls: Mutex<Vec<StoreCall>>,
    failing: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Current row for an id.
    pub fn row(&self, table: &str, id: &str) -> Option<Vec<SqlValue>> {
        self.tables.lock().get(table).and_then(|t| t.get(id).cloned())
    }

    /// Number of rows in a table.
    pub fn row_count(&self, table: &str) -> usize {
        self.tables.lock().get(table).map_or(0, BTreeMap::len)
    }

    /// Every call, in order.
    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().clone()
    }

    /// Number of upsert round trips.
    pub fn upsert_calls(&self) -> usize {
        self.upsert_batch_sizes().len()
    }

    /// Row counts of each upsert round trip, in order.
    pub fn upsert_batch_sizes(&self) -> Vec<usize> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                StoreCall::Upsert { rows, .. } => Some(*rows),
                StoreCall::Delete { .. } => None,
            })
            .collect()
    }

    /// Number of delete round trips.
    pub fn delete_calls(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, StoreCall::Delete { .. }))
            .count()
    }

    fn check(&self) -> Result<(), DbError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(DbError::Config("store unavailable".to_owned()));
        }
        Ok(())
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn upsert_rows(
        &self,
        definition: &WriteDefinition,
        rows: &[Vec<SqlValue>],
    ) -> Result<u64, DbError> {
        self.check()?;
        self.calls.lock().push(StoreCall::Upsert {
            table: definition.table,
            rows: rows.len(),
        });
        let mut tables = self.tables.lock();
        let table = tables.entry(definition.table).or_default();
        for row in rows {
            let id = row
                .first()
                .and_then(SqlValue::as_text)
                .ok_or_else(|| DbError::Config("row has no text id".to_owned()))?;
            table.insert(id.to_owned(), row.clone());
        }
        Ok(u64::try_from(rows.len()).unwrap_or(u64::MAX))
    }

    async fn delete_row(&self, definition: &WriteDefinition, id: &str) -> Result<u64, DbError> {
        self.check()?;
        self.calls.lock().push(StoreCall::Delete {
            table: definition.table,
            id: id.to_owned(),
        });
        let removed = self
            .tables
            .lock()
            .get_mut(definition.table)
            .and_then(|t| t.remove(id));
        Ok(u64::from(removed.is_some()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_matches_module_keys() {
        assert!(glob_match("cache:*:m1", "cache:ChatMessage:m1"));
        assert!(!glob_match("cache:*:m1", "cache:ChatMessage:m2"));
        assert!(!glob_match("cache:*:m1", "cache:Item:global"));
        assert!(glob_match("exact", "exact"));
        assert!(glob_match("*", "anything"));
    }
}
