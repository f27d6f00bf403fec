//! Buffered durable writes.
//!
//! The row-event hot path never writes to the durable store directly. It
//! enqueues into [`BufferedWriter`], which keeps one pending operation per
//! `{Type}:{Id}` key (the last one enqueued wins) and flushes the whole
//! buffer on a fixed period.
//!
//! # Flush
//!
//! ```text
//! buffer (key -> PendingWrite) --take--> generation
//!     |
//!     +-- group by (type, delete?)
//!         |-- deletes: one statement per id
//!         +-- upserts: one multi-row upsert per chunk of `chunk_size`
//! ```
//!
//! Enqueueing never blocks. When the buffer grows past its soft limit an
//! early flush is requested instead of waiting for the next period.

use std::collections::{BTreeMap, HashMap};
use std::mem;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use lodestar_types::DurableRecord;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::definition::{DefinitionCache, SqlValue, WriteDefinition};
use crate::error::DbError;
use crate::store::DurableStore;

/// Default flush period.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Default rows per multi-row upsert.
pub const DEFAULT_CHUNK_SIZE: usize = 500;

/// Default buffered key count that triggers an early flush.
pub const DEFAULT_SOFT_LIMIT: usize = 50_000;

/// Tunables for [`BufferedWriter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriterConfig {
    /// Period of the flush loop.
    pub flush_interval: Duration,
    /// Rows per upsert round trip.
    pub chunk_size: usize,
    /// Buffered key count that requests an early flush.
    pub soft_limit: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            chunk_size: DEFAULT_CHUNK_SIZE,
            soft_limit: DEFAULT_SOFT_LIMIT,
        }
    }
}

enum PendingOp {
    Upsert(Vec<SqlValue>),
    Delete(String),
}

struct PendingWrite {
    definition: Arc<WriteDefinition>,
    op: PendingOp,
}

/// Counters describing writer activity.
#[derive(Debug, Default)]
pub struct WriterStats {
    flushed_rows: AtomicU64,
    failed_writes: AtomicU64,
    flushes: AtomicU64,
    superseded: AtomicU64,
}

impl WriterStats {
    /// Rows written by flushes and direct writes.
    pub fn flushed_rows(&self) -> u64 {
        self.flushed_rows.load(Ordering::Relaxed)
    }

    /// Rows whose write failed and was dropped.
    pub fn failed_writes(&self) -> u64 {
        self.failed_writes.load(Ordering::Relaxed)
    }

    /// Completed flush passes that found work.
    pub fn flushes(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }

    /// Enqueued operations replaced by a later one for the same key.
    pub fn superseded(&self) -> u64 {
        self.superseded.load(Ordering::Relaxed)
    }

    fn add_written(&self, n: usize) {
        self.flushed_rows
            .fetch_add(u64::try_from(n).unwrap_or(u64::MAX), Ordering::Relaxed);
    }

    fn add_failed(&self, n: usize) {
        self.failed_writes
            .fetch_add(u64::try_from(n).unwrap_or(u64::MAX), Ordering::Relaxed);
    }
}

struct FlushTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Buffers keyed durable writes and flushes them in batches.
pub struct BufferedWriter {
    store: Arc<dyn DurableStore>,
    definitions: DefinitionCache,
    config: WriterConfig,
    buffer: Mutex<HashMap<String, PendingWrite>>,
    flush_pass: tokio::sync::Mutex<()>,
    early_flush: Notify,
    flush_task: Mutex<Option<FlushTask>>,
    stats: WriterStats,
}

impl BufferedWriter {
    /// Create a writer over a durable store.
    pub fn new(store: Arc<dyn DurableStore>, config: WriterConfig) -> Self {
        Self {
            store,
            definitions: DefinitionCache::new(),
            config,
            buffer: Mutex::new(HashMap::new()),
            flush_pass: tokio::sync::Mutex::new(()),
            early_flush: Notify::new(),
            flush_task: Mutex::new(None),
            stats: WriterStats::default(),
        }
    }

    /// Activity counters.
    pub const fn stats(&self) -> &WriterStats {
        &self.stats
    }

    /// Number of keys waiting for the next flush.
    pub fn pending(&self) -> usize {
        self.buffer.lock().len()
    }

    /// Buffer an upsert, replacing any pending operation for the same key.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the record cannot be encoded for its table.
    pub fn enqueue_upsert<T: DurableRecord>(&self, record: &T) -> Result<(), DbError> {
        let definition = self.definitions.get::<T>()?;
        let row = definition.row_of(record)?;
        self.put(
            record.buffer_key(),
            PendingWrite {
                definition,
                op: PendingOp::Upsert(row),
            },
        );
        Ok(())
    }

    /// Buffer a delete, replacing any pending operation for the same key.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the type's write definition is invalid.
    pub fn enqueue_delete<T: DurableRecord>(&self, record: &T) -> Result<(), DbError> {
        let definition = self.definitions.get::<T>()?;
        self.put(
            record.buffer_key(),
            PendingWrite {
                definition,
                op: PendingOp::Delete(record.id().to_owned()),
            },
        );
        Ok(())
    }

    fn put(&self, key: String, write: PendingWrite) {
        let len = {
            let mut buffer = self.buffer.lock();
            if buffer.insert(key, write).is_some() {
                self.stats.superseded.fetch_add(1, Ordering::Relaxed);
            }
            buffer.len()
        };
        if len >= self.config.soft_limit {
            self.early_flush.notify_one();
        }
    }

    /// Write one record immediately. Failures are logged, not returned.
    pub async fn upsert_now<T: DurableRecord>(&self, record: &T) {
        let result = match self.definitions.get::<T>() {
            Ok(definition) => match definition.row_of(record) {
                Ok(row) => self.store.upsert_rows(&definition, &[row]).await,
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };
        match result {
            Ok(_) => self.stats.add_written(1),
            Err(e) => {
                self.stats.add_failed(1);
                error!(
                    entity = T::META.type_name,
                    id = record.id(),
                    error = %e,
                    "Direct upsert failed"
                );
            }
        }
    }

    /// Delete one record immediately. Failures are logged, not returned.
    pub async fn delete_now<T: DurableRecord>(&self, record: &T) {
        let result = match self.definitions.get::<T>() {
            Ok(definition) => self.store.delete_row(&definition, record.id()).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            self.stats.add_failed(1);
            error!(
                entity = T::META.type_name,
                id = record.id(),
                error = %e,
                "Direct delete failed"
            );
        }
    }

    /// Upsert many records immediately in chunks. Records that fail to
    /// encode are skipped; failed chunks are logged. Returns rows written.
    pub async fn bulk_upsert_now<T: DurableRecord>(&self, records: &[T]) -> usize {
        if records.is_empty() {
            return 0;
        }
        let definition = match self.definitions.get::<T>() {
            Ok(d) => d,
            Err(e) => {
                self.stats.add_failed(records.len());
                error!(entity = T::META.type_name, error = %e, "Bulk upsert skipped");
                return 0;
            }
        };
        let mut rows = Vec::with_capacity(records.len());
        for record in records {
            match definition.row_of(record) {
                Ok(row) => rows.push(row),
                Err(e) => {
                    self.stats.add_failed(1);
                    warn!(
                        entity = T::META.type_name,
                        id = record.id(),
                        error = %e,
                        "Skipping unencodable record"
                    );
                }
            }
        }
        self.write_chunks(&definition, &rows).await
    }

    async fn write_chunks(&self, definition: &WriteDefinition, rows: &[Vec<SqlValue>]) -> usize {
        let mut written = 0_usize;
        for chunk in rows.chunks(self.config.chunk_size.max(1)) {
            match self.store.upsert_rows(definition, chunk).await {
                Ok(_) => {
                    written = written.saturating_add(chunk.len());
                    self.stats.add_written(chunk.len());
                }
                Err(e) => {
                    self.stats.add_failed(chunk.len());
                    error!(
                        entity = definition.type_name,
                        rows = chunk.len(),
                        error = %e,
                        "Upsert chunk failed"
                    );
                }
            }
        }
        written
    }

    /// Claim the whole buffer and write it. Concurrent callers are
    /// serialized; each claimed key is written by exactly one pass.
    pub async fn flush(&self) {
        let _pass = self.flush_pass.lock().await;
        let generation = mem::take(&mut *self.buffer.lock());
        if generation.is_empty() {
            return;
        }
        let claimed = generation.len();

        let mut upserts: BTreeMap<&'static str, (Arc<WriteDefinition>, Vec<Vec<SqlValue>>)> =
            BTreeMap::new();
        let mut deletes: BTreeMap<&'static str, (Arc<WriteDefinition>, Vec<String>)> =
            BTreeMap::new();
        for write in generation.into_values() {
            let name = write.definition.type_name;
            match write.op {
                PendingOp::Upsert(row) => upserts
                    .entry(name)
                    .or_insert_with(|| (Arc::clone(&write.definition), Vec::new()))
                    .1
                    .push(row),
                PendingOp::Delete(id) => deletes
                    .entry(name)
                    .or_insert_with(|| (Arc::clone(&write.definition), Vec::new()))
                    .1
                    .push(id),
            }
        }

        for (definition, ids) in deletes.values() {
            for id in ids {
                match self.store.delete_row(definition, id).await {
                    Ok(_) => self.stats.add_written(1),
                    Err(e) => {
                        self.stats.add_failed(1);
                        error!(entity = definition.type_name, id, error = %e, "Delete failed");
                    }
                }
            }
        }
        for (definition, rows) in upserts.values() {
            self.write_chunks(definition, rows).await;
        }

        self.stats.flushes.fetch_add(1, Ordering::Relaxed);
        debug!(keys = claimed, "Flushed write buffer");
    }

    /// Start the periodic flush loop. Does nothing if it is already running.
    pub fn start_flush_loop(self: &Arc<Self>) {
        let mut task = self.flush_task.lock();
        if task.is_some() {
            debug!("Flush loop already running");
            return;
        }
        let token = CancellationToken::new();
        let writer = Arc::clone(self);
        let loop_token = token.clone();
        let handle = tokio::spawn(async move { writer.run_flush_loop(loop_token).await });
        *task = Some(FlushTask { token, handle });
        info!(
            interval_ms = u64::try_from(self.config.flush_interval.as_millis()).unwrap_or(u64::MAX),
            "Flush loop started"
        );
    }

    async fn run_flush_loop(&self, token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            tokio::select! {
                () = token.cancelled() => break,
                _ = ticker.tick() => {}
                () = self.early_flush.notified() => {
                    debug!("Early flush requested");
                }
            }
            self.flush().await;
        }
    }

    /// Stop the flush loop, wait for any in-flight flush, then flush once
    /// more so nothing buffered is left behind.
    pub async fn stop_flush_loop(&self) {
        let task = self.flush_task.lock().take();
        if let Some(FlushTask { token, handle }) = task {
            token.cancel();
            if let Err(e) = handle.await {
                warn!(error = %e, "Flush loop task ended abnormally");
            }
            info!("Flush loop stopped");
        }
        self.flush().await;
    }

    /// Whether the periodic flush loop is running.
    pub fn is_flushing(&self) -> bool {
        self.flush_task.lock().is_some()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use lodestar_types::entities::{Item, ItemRarity};

    use super::*;
    use crate::memory::MemoryStore;

    fn item(id: &str) -> Item {
        Item {
            id: id.into(),
            module: "m1".into(),
            name: format!("item {id}"),
            description: String::new(),
            volume: 1,
            tier: 1,
            rarity: ItemRarity::Common,
            item_list_id: 0,
            has_compendium_entry: false,
        }
    }

    fn writer(store: &Arc<MemoryStore>) -> BufferedWriter {
        BufferedWriter::new(Arc::clone(store) as Arc<dyn DurableStore>, WriterConfig::default())
    }

    #[tokio::test]
    async fn upsert_then_delete_leaves_no_row() {
        let store = Arc::new(MemoryStore::new());
        let writer = writer(&store);
        writer.enqueue_upsert(&item("42")).unwrap();
        writer.enqueue_delete(&item("42")).unwrap();
        assert_eq!(writer.pending(), 1);
        writer.flush().await;
        assert!(store.row("items", "42").is_none());
        assert_eq!(store.upsert_calls(), 0);
        assert_eq!(store.delete_calls(), 1);
    }

    #[tokio::test]
    async fn last_upsert_wins() {
        let store = Arc::new(MemoryStore::new());
        let writer = writer(&store);
        let mut first = item("7");
        first.tier = 1;
        let mut second = item("7");
        second.tier = 9;
        writer.enqueue_upsert(&first).unwrap();
        writer.enqueue_upsert(&second).unwrap();
        writer.flush().await;
        let row = store.row("items", "7").unwrap();
        assert_eq!(row.get(5), Some(&SqlValue::Int4(Some(9))));
        assert_eq!(writer.stats().superseded(), 1);
    }

    #[tokio::test]
    async fn delete_then_reinsert_keeps_the_row() {
        let store = Arc::new(MemoryStore::new());
        let writer = writer(&store);
        writer.enqueue_delete(&item("3")).unwrap();
        writer.enqueue_upsert(&item("3")).unwrap();
        writer.flush().await;
        assert!(store.row("items", "3").is_some());
    }

    #[tokio::test]
    async fn bulk_upsert_chunks_round_trips() {
        let store = Arc::new(MemoryStore::new());
        let writer = writer(&store);
        let items: Vec<Item> = (0..1200).map(|i| item(&i.to_string())).collect();
        let written = writer.bulk_upsert_now(&items).await;
        assert_eq!(written, 1200);
        assert_eq!(store.upsert_batch_sizes(), vec![500, 500, 200]);
    }

    #[tokio::test]
    async fn flush_failure_is_logged_and_dropped() {
        let store = Arc::new(MemoryStore::new());
        let writer = writer(&store);
        store.set_failing(true);
        writer.enqueue_upsert(&item("1")).unwrap();
        writer.flush().await;
        assert_eq!(writer.pending(), 0);
        assert_eq!(writer.stats().failed_writes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn flush_loop_runs_on_its_period() {
        let store = Arc::new(MemoryStore::new());
        let writer = Arc::new(writer(&store));
        writer.start_flush_loop();
        writer.enqueue_upsert(&item("1")).unwrap();
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(store.row("items", "1").is_some());
        writer.stop_flush_loop().await;
        assert!(!writer.is_flushing());
    }

    #[tokio::test]
    async fn soft_limit_requests_early_flush() {
        let store = Arc::new(MemoryStore::new());
        let writer = Arc::new(BufferedWriter::new(
            Arc::clone(&store) as Arc<dyn DurableStore>,
            WriterConfig {
                flush_interval: Duration::from_secs(3600),
                chunk_size: 500,
                soft_limit: 2,
            },
        ));
        writer.start_flush_loop();
        writer.enqueue_upsert(&item("1")).unwrap();
        writer.enqueue_upsert(&item("2")).unwrap();
        for _ in 0..100 {
            if writer.pending() == 0 && store.upsert_calls() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(store.row_count("items"), 2);
        writer.stop_flush_loop().await;
    }
}
