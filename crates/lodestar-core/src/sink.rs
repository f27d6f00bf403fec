//! Bounded queue feeding the cache and pub/sub store.
//!
//! Row callbacks run inside the changefeed's frame tick and must not wait
//! on the network. They push [`SinkCommand`]s onto a bounded channel with
//! `try_send`; one worker task applies them in FIFO order. A full queue
//! drops the command and counts it. [`SinkQueue::barrier`] waits until
//! every command queued before it has been applied.

use std::sync::Arc;

use lodestar_db::CacheStore;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::metrics::GatewayMetrics;

/// One cache or publish operation.
#[derive(Debug)]
pub enum SinkCommand {
    /// Set a hash field.
    HashSet {
        /// Hash key.
        key: String,
        /// Field (entity id).
        field: String,
        /// JSON entity.
        value: String,
    },
    /// Remove a hash field.
    HashDelete {
        /// Hash key.
        key: String,
        /// Field (entity id).
        field: String,
    },
    /// Publish a payload.
    Publish {
        /// Channel (topic).
        channel: String,
        /// JSON envelope.
        payload: String,
    },
    /// Signal once every earlier command has been applied.
    Barrier(oneshot::Sender<()>),
}

/// Handle for enqueueing sink commands.
#[derive(Debug, Clone)]
pub struct SinkQueue {
    tx: mpsc::Sender<SinkCommand>,
    metrics: Arc<GatewayMetrics>,
}

impl SinkQueue {
    /// Create the queue and spawn its worker.
    ///
    /// The worker exits once every [`SinkQueue`] clone has been dropped and
    /// the remaining commands are applied.
    pub fn spawn(
        store: Arc<dyn CacheStore>,
        capacity: usize,
        metrics: Arc<GatewayMetrics>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let worker = tokio::spawn(run_worker(store, rx, Arc::clone(&metrics)));
        (Self { tx, metrics }, worker)
    }

    /// Enqueue without waiting. Returns `false` if the command was dropped.
    pub fn send(&self, command: SinkCommand) -> bool {
        match self.tx.try_send(command) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(command)) => {
                self.metrics.record_dropped();
                warn!(command = command_kind(&command), "Sink queue full, dropping command");
                false
            }
            Err(mpsc::error::TrySendError::Closed(command)) => {
                self.metrics.record_dropped();
                error!(command = command_kind(&command), "Sink worker stopped, dropping command");
                false
            }
        }
    }

    /// Wait until every command enqueued before this call has been applied.
    ///
    /// Unlike row commands, the barrier waits for queue space.
    pub async fn barrier(&self) {
        let (done, wait) = oneshot::channel();
        if self.tx.send(SinkCommand::Barrier(done)).await.is_err() {
            return;
        }
        let _ = wait.await;
    }
}

const fn command_kind(command: &SinkCommand) -> &'static str {
    match command {
        SinkCommand::HashSet { .. } => "hash_set",
        SinkCommand::HashDelete { .. } => "hash_delete",
        SinkCommand::Publish { .. } => "publish",
        SinkCommand::Barrier(_) => "barrier",
    }
}

async fn run_worker(
    store: Arc<dyn CacheStore>,
    mut rx: mpsc::Receiver<SinkCommand>,
    metrics: Arc<GatewayMetrics>,
) {
    while let Some(command) = rx.recv().await {
        match command {
            SinkCommand::HashSet { key, field, value } => {
                if let Err(e) = store.hash_set(&key, &field, &value).await {
                    metrics.record_sink_failure();
                    error!(key = %key, field = %field, error = %e, "Cache update failed");
                }
            }
            SinkCommand::HashDelete { key, field } => {
                if let Err(e) = store.hash_delete(&key, &field).await {
                    metrics.record_sink_failure();
                    error!(key = %key, field = %field, error = %e, "Cache removal failed");
                }
            }
            SinkCommand::Publish { channel, payload } => {
                match store.publish(&channel, &payload).await {
                    Ok(()) => {
                        metrics.record_published(&channel);
                        debug!(topic = %channel, "Published");
                    }
                    Err(e) => {
                        metrics.record_sink_failure();
                        error!(topic = %channel, error = %e, "Publish failed");
                    }
                }
            }
            SinkCommand::Barrier(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("Sink worker stopped");
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use lodestar_db::{CacheOp, MemoryCache};

    use super::*;

    #[tokio::test]
    async fn commands_apply_in_order() {
        let cache = Arc::new(MemoryCache::new());
        let metrics = Arc::new(GatewayMetrics::new());
        let (queue, _worker) = SinkQueue::spawn(Arc::clone(&cache) as _, 16, Arc::clone(&metrics));

        queue.send(SinkCommand::HashSet {
            key: "cache:Item:global".into(),
            field: "1".into(),
            value: "{}".into(),
        });
        queue.send(SinkCommand::HashDelete {
            key: "cache:Item:global".into(),
            field: "1".into(),
        });
        queue.send(SinkCommand::Publish {
            channel: "world.item.delete".into(),
            payload: "{}".into(),
        });
        queue.barrier().await;

        let ops = cache.ops();
        assert_eq!(ops.len(), 3);
        assert!(matches!(&ops[0], CacheOp::HashSet { .. }));
        assert!(matches!(&ops[1], CacheOp::HashDelete { .. }));
        assert!(cache.hash("cache:Item:global").is_empty());
        assert_eq!(metrics.published("world.item.delete"), 1);
    }

    #[tokio::test]
    async fn full_queue_drops_and_counts() {
        let cache = Arc::new(MemoryCache::new());
        let metrics = Arc::new(GatewayMetrics::new());
        let (queue, _worker) = SinkQueue::spawn(Arc::clone(&cache) as _, 2, Arc::clone(&metrics));

        // The worker has not run yet on this single-threaded runtime.
        let accepted = (0..5)
            .filter(|i| {
                queue.send(SinkCommand::Publish {
                    channel: "t".into(),
                    payload: i.to_string(),
                })
            })
            .count();
        assert_eq!(accepted, 2);
        assert_eq!(metrics.snapshot().dropped_sink_commands, 3);

        queue.barrier().await;
        assert_eq!(cache.published("t"), vec!["0".to_owned(), "1".to_owned()]);
    }

    #[tokio::test]
    async fn publish_failure_does_not_stop_worker() {
        let cache = Arc::new(MemoryCache::new());
        cache.set_fail_publish(true);
        let metrics = Arc::new(GatewayMetrics::new());
        let (queue, _worker) = SinkQueue::spawn(Arc::clone(&cache) as _, 8, Arc::clone(&metrics));

        queue.send(SinkCommand::Publish {
            channel: "t".into(),
            payload: "x".into(),
        });
        queue.send(SinkCommand::HashSet {
            key: "k".into(),
            field: "f".into(),
            value: "v".into(),
        });
        queue.barrier().await;

        assert_eq!(metrics.snapshot().sink_failures, 1);
        assert_eq!(cache.hash("k").get("f").map(String::as_str), Some("v"));
    }
}
