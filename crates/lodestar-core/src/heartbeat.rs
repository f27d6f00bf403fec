//! Per-epoch liveness heartbeat.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use lodestar_changefeed::ChangefeedLink;
use lodestar_types::HeartbeatEvent;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dispatcher::DispatchSinks;

/// Publish a [`HeartbeatEvent`] every `interval` until `cancel` fires or
/// the link goes inactive. Sequence numbers start at 0. The task resolves
/// to the number of heartbeats sent.
pub fn spawn_heartbeat(
    sinks: Arc<DispatchSinks>,
    link: Arc<dyn ChangefeedLink>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<u64> {
    tokio::spawn(async move {
        let application = format!("gateway-{}", sinks.module());
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        let mut seq = 0_u64;
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if !link.is_active() {
                debug!("Link inactive, stopping heartbeat");
                break;
            }
            let event = HeartbeatEvent {
                application: application.clone(),
                published_at: Utc::now(),
                seq,
            };
            if sinks.publish_system(&event) {
                info!(seq, "Heartbeat {seq}");
            } else {
                warn!(seq, "Heartbeat not queued");
            }
            seq = seq.saturating_add(1);
        }
        seq
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use lodestar_changefeed::{ConnectParams, ConnectionCallbacks, Connector, MemoryConnector};
    use lodestar_db::{BufferedWriter, MemoryCache, MemoryStore, WriterConfig};
    use lodestar_types::SystemEvent;
    use serde_json::Value;

    use super::*;
    use crate::metrics::GatewayMetrics;
    use crate::sink::SinkQueue;

    fn sinks(cache: &Arc<MemoryCache>) -> Arc<DispatchSinks> {
        let metrics = Arc::new(GatewayMetrics::new());
        let (queue, _worker) = SinkQueue::spawn(Arc::clone(cache) as _, 64, Arc::clone(&metrics));
        let writer = Arc::new(BufferedWriter::new(
            Arc::new(MemoryStore::new()),
            WriterConfig::default(),
        ));
        Arc::new(DispatchSinks::new("m1", queue, Arc::clone(cache) as _, writer, metrics))
    }

    fn link(connector: &MemoryConnector) -> Arc<dyn ChangefeedLink> {
        let params = ConnectParams {
            uri: "memory://".into(),
            module: "m1".into(),
            token: "t".into(),
        };
        let link = connector
            .connect(
                &params,
                ConnectionCallbacks {
                    on_connect: Box::new(|_| {}),
                    on_connect_error: Box::new(|_| {}),
                    on_disconnect: Box::new(|_| {}),
                },
            )
            .unwrap();
        link.frame_tick().unwrap();
        link
    }

    #[tokio::test(start_paused = true)]
    async fn beats_every_interval_from_zero() {
        let cache = Arc::new(MemoryCache::new());
        let sinks = sinks(&cache);
        let connector = MemoryConnector::new();
        let cancel = CancellationToken::new();
        let task = spawn_heartbeat(
            Arc::clone(&sinks),
            link(&connector),
            Duration::from_secs(10),
            cancel.clone(),
        );

        time::sleep(Duration::from_secs(35)).await;
        cancel.cancel();
        assert_eq!(task.await.unwrap(), 3);
        sinks.queue().barrier().await;

        let beats = cache.published(&HeartbeatEvent::topic());
        assert_eq!(beats.len(), 3);
        let first: Value = serde_json::from_str(&beats[0]).unwrap();
        assert_eq!(first["entity"]["seq"], 0);
        assert_eq!(first["entity"]["application"], "gateway-m1");
        assert_eq!(first["callerIdentity"], "SYSTEM");
        assert_eq!(first["action"], "SYSTEM");
        let last: Value = serde_json::from_str(&beats[2]).unwrap();
        assert_eq!(last["entity"]["seq"], 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_when_link_goes_inactive() {
        let cache = Arc::new(MemoryCache::new());
        let connector = MemoryConnector::new();
        let link = link(&connector);
        let task = spawn_heartbeat(
            sinks(&cache),
            Arc::clone(&link),
            Duration::from_secs(10),
            CancellationToken::new(),
        );

        time::sleep(Duration::from_secs(15)).await;
        link.disconnect();
        link.frame_tick().unwrap();
        assert!(!link.is_active());

        let sent = time::timeout(Duration::from_secs(30), task).await.unwrap().unwrap();
        assert_eq!(sent, 1);
    }
}
