//! Per-epoch pipeline sequencing.
//!
//! For every connection epoch published in the [`ConnectionSlot`]:
//!
//! 1. subscribe to the catalog queries;
//! 2. on "applied", snapshot the tables and attach gated handlers, then log
//!    the signed-in identity;
//! 3. wait for the previous epoch's queued sink commands, run base
//!    population, start the heartbeat, open the gate, and start the
//!    writer's flush loop;
//! 4. poll the slot until the epoch is replaced or shutdown is requested,
//!    then tear the epoch down and wait for the next one.
//!
//! A rejected subscription is logged and leaves the connection alone.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use lodestar_changefeed::{ChangefeedLink, SubscriptionHandlers};
use tokio::sync::oneshot;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::catalog::{log_identity, subscription_queries};
use crate::config::GatewayConfig;
use crate::dispatcher::{ChangeDispatcher, PreparedEpoch};
use crate::heartbeat::spawn_heartbeat;
use crate::slot::{ConnectionEpoch, ConnectionSlot};

/// Orchestrator failures. Everything else is contained per epoch.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The epoch activation task panicked or was aborted.
    #[error("epoch activation task failed: {0}")]
    EpochTask(#[from] JoinError),
}

/// Timing knobs.
#[derive(Debug, Clone, Copy)]
pub struct OrchestratorConfig {
    /// Heartbeat period.
    pub heartbeat_interval: Duration,
    /// How often the slot is checked for an epoch change.
    pub epoch_poll_interval: Duration,
}

impl OrchestratorConfig {
    /// Derive from the gateway configuration.
    pub const fn from_gateway(config: &GatewayConfig) -> Self {
        Self {
            heartbeat_interval: config.pipeline.heartbeat_interval(),
            epoch_poll_interval: config.pipeline.epoch_poll_interval(),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(10),
            epoch_poll_interval: Duration::from_secs(1),
        }
    }
}

struct ActiveEpoch {
    prepared: PreparedEpoch,
    heartbeat: Option<JoinHandle<u64>>,
}

/// Drives the pipeline for each connection epoch.
#[derive(Debug)]
pub struct GatewayOrchestrator {
    dispatcher: Arc<ChangeDispatcher>,
    slot: Arc<ConnectionSlot>,
    config: OrchestratorConfig,
    shutdown: CancellationToken,
}

impl GatewayOrchestrator {
    /// Create an orchestrator watching `slot`.
    pub const fn new(
        dispatcher: Arc<ChangeDispatcher>,
        slot: Arc<ConnectionSlot>,
        config: OrchestratorConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            dispatcher,
            slot,
            config,
            shutdown,
        }
    }

    /// Run epochs until shutdown.
    ///
    /// A slot cleared before its epoch was observed sends the loop back to
    /// waiting; only the shutdown token ends it.
    pub async fn run(&self) -> Result<(), GatewayError> {
        info!("Orchestrator started");
        while !self.shutdown.is_cancelled() {
            let Some(epoch) = self.slot.await_connection(&self.shutdown).await else {
                debug!("Connection slot cleared, waiting for the next epoch");
                continue;
            };
            self.run_epoch(&epoch).await?;
        }
        info!("Orchestrator stopped");
        Ok(())
    }

    async fn run_epoch(&self, epoch: &ConnectionEpoch) -> Result<(), GatewayError> {
        let id = epoch.id();
        let link = Arc::clone(epoch.link());
        let epoch_token = self.shutdown.child_token();
        info!(epoch = id, "Connection epoch started");

        let (applied_tx, applied_rx) = oneshot::channel();
        self.subscribe(id, &link, applied_tx);
        let activation = tokio::spawn(activate(
            Arc::clone(&self.dispatcher),
            Arc::clone(&link),
            self.config.heartbeat_interval,
            applied_rx,
            epoch_token.clone(),
        ));

        self.wait_for_epoch_end(id).await;

        epoch_token.cancel();
        let active = activation.await?;
        if let Some(ActiveEpoch {
            prepared,
            heartbeat,
        }) = active
        {
            prepared.close();
            if let Some(task) = heartbeat {
                match task.await {
                    Ok(beats) => debug!(epoch = id, beats, "Heartbeat stopped"),
                    Err(e) => warn!(epoch = id, error = %e, "Heartbeat task ended abnormally"),
                }
            }
        }
        self.dispatcher.sinks().writer().stop_flush_loop().await;
        info!(epoch = id, "Connection epoch ended");
        Ok(())
    }

    fn subscribe(
        &self,
        epoch_id: u64,
        link: &Arc<dyn ChangefeedLink>,
        applied_tx: oneshot::Sender<PreparedEpoch>,
    ) {
        let queries = subscription_queries(self.dispatcher.registry(), Utc::now());
        let dispatcher = Arc::clone(&self.dispatcher);
        let applied_link = Arc::clone(link);
        let handlers = SubscriptionHandlers {
            on_applied: Box::new(move || {
                let prepared = dispatcher.prepare(applied_link.as_ref());
                log_identity(applied_link.as_ref());
                if let Err(prepared) = applied_tx.send(prepared) {
                    prepared.close();
                }
            }),
            on_error: Box::new(move |e| {
                error!(epoch = epoch_id, error = %e, "Subscription rejected");
            }),
        };
        match link.subscribe(&queries, handlers) {
            Ok(()) => info!(epoch = epoch_id, queries = queries.len(), "Subscription issued"),
            Err(e) => error!(epoch = epoch_id, error = %e, "Failed to issue subscription"),
        }
    }

    async fn wait_for_epoch_end(&self, epoch_id: u64) {
        let mut poll = time::interval(self.config.epoch_poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => return,
                _ = poll.tick() => {}
            }
            if !self.slot.is_current(epoch_id) {
                debug!(epoch = epoch_id, "Epoch replaced");
                return;
            }
        }
    }
}

async fn activate(
    dispatcher: Arc<ChangeDispatcher>,
    link: Arc<dyn ChangefeedLink>,
    heartbeat_interval: Duration,
    mut applied: oneshot::Receiver<PreparedEpoch>,
    token: CancellationToken,
) -> Option<ActiveEpoch> {
    let prepared = tokio::select! {
        biased;
        () = token.cancelled() => {
            if let Ok(prepared) = applied.try_recv() {
                prepared.close();
            }
            return None;
        }
        result = &mut applied => match result {
            Ok(prepared) => prepared,
            Err(_) => {
                debug!("Subscription ended without being applied");
                return None;
            }
        },
    };
    info!(
        routes = prepared.route_count(),
        rows = prepared.snapshot_rows(),
        "Subscription applied"
    );

    let sinks = Arc::clone(dispatcher.sinks());
    sinks.queue().barrier().await;
    dispatcher.populate_base(&prepared).await;
    if token.is_cancelled() {
        return Some(ActiveEpoch {
            prepared,
            heartbeat: None,
        });
    }

    let heartbeat = spawn_heartbeat(Arc::clone(&sinks), link, heartbeat_interval, token);
    dispatcher.activate(&prepared);
    sinks.writer().start_flush_loop();
    Some(ActiveEpoch {
        prepared,
        heartbeat: Some(heartbeat),
    })
}
