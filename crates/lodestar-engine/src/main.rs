//! Lodestar gateway binary.
//!
//! Wires the changefeed connection, the dispatch pipeline, and the cache
//! and durable stores together, then runs until Ctrl-C or until the
//! reconnect schedule is exhausted.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `lodestar.yaml` (or defaults) plus the
//!    environment, and validate it
//! 2. Initialize structured logging (tracing)
//! 3. Connect to Dragonfly and `PostgreSQL`
//! 4. Create the buffered writer and spawn the sink queue worker
//! 5. Build the mapping registry and the change dispatcher
//! 6. Create the connection slot, resilience manager, and orchestrator
//! 7. Run until a shutdown signal or retry exhaustion
//! 8. Drain: orchestrator, frame pump, final flush, sink queue, pools
//! 9. Log metrics

mod error;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use lodestar_changefeed::WsConnector;
use lodestar_core::config::{LoggingConfig, PipelineConfig};
use lodestar_core::{
    ChangeDispatcher, ConnectionResilienceManager, ConnectionSlot, DispatchSinks, GatewayConfig,
    GatewayError, GatewayMetrics, GatewayOrchestrator, OrchestratorConfig, ResilienceConfig,
    ResilienceError, SinkQueue, default_registry,
};
use lodestar_db::{BufferedWriter, DragonflyPool, PostgresConfig, PostgresPool, WriterConfig};
use tokio::task::JoinError;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::EngineError;

/// Configuration file looked up in the working directory.
const CONFIG_PATH: &str = "lodestar.yaml";

/// Upper bound on waiting for queued cache commands at shutdown.
const SINK_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Why the main loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stop {
    Signal,
    Exhausted,
    OrchestratorEnded,
}

type OrchestratorOutcome = Result<Result<(), GatewayError>, JoinError>;

/// Application entry point for the gateway.
///
/// # Errors
///
/// Returns an error if configuration is invalid, a store cannot be
/// reached, the orchestrator fails, or reconnection gives up.
#[tokio::main]
#[allow(clippy::too_many_lines)]
async fn main() -> Result<(), EngineError> {
    // 1. Load and validate configuration.
    let config = load_config(Path::new(CONFIG_PATH))?;
    config.validate()?;

    // 2. Initialize structured logging.
    init_logging(&config.logging);
    info!(
        uri = %config.changefeed.uri,
        module = %config.changefeed.module,
        frame_rate_hz = config.changefeed.frame_rate_hz,
        "lodestar-engine starting"
    );

    // 3. Connect to the stores.
    let cache = Arc::new(DragonflyPool::connect(&config.infrastructure.dragonfly_url).await?);
    info!("Dragonfly connected");
    let pg_config = PostgresConfig::new(&config.infrastructure.postgres_url)
        .with_max_connections(config.infrastructure.postgres_max_connections);
    let pg = Arc::new(PostgresPool::connect(&pg_config).await?);
    info!(
        max_connections = pg_config.max_connections,
        "PostgreSQL connected"
    );

    // 4. Durable writer and sink queue.
    let metrics = Arc::new(GatewayMetrics::new());
    let writer = Arc::new(BufferedWriter::new(
        Arc::clone(&pg) as _,
        writer_config(&config.pipeline),
    ));
    let (queue, sink_worker) = SinkQueue::spawn(
        Arc::clone(&cache) as _,
        config.pipeline.sink_queue_capacity,
        Arc::clone(&metrics),
    );

    // 5. Registry and dispatcher.
    let registry = Arc::new(default_registry()?);
    info!(routes = registry.len(), "Mapping registry built");
    let sinks = Arc::new(DispatchSinks::new(
        &config.changefeed.module,
        queue,
        Arc::clone(&cache) as _,
        Arc::clone(&writer),
        Arc::clone(&metrics),
    ));
    let dispatcher = Arc::new(ChangeDispatcher::new(registry, sinks));

    // 6. Connection lifecycle and orchestration.
    let shutdown = CancellationToken::new();
    let slot = Arc::new(ConnectionSlot::new());
    let manager = ConnectionResilienceManager::new(
        Arc::new(WsConnector),
        ResilienceConfig::from_gateway(&config),
        Arc::clone(&slot),
        Arc::clone(&metrics),
        shutdown.clone(),
    );
    let orchestrator = GatewayOrchestrator::new(
        Arc::clone(&dispatcher),
        slot,
        OrchestratorConfig::from_gateway(&config),
        shutdown.clone(),
    );

    // 7. Run.
    let mut orchestrator_task = tokio::spawn(async move { orchestrator.run().await });
    let starter = Arc::clone(&manager);
    let start_task = tokio::spawn(async move { starter.start().await });

    let (stop, ended) = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => info!("Shutdown signal received"),
                Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
            }
            (Stop::Signal, None)
        }
        () = manager.exhausted() => (Stop::Exhausted, None),
        joined = &mut orchestrator_task => (Stop::OrchestratorEnded, Some(joined)),
    };

    // 8. Drain.
    info!(reason = ?stop, "Shutting down");
    shutdown.cancel();
    let orchestrator_result = match ended {
        Some(joined) => joined,
        None => orchestrator_task.await,
    };
    manager.shutdown().await;
    match start_task.await {
        Ok(Ok(epoch)) => debug!(epoch = epoch.id(), "Initial connection task finished"),
        Ok(Err(ResilienceError::Cancelled)) => debug!("Initial connection cancelled"),
        Ok(Err(e)) => warn!(error = %e, "Initial connection task failed"),
        Err(e) => warn!(error = %e, "Initial connection task ended abnormally"),
    }
    writer.stop_flush_loop().await;

    if time::timeout(SINK_DRAIN_TIMEOUT, dispatcher.sinks().queue().barrier())
        .await
        .is_err()
    {
        warn!("Timed out draining the sink queue");
    }
    drop(dispatcher);
    drop(manager);
    if time::timeout(SINK_DRAIN_TIMEOUT, sink_worker).await.is_err() {
        debug!("Sink worker still referenced at exit");
    }

    pg.close().await;
    cache.close().await;

    // 9. Log metrics.
    let snapshot = metrics.snapshot();
    info!(
        connection_attempts = snapshot.connection_attempts,
        connects = snapshot.connects,
        disconnects = snapshot.disconnects,
        published = snapshot.total_published(),
        dropped_sink_commands = snapshot.dropped_sink_commands,
        mapping_failures = snapshot.mapping_failures,
        sink_failures = snapshot.sink_failures,
        discarded_events = snapshot.discarded_events,
        flushed_rows = writer.stats().flushed_rows(),
        failed_writes = writer.stats().failed_writes(),
        "Gateway metrics"
    );
    for (topic, count) in &snapshot.published {
        debug!(topic = %topic, count, "Published per topic");
    }

    exit_status(stop, orchestrator_result)
}

/// Map the stop reason and the orchestrator's outcome to the process result.
///
/// Only a shutdown signal ends the process cleanly. An orchestrator that
/// returns on its own is a failure even when it reports no error.
fn exit_status(stop: Stop, orchestrator: OrchestratorOutcome) -> Result<(), EngineError> {
    match stop {
        Stop::Exhausted => {
            error!(fatal = true, "Changefeed retry schedule exhausted");
            Err(EngineError::RetriesExhausted)
        }
        Stop::OrchestratorEnded => {
            orchestrator??;
            error!(fatal = true, "Orchestrator stopped without a shutdown request");
            Err(EngineError::OrchestratorStopped)
        }
        Stop::Signal => {
            orchestrator??;
            info!("lodestar-engine stopped");
            Ok(())
        }
    }
}

/// Load configuration from `path` if it exists, otherwise from defaults.
/// Environment overrides apply either way.
fn load_config(path: &Path) -> Result<GatewayConfig, EngineError> {
    if path.exists() {
        Ok(GatewayConfig::from_file(path)?)
    } else {
        Ok(GatewayConfig::from_env())
    }
}

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
fn init_logging(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

const fn writer_config(pipeline: &PipelineConfig) -> WriterConfig {
    WriterConfig {
        flush_interval: pipeline.flush_interval(),
        chunk_size: pipeline.upsert_chunk_size,
        soft_limit: pipeline.buffer_soft_limit,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = load_config(Path::new("/nonexistent/lodestar.yaml")).unwrap();
        assert_eq!(config.pipeline, PipelineConfig::default());
        assert!(!config.logging.json);
    }

    #[test]
    fn reads_file_when_present() {
        let path = std::env::temp_dir().join(format!("lodestar-ok-{}.yaml", std::process::id()));
        std::fs::write(
            &path,
            "pipeline:\n  heartbeat_interval_ms: 2500\nlogging:\n  json: true\n",
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.pipeline.heartbeat_interval_ms, 2500);
        assert!(config.logging.json);
    }

    #[test]
    fn unreadable_yaml_is_a_config_error() {
        let path = std::env::temp_dir().join(format!("lodestar-bad-{}.yaml", std::process::id()));
        std::fs::write(&path, "pipeline: [unclosed\n").unwrap();

        let result = load_config(&path);
        std::fs::remove_file(&path).unwrap();

        assert!(matches!(result, Err(EngineError::Config { .. })));
    }

    #[test]
    fn signal_with_clean_orchestrator_exits_cleanly() {
        assert!(exit_status(Stop::Signal, Ok(Ok(()))).is_ok());
    }

    #[test]
    fn orchestrator_ending_on_its_own_is_an_error() {
        assert!(matches!(
            exit_status(Stop::OrchestratorEnded, Ok(Ok(()))),
            Err(EngineError::OrchestratorStopped)
        ));
    }

    #[test]
    fn exhaustion_wins_over_a_clean_orchestrator() {
        assert!(matches!(
            exit_status(Stop::Exhausted, Ok(Ok(()))),
            Err(EngineError::RetriesExhausted)
        ));
    }

    #[test]
    fn writer_follows_pipeline_tunables() {
        let pipeline = PipelineConfig {
            flush_interval_ms: 250,
            upsert_chunk_size: 100,
            buffer_soft_limit: 1_000,
            ..PipelineConfig::default()
        };
        let writer = writer_config(&pipeline);
        assert_eq!(writer.flush_interval, Duration::from_millis(250));
        assert_eq!(writer.chunk_size, 100);
        assert_eq!(writer.soft_limit, 1_000);
    }
}
