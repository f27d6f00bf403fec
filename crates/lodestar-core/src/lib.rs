//! Connection resilience, change dispatch, and epoch orchestration for the
//! Lodestar event gateway.
//!
//! One resilient changefeed connection feeds a pipeline that maps source
//! rows into versioned domain envelopes and fans them out to the cache,
//! the pub/sub channel, and the durable store.
//!
//! # Architecture
//!
//! ```text
//! ConnectionResilienceManager --epoch--> ConnectionSlot
//!        |  (frame pump)                       |
//!        v                                     v
//!   ChangefeedLink <--subscribe-- GatewayOrchestrator
//!        |                                     |
//!        +--row events--> ChangeDispatcher <---+ populate / activate
//!                           |      |      |
//!                         cache  pub/sub  BufferedWriter --> PostgreSQL
//!                           (SinkQueue)
//! ```
//!
//! # Modules
//!
//! - [`config`] -- Configuration loading from `lodestar.yaml` and the
//!   environment.
//! - [`slot`] -- [`ConnectionSlot`], the broadcast holder of the live epoch.
//! - [`retry`] -- The fixed reconnect backoff schedule.
//! - [`resilience`] -- Connect, retry, and frame-pump lifecycle.
//! - [`registry`] -- Static `table -> mapper -> topic` routes.
//! - [`catalog`] -- The mapped tables, their mappers, and subscription
//!   queries.
//! - [`sink`] -- Bounded FIFO queue for cache and publish commands.
//! - [`dispatcher`] -- Per-row routing, base population, and activation.
//! - [`heartbeat`] -- Per-epoch liveness events.
//! - [`orchestrator`] -- Per-epoch sequencing.
//! - [`metrics`] -- Lock-free counters.
//!
//! [`ConnectionSlot`]: slot::ConnectionSlot

pub mod catalog;
pub mod config;
pub mod dispatcher;
pub mod heartbeat;
pub mod metrics;
pub mod orchestrator;
pub mod registry;
pub mod resilience;
pub mod retry;
pub mod sink;
pub mod slot;

pub use catalog::{default_registry, subscription_queries};
pub use config::{ConfigError, GatewayConfig};
pub use dispatcher::{ChangeDispatcher, DispatchSinks, PopulateReport, PreparedEpoch, RowEvent};
pub use metrics::{GatewayMetrics, MetricsSnapshot};
pub use orchestrator::{GatewayError, GatewayOrchestrator, OrchestratorConfig};
pub use registry::{Mapper, MappingError, MappingRegistry, RegistryError, RowRoute, TypedRoute};
pub use resilience::{
    ConnectionResilienceManager, ConnectionState, ResilienceConfig, ResilienceError,
};
pub use retry::RetrySchedule;
pub use sink::{SinkCommand, SinkQueue};
pub use slot::{ConnectionEpoch, ConnectionSlot};
