//! Error types for the gateway binary.
//!
//! [`EngineError`] wraps every failure that can end the process, so `main`
//! can propagate with `?` and exit non-zero.

/// Top-level error for the gateway binary.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration could not be loaded or failed validation.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: lodestar_core::ConfigError,
    },

    /// A store connection could not be established.
    #[error("store error: {source}")]
    Db {
        /// The underlying store error.
        #[from]
        source: lodestar_db::DbError,
    },

    /// The mapping registry is inconsistent.
    #[error("registry error: {source}")]
    Registry {
        /// The underlying registry error.
        #[from]
        source: lodestar_core::RegistryError,
    },

    /// The orchestrator stopped with an error.
    #[error("gateway error: {source}")]
    Gateway {
        /// The underlying orchestrator error.
        #[from]
        source: lodestar_core::GatewayError,
    },

    /// A top-level task panicked or was aborted.
    #[error("task error: {source}")]
    Task {
        /// The underlying join error.
        #[from]
        source: tokio::task::JoinError,
    },

    /// The orchestrator returned without a shutdown request.
    #[error("orchestrator stopped without a shutdown request")]
    OrchestratorStopped,

    /// Every scheduled reconnect attempt failed.
    #[error("changefeed retry schedule exhausted")]
    RetriesExhausted,
}
