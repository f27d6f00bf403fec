//! Error types for the store layer.
//!
//! All errors are propagated via [`DbError`] which wraps the underlying
//! [`sqlx`] and [`fred`] errors with additional context about which
//! operation failed.

use lodestar_types::ColumnKind;

/// Errors that can occur in the store layer.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// A `PostgreSQL` operation failed.
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// A `Dragonfly`/Redis operation failed.
    #[error("Dragonfly error: {0}")]
    Dragonfly(#[from] fred::error::Error),

    /// A serialization or deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A field value does not fit its column.
    #[error("Cannot write {value} into {column} ({kind:?})")]
    Coercion {
        /// Column name.
        column: &'static str,
        /// Declared column kind.
        kind: ColumnKind,
        /// Debug rendering of the offending value.
        value: String,
    },

    /// A schema description cannot be turned into a write definition.
    #[error("Invalid schema for {type_name}: {reason}")]
    Schema {
        /// Type being described.
        type_name: &'static str,
        /// What is wrong with it.
        reason: String,
    },

    /// A configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}
