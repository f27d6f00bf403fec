//! Store layer for the Lodestar event gateway (`Dragonfly` + `PostgreSQL`).
//!
//! `Dragonfly` serves the snapshot cache and the pub/sub channel downstream
//! consumers subscribe to. `PostgreSQL` holds long-term, queryable state.
//! Durable writes from the row-event path go through [`BufferedWriter`],
//! which deduplicates by key and flushes in batches.
//!
//! # Architecture
//!
//! ```text
//! Row event
//!     |
//!     +-- hash set/delete + publish --> Dragonfly (CacheStore)
//!     |
//!     +-- enqueue --> BufferedWriter --flush (1s)--> PostgreSQL (DurableStore)
//!                        |-- WriteDefinition (per type, memoized)
//!                        +-- coercion (unsigned widening, enum names, JSONB)
//! ```
//!
//! # Modules
//!
//! - [`store`] -- [`CacheStore`] and [`DurableStore`] traits
//! - [`dragonfly`] -- `Dragonfly` (Redis-compatible) cache and pub/sub
//! - [`postgres`] -- `PostgreSQL` connection pool and batched upserts
//! - [`definition`] -- Write definitions and column coercion
//! - [`writer`] -- Buffered, periodically flushed durable writes
//! - [`memory`] -- In-memory doubles for tests
//! - [`error`] -- Shared error types

pub mod definition;
pub mod dragonfly;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;
pub mod writer;

// Re-export primary types for convenience.
pub use definition::{DefinitionCache, SqlValue, WriteDefinition, coerce};
pub use dragonfly::DragonflyPool;
pub use error::DbError;
pub use memory::{CacheOp, MemoryCache, MemoryStore, StoreCall};
pub use postgres::{PostgresConfig, PostgresPool};
pub use store::{CacheStore, DurableStore};
pub use writer::{BufferedWriter, WriterConfig, WriterStats};
