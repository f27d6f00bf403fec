//! Shared type definitions for the Lodestar event gateway.
//!
//! This crate defines every domain event the gateway emits, the envelopes
//! that wrap them on the pub/sub channel, and the static metadata that
//! decides where each event type is stored (cache, durable store, or both).
//!
//! # Modules
//!
//! - [`storage`] -- Storage-target bitmask and the static entity metadata catalog
//! - [`event`] -- The [`GatewayEvent`] and [`DurableRecord`] traits
//! - [`codec`] -- Table schema descriptions and encoded field values
//! - [`envelope`] -- Versioned pub/sub envelopes and system events
//! - [`entities`] -- Concrete domain event types

pub mod codec;
pub mod entities;
pub mod envelope;
pub mod event;
pub mod storage;

pub use codec::{ColumnKind, ColumnSpec, FieldValue, TableSchema};
pub use envelope::{
    Envelope, EnvelopeVersion, HeartbeatEvent, SYSTEM_ORIGIN, SystemEvent, UNKNOWN_ORIGIN,
    UpdateEnvelope,
};
pub use event::{DurableRecord, GatewayEvent, cache_key, cache_key_of, derive_topic};
pub use storage::{ENTITY_CATALOG, EntityMeta, StorageTarget, entity_meta};
