//! Static mapping registry: source tables to domain events.
//!
//! Every route pairs one source table with a [`Mapper`] and a topic. The
//! registry is built once at startup from an explicit list; nothing is
//! discovered at runtime. A target type may be fed by several tables, and
//! one table may feed several topics.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use lodestar_changefeed::{EventContext, RowValue};
use lodestar_db::{BufferedWriter, DbError};
use lodestar_types::{DurableRecord, EntityMeta, GatewayEvent, derive_topic};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::dispatcher::{DispatchSinks, PopulateReport};

/// Errors converting one source row into a domain event.
#[derive(Debug, thiserror::Error)]
pub enum MappingError {
    /// The row does not match the expected source shape.
    #[error("malformed `{table}` row: {source}")]
    Decode {
        /// Source table.
        table: &'static str,
        /// Decoder error.
        source: serde_json::Error,
    },

    /// A numeric field does not fit the target representation.
    #[error("field `{field}` out of range: {value}")]
    OutOfRange {
        /// Source field.
        field: &'static str,
        /// Offending value.
        value: String,
    },
}

/// Errors building the registry.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// A database-routed type was registered without a durable codec.
    #[error("type `{type_name}` is routed to the database but has no durable codec")]
    MissingCodec {
        /// Target type.
        type_name: &'static str,
    },

    /// The same table and topic were registered twice.
    #[error("duplicate route `{table}` -> `{topic}`")]
    DuplicateRoute {
        /// Source table.
        table: &'static str,
        /// Topic.
        topic: String,
    },
}

/// Converts one source row shape into one domain event.
pub trait Mapper: Send + Sync + 'static {
    /// Source row, decoded from the changefeed's JSON row.
    type Source: DeserializeOwned + Send;

    /// Domain event produced.
    type Target: GatewayEvent;

    /// Map a decoded row. The module is stamped afterward.
    fn map(&self, row: Self::Source) -> Result<Self::Target, MappingError>;
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Durable write entry points for one type, resolved when the route is
/// registered.
pub struct DurableCodec<T> {
    /// Buffer an upsert.
    pub upsert: fn(&BufferedWriter, &T) -> Result<(), DbError>,
    /// Buffer a delete.
    pub delete: fn(&BufferedWriter, &T) -> Result<(), DbError>,
    /// Write a snapshot in chunks, bypassing the buffer.
    pub bulk: for<'a> fn(&'a BufferedWriter, &'a [T]) -> BoxFuture<'a, usize>,
}

impl<T: DurableRecord> DurableCodec<T> {
    /// Codec backed by the type's [`DurableRecord`] implementation.
    pub fn of() -> Self {
        Self {
            upsert: BufferedWriter::enqueue_upsert::<T>,
            delete: BufferedWriter::enqueue_delete::<T>,
            bulk: bulk_upsert::<T>,
        }
    }
}

fn bulk_upsert<'a, T: DurableRecord>(
    writer: &'a BufferedWriter,
    records: &'a [T],
) -> BoxFuture<'a, usize> {
    Box::pin(writer.bulk_upsert_now(records))
}

/// A route with its mapper and source types erased.
#[async_trait]
pub trait RowRoute: Send + Sync {
    /// Source table name.
    fn table(&self) -> &'static str;

    /// Topic prefix for published envelopes.
    fn topic(&self) -> &str;

    /// Metadata of the target type.
    fn meta(&self) -> EntityMeta;

    /// Whether durable writes are wired for this route.
    fn has_durable_codec(&self) -> bool;

    /// Handle one inserted row.
    fn insert(
        &self,
        sinks: &DispatchSinks,
        ctx: &EventContext,
        row: &RowValue,
    ) -> Result<(), MappingError>;

    /// Handle one replaced row.
    fn update(
        &self,
        sinks: &DispatchSinks,
        ctx: &EventContext,
        old: &RowValue,
        new: &RowValue,
    ) -> Result<(), MappingError>;

    /// Handle one removed row.
    fn delete(
        &self,
        sinks: &DispatchSinks,
        ctx: &EventContext,
        row: &RowValue,
    ) -> Result<(), MappingError>;

    /// Load a snapshot of rows into the cache and durable store.
    async fn populate(&self, sinks: &DispatchSinks, rows: &[RowValue]) -> PopulateReport;
}

/// One `table -> mapper -> topic` route.
pub struct TypedRoute<M: Mapper> {
    table: &'static str,
    topic: String,
    mapper: M,
    durable: Option<DurableCodec<M::Target>>,
}

impl<M: Mapper> TypedRoute<M> {
    /// Route for a type that is never written to the durable store.
    pub fn cached(table: &'static str, mapper: M) -> Self {
        Self {
            table,
            topic: derive_topic(M::Target::META.type_name),
            mapper,
            durable: None,
        }
    }

    /// Publish on `topic` instead of the name derived from the target type.
    #[must_use]
    pub fn with_topic(mut self, topic: &str) -> Self {
        topic.clone_into(&mut self.topic);
        self
    }

    fn decode(&self, module: &str, row: &RowValue) -> Result<M::Target, MappingError> {
        let source = M::Source::deserialize(row).map_err(|source| MappingError::Decode {
            table: self.table,
            source,
        })?;
        let mut entity = self.mapper.map(source)?;
        entity.set_module(module);
        Ok(entity)
    }
}

impl<M: Mapper> TypedRoute<M>
where
    M::Target: DurableRecord,
{
    /// Route for a type with a durable codec.
    pub fn durable(table: &'static str, mapper: M) -> Self {
        Self {
            durable: Some(DurableCodec::of()),
            ..Self::cached(table, mapper)
        }
    }
}

#[async_trait]
impl<M: Mapper> RowRoute for TypedRoute<M> {
    fn table(&self) -> &'static str {
        self.table
    }

    fn topic(&self) -> &str {
        &self.topic
    }

    fn meta(&self) -> EntityMeta {
        M::Target::META
    }

    fn has_durable_codec(&self) -> bool {
        self.durable.is_some()
    }

    fn insert(
        &self,
        sinks: &DispatchSinks,
        ctx: &EventContext,
        row: &RowValue,
    ) -> Result<(), MappingError> {
        let entity = self.decode(sinks.module(), row)?;
        sinks.apply_insert(&self.topic, ctx, &entity, self.durable.as_ref());
        Ok(())
    }

    fn update(
        &self,
        sinks: &DispatchSinks,
        ctx: &EventContext,
        old: &RowValue,
        new: &RowValue,
    ) -> Result<(), MappingError> {
        let old = self.decode(sinks.module(), old)?;
        let new = self.decode(sinks.module(), new)?;
        sinks.apply_update(&self.topic, ctx, &old, &new, self.durable.as_ref());
        Ok(())
    }

    fn delete(
        &self,
        sinks: &DispatchSinks,
        ctx: &EventContext,
        row: &RowValue,
    ) -> Result<(), MappingError> {
        let entity = self.decode(sinks.module(), row)?;
        sinks.apply_delete(&self.topic, ctx, &entity, self.durable.as_ref());
        Ok(())
    }

    async fn populate(&self, sinks: &DispatchSinks, rows: &[RowValue]) -> PopulateReport {
        let mut entities = Vec::with_capacity(rows.len());
        let mut failed = 0_usize;
        for row in rows {
            match self.decode(sinks.module(), row) {
                Ok(entity) => entities.push(entity),
                Err(e) => {
                    failed = failed.saturating_add(1);
                    sinks.metrics().record_mapping_failure();
                    warn!(table = self.table, error = %e, "Skipping unmappable snapshot row");
                }
            }
        }
        let mut report = sinks.populate(&entities, self.durable.as_ref()).await;
        report.failed = report.failed.saturating_add(failed);
        report
    }
}

/// The full set of routes, validated.
pub struct MappingRegistry {
    routes: Vec<Arc<dyn RowRoute>>,
}

impl std::fmt::Debug for MappingRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.routes.iter().map(|r| (r.table(), r.topic())))
            .finish()
    }
}

impl MappingRegistry {
    /// Start collecting routes.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Every route, in registration order.
    pub fn routes(&self) -> &[Arc<dyn RowRoute>] {
        &self.routes
    }

    /// Number of routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether the registry has no routes.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Distinct source tables, in registration order.
    pub fn tables(&self) -> Vec<&'static str> {
        let mut seen = HashSet::new();
        self.routes
            .iter()
            .map(|r| r.table())
            .filter(|t| seen.insert(*t))
            .collect()
    }
}

/// Collects routes and validates them into a [`MappingRegistry`].
#[derive(Default)]
pub struct RegistryBuilder {
    routes: Vec<Arc<dyn RowRoute>>,
}

impl RegistryBuilder {
    /// Add a route.
    #[must_use]
    pub fn route<M: Mapper>(mut self, route: TypedRoute<M>) -> Self {
        self.routes.push(Arc::new(route));
        self
    }

    /// Validate and freeze the routes.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::MissingCodec`] for a database-routed type
    /// without a durable codec and [`RegistryError::DuplicateRoute`] for a
    /// repeated table/topic pair.
    pub fn build(self) -> Result<MappingRegistry, RegistryError> {
        let mut seen = HashSet::new();
        for route in &self.routes {
            let meta = route.meta();
            if meta.is_persisted() && !route.has_durable_codec() {
                return Err(RegistryError::MissingCodec {
                    type_name: meta.type_name,
                });
            }
            if !seen.insert((route.table(), route.topic().to_owned())) {
                return Err(RegistryError::DuplicateRoute {
                    table: route.table(),
                    topic: route.topic().to_owned(),
                });
            }
        }
        Ok(MappingRegistry {
            routes: self.routes,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use lodestar_types::entities::{BuildingState, UsernameState};

    use super::*;

    #[derive(Deserialize)]
    struct NameRow {
        entity_id: u64,
        username: String,
    }

    struct NameMapper;

    impl Mapper for NameMapper {
        type Source = NameRow;
        type Target = UsernameState;

        fn map(&self, row: NameRow) -> Result<UsernameState, MappingError> {
            Ok(UsernameState {
                id: row.entity_id.to_string(),
                module: String::new(),
                username: row.username,
            })
        }
    }

    #[derive(Deserialize)]
    struct BuildingRow {
        entity_id: u64,
        claim_entity_id: u64,
    }

    struct BuildingMapper;

    impl Mapper for BuildingMapper {
        type Source = BuildingRow;
        type Target = BuildingState;

        fn map(&self, row: BuildingRow) -> Result<BuildingState, MappingError> {
            Ok(BuildingState {
                id: row.entity_id.to_string(),
                module: String::new(),
                claim_entity_id: row.claim_entity_id.to_string(),
            })
        }
    }

    #[test]
    fn topic_defaults_to_derived_name() {
        let route = TypedRoute::cached("building_state", BuildingMapper);
        assert_eq!(route.topic(), "world.building.state");
        let route = route.with_topic("world.buildings");
        assert_eq!(route.topic(), "world.buildings");
    }

    #[test]
    fn database_type_without_codec_is_rejected() {
        let result = MappingRegistry::builder()
            .route(TypedRoute::cached("player_username_state", NameMapper))
            .build();
        assert!(matches!(
            result,
            Err(RegistryError::MissingCodec {
                type_name: "UsernameState"
            })
        ));
    }

    #[test]
    fn duplicate_table_topic_is_rejected() {
        let result = MappingRegistry::builder()
            .route(TypedRoute::durable("player_username_state", NameMapper))
            .route(TypedRoute::durable("player_username_state", NameMapper))
            .build();
        assert!(matches!(result, Err(RegistryError::DuplicateRoute { .. })));
    }

    #[test]
    fn one_table_may_feed_two_topics() {
        let registry = MappingRegistry::builder()
            .route(TypedRoute::durable("player_username_state", NameMapper))
            .route(
                TypedRoute::durable("player_username_state", NameMapper)
                    .with_topic("world.names"),
            )
            .route(TypedRoute::cached("building_state", BuildingMapper))
            .build()
            .unwrap();
        assert_eq!(registry.len(), 3);
        assert_eq!(
            registry.tables(),
            vec!["player_username_state", "building_state"]
        );
    }

    #[test]
    fn malformed_row_is_a_decode_error() {
        let route = TypedRoute::durable("player_username_state", NameMapper);
        let err = route
            .decode("m1", &serde_json::json!({"entity_id": "nope"}))
            .err();
        assert!(matches!(
            err,
            Some(MappingError::Decode {
                table: "player_username_state",
                ..
            })
        ));

        let ok = route
            .decode("m1", &serde_json::json!({"entity_id": 9, "username": "ana"}))
            .ok();
        assert_eq!(ok.map(|u| (u.id, u.module)), Some(("9".to_owned(), "m1".to_owned())));
    }
}
