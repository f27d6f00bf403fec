//! Row-event dispatch to the cache, pub/sub, and durable sinks.
//!
//! # Per-row routing
//!
//! | Event  | Cache (if `CACHE`)   | Durable (if `DATABASE`) | Pub/sub            |
//! |--------|----------------------|-------------------------|--------------------|
//! | insert | hash set             | buffered upsert         | `{topic}.insert`   |
//! | update | hash set (new value) | buffered upsert (new)   | `{topic}.update`   |
//! | delete | hash field removed   | buffered delete         | `{topic}.delete`   |
//!
//! Each sink is attempted independently; a failure in one is logged and
//! never skips the others. Cache and publish commands go through the
//! [`SinkQueue`]; durable writes only ever enter the [`BufferedWriter`].
//!
//! # Epoch activation
//!
//! [`ChangeDispatcher::prepare`] runs inside the subscription-applied
//! callback. In the same frame tick it snapshots every mapped table and
//! attaches handlers that hold row events behind an [`EventGate`].
//! [`ChangeDispatcher::populate_base`] loads the snapshot, and
//! [`ChangeDispatcher::activate`] replays the held events in order before
//! letting new ones through directly. No row event is visible downstream
//! before the snapshot it follows.

use std::collections::VecDeque;
use std::mem;
use std::sync::Arc;

use dashmap::DashMap;
use lodestar_changefeed::{ChangefeedLink, EventContext, RowValue, TableHandle};
use lodestar_db::{BufferedWriter, CacheStore};
use lodestar_types::{
    EntityMeta, Envelope, GatewayEvent, SYSTEM_ORIGIN, SystemEvent, UpdateEnvelope, cache_key,
};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::metrics::GatewayMetrics;
use crate::registry::{DurableCodec, MappingError, MappingRegistry, RowRoute};
use crate::sink::{SinkCommand, SinkQueue};

/// Outcome of loading one snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PopulateReport {
    /// Rows mapped into domain events.
    pub mapped: usize,
    /// Rows that failed to map or encode.
    pub failed: usize,
    /// Entries written to the cache.
    pub cached: usize,
    /// Rows written to the durable store.
    pub persisted: usize,
}

impl PopulateReport {
    /// Add another report's counts to this one.
    pub const fn merge(&mut self, other: Self) {
        self.mapped = self.mapped.saturating_add(other.mapped);
        self.failed = self.failed.saturating_add(other.failed);
        self.cached = self.cached.saturating_add(other.cached);
        self.persisted = self.persisted.saturating_add(other.persisted);
    }
}

/// The three sinks, bound to one module.
pub struct DispatchSinks {
    module: String,
    queue: SinkQueue,
    cache: Arc<dyn CacheStore>,
    writer: Arc<BufferedWriter>,
    metrics: Arc<GatewayMetrics>,
    cache_keys: DashMap<&'static str, Arc<str>>,
}

impl std::fmt::Debug for DispatchSinks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchSinks")
            .field("module", &self.module)
            .field("cache_keys", &self.cache_keys.len())
            .finish_non_exhaustive()
    }
}

impl DispatchSinks {
    /// Bind the sinks to a module.
    pub fn new(
        module: &str,
        queue: SinkQueue,
        cache: Arc<dyn CacheStore>,
        writer: Arc<BufferedWriter>,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        Self {
            module: module.to_owned(),
            queue,
            cache,
            writer,
            metrics,
            cache_keys: DashMap::new(),
        }
    }

    /// Owning module.
    pub fn module(&self) -> &str {
        &self.module
    }

    /// Shared counters.
    pub const fn metrics(&self) -> &Arc<GatewayMetrics> {
        &self.metrics
    }

    /// Durable writer.
    pub const fn writer(&self) -> &Arc<BufferedWriter> {
        &self.writer
    }

    /// Cache/publish queue.
    pub const fn queue(&self) -> &SinkQueue {
        &self.queue
    }

    /// Cache key for a type, computed once per type.
    pub fn cache_key(&self, meta: EntityMeta) -> Arc<str> {
        let key = self
            .cache_keys
            .entry(meta.type_name)
            .or_insert_with(|| cache_key(meta.type_name, meta.global, &self.module).into());
        Arc::clone(key.value())
    }

    /// Route an inserted entity.
    pub fn apply_insert<T: GatewayEvent>(
        &self,
        topic: &str,
        ctx: &EventContext,
        entity: &T,
        durable: Option<&DurableCodec<T>>,
    ) {
        let meta = T::META;
        if meta.is_cached() {
            self.cache_set(meta, entity);
        }
        if meta.is_persisted()
            && let Some(codec) = durable
            && let Err(e) = (codec.upsert)(&self.writer, entity)
        {
            error!(entity = meta.type_name, id = entity.id(), error = %e, "Failed to buffer upsert");
        }
        self.publish(
            format!("{topic}.insert"),
            &Envelope::new(&self.module, entity, origin(ctx.caller_identity.as_ref()), origin(ctx.action.as_ref())),
        );
    }

    /// Route a replaced entity. Cache and durable sinks see only `new`.
    pub fn apply_update<T: GatewayEvent>(
        &self,
        topic: &str,
        ctx: &EventContext,
        old: &T,
        new: &T,
        durable: Option<&DurableCodec<T>>,
    ) {
        let meta = T::META;
        if meta.is_cached() {
            self.cache_set(meta, new);
        }
        if meta.is_persisted()
            && let Some(codec) = durable
            && let Err(e) = (codec.upsert)(&self.writer, new)
        {
            error!(entity = meta.type_name, id = new.id(), error = %e, "Failed to buffer upsert");
        }
        self.publish(
            format!("{topic}.update"),
            &UpdateEnvelope::new(
                &self.module,
                old,
                new,
                origin(ctx.caller_identity.as_ref()),
                origin(ctx.action.as_ref()),
            ),
        );
    }

    /// Route a removed entity.
    pub fn apply_delete<T: GatewayEvent>(
        &self,
        topic: &str,
        ctx: &EventContext,
        entity: &T,
        durable: Option<&DurableCodec<T>>,
    ) {
        let meta = T::META;
        if meta.is_cached() {
            self.queue.send(SinkCommand::HashDelete {
                key: self.cache_key(meta).to_string(),
                field: entity.id().to_owned(),
            });
        }
        if meta.is_persisted()
            && let Some(codec) = durable
            && let Err(e) = (codec.delete)(&self.writer, entity)
        {
            error!(entity = meta.type_name, id = entity.id(), error = %e, "Failed to buffer delete");
        }
        self.publish(
            format!("{topic}.delete"),
            &Envelope::new(&self.module, entity, origin(ctx.caller_identity.as_ref()), origin(ctx.action.as_ref())),
        );
    }

    /// Publish a system event, attributed to the gateway itself.
    pub fn publish_system<E: SystemEvent>(&self, event: &E) -> bool {
        self.publish(
            E::topic(),
            &Envelope::new(&self.module, event, Some(SYSTEM_ORIGIN), Some(SYSTEM_ORIGIN)),
        )
    }

    /// Overwrite the cache and bulk-write the durable store with a snapshot.
    pub async fn populate<T: GatewayEvent>(
        &self,
        entities: &[T],
        durable: Option<&DurableCodec<T>>,
    ) -> PopulateReport {
        let meta = T::META;
        let mut report = PopulateReport {
            mapped: entities.len(),
            ..PopulateReport::default()
        };

        if meta.is_cached() && !entities.is_empty() {
            let mut entries = Vec::with_capacity(entities.len());
            for entity in entities {
                match serde_json::to_string(entity) {
                    Ok(json) => entries.push((entity.id().to_owned(), json)),
                    Err(e) => {
                        report.failed = report.failed.saturating_add(1);
                        error!(entity = meta.type_name, id = entity.id(), error = %e, "Failed to encode entity");
                    }
                }
            }
            let count = entries.len();
            let key = self.cache_key(meta);
            match self.cache.hash_set_many(&key, entries).await {
                Ok(()) => report.cached = count,
                Err(e) => {
                    self.metrics.record_sink_failure();
                    error!(key = %key, error = %e, "Failed to populate cache");
                }
            }
        }

        if meta.is_persisted()
            && let Some(codec) = durable
        {
            report.persisted = (codec.bulk)(&self.writer, entities).await;
        }
        report
    }

    fn cache_set<T: GatewayEvent>(&self, meta: EntityMeta, entity: &T) {
        match serde_json::to_string(entity) {
            Ok(value) => {
                self.queue.send(SinkCommand::HashSet {
                    key: self.cache_key(meta).to_string(),
                    field: entity.id().to_owned(),
                    value,
                });
            }
            Err(e) => {
                self.metrics.record_sink_failure();
                error!(entity = meta.type_name, id = entity.id(), error = %e, "Failed to encode entity");
            }
        }
    }

    fn publish<P: Serialize>(&self, channel: String, payload: &P) -> bool {
        match serde_json::to_string(payload) {
            Ok(payload) => self.queue.send(SinkCommand::Publish { channel, payload }),
            Err(e) => {
                self.metrics.record_sink_failure();
                error!(topic = %channel, error = %e, "Failed to encode envelope");
                false
            }
        }
    }
}

fn origin(value: Option<&String>) -> Option<&str> {
    value.map(String::as_str)
}

/// One row-level change, owned so it can be held until activation.
#[derive(Debug, Clone)]
pub enum RowEvent {
    /// Row inserted.
    Insert(EventContext, RowValue),
    /// Row replaced.
    Update(EventContext, RowValue, RowValue),
    /// Row removed.
    Delete(EventContext, RowValue),
}

struct HeldEvent {
    route: Arc<dyn RowRoute>,
    event: RowEvent,
}

enum GateState {
    Holding(VecDeque<HeldEvent>),
    Open,
    Closed,
}

/// Holds row events until population completes, then passes them through.
pub struct EventGate {
    sinks: Arc<DispatchSinks>,
    state: Mutex<GateState>,
}

impl std::fmt::Debug for EventGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventGate")
            .field("open", &self.is_open())
            .field("held", &self.held())
            .finish_non_exhaustive()
    }
}

impl EventGate {
    fn new(sinks: Arc<DispatchSinks>) -> Self {
        Self {
            sinks,
            state: Mutex::new(GateState::Holding(VecDeque::new())),
        }
    }

    fn admit(&self, route: &Arc<dyn RowRoute>, event: RowEvent) {
        {
            let mut state = self.state.lock();
            match &mut *state {
                GateState::Holding(held) => {
                    held.push_back(HeldEvent {
                        route: Arc::clone(route),
                        event,
                    });
                    return;
                }
                GateState::Closed => return,
                GateState::Open => {}
            }
        }
        dispatch_event(&self.sinks, route.as_ref(), &event);
    }

    /// Replay held events in arrival order, then pass new events straight
    /// through. Returns the number replayed.
    fn open(&self) -> usize {
        let mut replayed = 0_usize;
        loop {
            let batch = {
                let mut state = self.state.lock();
                match &mut *state {
                    GateState::Holding(held) if held.is_empty() => {
                        *state = GateState::Open;
                        return replayed;
                    }
                    GateState::Holding(held) => mem::take(held),
                    GateState::Open | GateState::Closed => return replayed,
                }
            };
            for held in batch {
                dispatch_event(&self.sinks, held.route.as_ref(), &held.event);
                replayed = replayed.saturating_add(1);
            }
        }
    }

    /// Drop held events and ignore everything after. Returns the number
    /// dropped, which is also added to the discarded-events counter.
    fn close(&self) -> usize {
        let previous = mem::replace(&mut *self.state.lock(), GateState::Closed);
        let dropped = match previous {
            GateState::Holding(held) => held.len(),
            GateState::Open | GateState::Closed => 0,
        };
        if dropped > 0 {
            self.sinks.metrics().record_discarded(dropped);
        }
        dropped
    }

    /// Whether events currently pass straight through.
    pub fn is_open(&self) -> bool {
        let state = self.state.lock();
        matches!(*state, GateState::Open)
    }

    /// Number of events waiting for activation.
    pub fn held(&self) -> usize {
        let state = self.state.lock();
        match &*state {
            GateState::Holding(held) => held.len(),
            GateState::Open | GateState::Closed => 0,
        }
    }
}

fn dispatch_event(sinks: &DispatchSinks, route: &dyn RowRoute, event: &RowEvent) {
    let result = match event {
        RowEvent::Insert(ctx, row) => route.insert(sinks, ctx, row),
        RowEvent::Update(ctx, old, new) => route.update(sinks, ctx, old, new),
        RowEvent::Delete(ctx, row) => route.delete(sinks, ctx, row),
    };
    if let Err(e) = result {
        report_mapping_failure(sinks, route, &e);
    }
}

fn report_mapping_failure(sinks: &DispatchSinks, route: &dyn RowRoute, err: &MappingError) {
    sinks.metrics().record_mapping_failure();
    warn!(table = route.table(), topic = route.topic(), error = %err, "Failed to map row");
}

/// Snapshot and gated handlers for one epoch.
pub struct PreparedEpoch {
    gate: Arc<EventGate>,
    snapshots: Vec<(Arc<dyn RowRoute>, Vec<RowValue>)>,
}

impl std::fmt::Debug for PreparedEpoch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedEpoch")
            .field("gate", &self.gate)
            .field("tables", &self.snapshots.len())
            .finish_non_exhaustive()
    }
}

impl PreparedEpoch {
    /// The epoch's event gate.
    pub const fn gate(&self) -> &Arc<EventGate> {
        &self.gate
    }

    /// Number of routes with an attached table.
    pub fn route_count(&self) -> usize {
        self.snapshots.len()
    }

    /// Total rows captured in the snapshot.
    pub fn snapshot_rows(&self) -> usize {
        self.snapshots
            .iter()
            .fold(0, |acc, (_, rows)| acc.saturating_add(rows.len()))
    }

    /// Stop handling events for this epoch.
    ///
    /// Events still held (the epoch ended before activation) are discarded
    /// and counted in [`MetricsSnapshot::discarded_events`]. Delivery is
    /// at-least-once per epoch: the next epoch's base population carries
    /// the rows those events changed.
    ///
    /// [`MetricsSnapshot::discarded_events`]: crate::metrics::MetricsSnapshot::discarded_events
    pub fn close(&self) -> usize {
        let dropped = self.gate.close();
        if dropped > 0 {
            warn!(dropped, "Discarded row events held for an ended epoch");
        }
        dropped
    }
}

/// Attaches row handlers and loads base snapshots for the mapped tables.
#[derive(Debug)]
pub struct ChangeDispatcher {
    registry: Arc<MappingRegistry>,
    sinks: Arc<DispatchSinks>,
}

impl ChangeDispatcher {
    /// Create a dispatcher over a validated registry.
    pub const fn new(registry: Arc<MappingRegistry>, sinks: Arc<DispatchSinks>) -> Self {
        Self { registry, sinks }
    }

    /// The route registry.
    pub const fn registry(&self) -> &Arc<MappingRegistry> {
        &self.registry
    }

    /// The bound sinks.
    pub const fn sinks(&self) -> &Arc<DispatchSinks> {
        &self.sinks
    }

    /// Snapshot every mapped table and attach gated handlers.
    ///
    /// Call from inside the subscription-applied callback so no row event
    /// can land between the snapshot and the handler registration.
    pub fn prepare(&self, link: &dyn ChangefeedLink) -> PreparedEpoch {
        let gate = Arc::new(EventGate::new(Arc::clone(&self.sinks)));
        let mut snapshots = Vec::with_capacity(self.registry.len());
        for route in self.registry.routes() {
            let Some(table) = link.table(route.table()) else {
                warn!(table = route.table(), "Mapped table not available on link");
                continue;
            };
            snapshots.push((Arc::clone(route), table.rows()));
            attach(&gate, route, table.as_ref());
        }
        debug!(routes = snapshots.len(), "Row handlers attached behind gate");
        PreparedEpoch { gate, snapshots }
    }

    /// Load the snapshot into the cache and durable store.
    ///
    /// Per-module cache keys are cleared first so rows that disappeared
    /// while disconnected do not linger.
    pub async fn populate_base(&self, prepared: &PreparedEpoch) -> PopulateReport {
        let module = self.sinks.module();
        let pattern = format!("cache:*:{module}");
        match self.sinks.cache.delete_matching(&pattern).await {
            Ok(removed) => debug!(pattern = %pattern, removed, "Cleared module cache keys"),
            Err(e) => {
                self.sinks.metrics().record_sink_failure();
                error!(pattern = %pattern, error = %e, "Failed to clear module cache keys");
            }
        }

        let mut total = PopulateReport::default();
        for (route, rows) in &prepared.snapshots {
            let report = route.populate(&self.sinks, rows).await;
            debug!(
                table = route.table(),
                topic = route.topic(),
                mapped = report.mapped,
                failed = report.failed,
                cached = report.cached,
                persisted = report.persisted,
                "Snapshot loaded"
            );
            total.merge(report);
        }
        info!(
            module = %module,
            mapped = total.mapped,
            failed = total.failed,
            cached = total.cached,
            persisted = total.persisted,
            "Base population complete"
        );
        total
    }

    /// Open the epoch's gate. Returns the number of held events replayed.
    pub fn activate(&self, prepared: &PreparedEpoch) -> usize {
        let replayed = prepared.gate.open();
        info!(replayed, "Row-level handlers active");
        replayed
    }

    /// Handle one event directly, bypassing any gate.
    pub fn dispatch(&self, route: &dyn RowRoute, event: &RowEvent) {
        dispatch_event(&self.sinks, route, event);
    }
}

fn attach(gate: &Arc<EventGate>, route: &Arc<dyn RowRoute>, table: &dyn TableHandle) {
    let (g, r) = (Arc::clone(gate), Arc::clone(route));
    table.on_insert(Arc::new(move |ctx, row| {
        g.admit(&r, RowEvent::Insert(ctx.clone(), row.clone()));
    }));
    let (g, r) = (Arc::clone(gate), Arc::clone(route));
    table.on_update(Arc::new(move |ctx, old, new| {
        g.admit(&r, RowEvent::Update(ctx.clone(), old.clone(), new.clone()));
    }));
    let (g, r) = (Arc::clone(gate), Arc::clone(route));
    table.on_delete(Arc::new(move |ctx, row| {
        g.admit(&r, RowEvent::Delete(ctx.clone(), row.clone()));
    }));
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use lodestar_db::{MemoryCache, MemoryStore, WriterConfig};
    use serde_json::{Value, json};

    use super::*;
    use crate::catalog;

    struct Harness {
        cache: Arc<MemoryCache>,
        writer: Arc<BufferedWriter>,
        metrics: Arc<GatewayMetrics>,
        dispatcher: ChangeDispatcher,
    }

    fn harness() -> Harness {
        let cache = Arc::new(MemoryCache::new());
        let store = Arc::new(MemoryStore::new());
        let metrics = Arc::new(GatewayMetrics::new());
        let writer = Arc::new(BufferedWriter::new(store, WriterConfig::default()));
        let (queue, _worker) = SinkQueue::spawn(Arc::clone(&cache) as _, 64, Arc::clone(&metrics));
        let sinks = Arc::new(DispatchSinks::new(
            "m1",
            queue,
            Arc::clone(&cache) as _,
            Arc::clone(&writer),
            Arc::clone(&metrics),
        ));
        let registry = Arc::new(catalog::default_registry().unwrap());
        Harness {
            cache,
            writer,
            metrics,
            dispatcher: ChangeDispatcher::new(registry, sinks),
        }
    }

    fn route(h: &Harness, table: &str) -> Arc<dyn RowRoute> {
        h.dispatcher
            .registry()
            .routes()
            .iter()
            .find(|r| r.table() == table)
            .cloned()
            .unwrap()
    }

    fn chat(id: u64, text: &str) -> Value {
        json!({
            "entity_id": id,
            "channel_id": 2,
            "owner_entity_id": 77,
            "username": "ana",
            "text": text,
            "timestamp": 1_700_000_000
        })
    }

    fn username(id: u64, name: &str) -> Value {
        json!({"entity_id": id, "username": name})
    }

    #[tokio::test]
    async fn insert_routes_to_cache_and_publish() {
        let h = harness();
        let route = route(&h, "chat_message_state");
        h.dispatcher.dispatch(
            route.as_ref(),
            &RowEvent::Insert(EventContext::new("caller-1", "send_message"), chat(5, "hi")),
        );
        h.dispatcher.sinks().queue().barrier().await;

        let hash = h.cache.hash("cache:ChatMessage:m1");
        assert!(hash.get("5").unwrap().contains("\"content\":\"hi\""));
        let published = h.cache.published("world.chat.message.insert");
        assert_eq!(published.len(), 1);
        let envelope: Value = serde_json::from_str(&published[0]).unwrap();
        assert_eq!(envelope["version"], "v1");
        assert_eq!(envelope["module"], "m1");
        assert_eq!(envelope["callerIdentity"], "caller-1");
        assert_eq!(envelope["action"], "send_message");
        assert_eq!(envelope["entity"]["senderUsername"], "ana");
        assert_eq!(h.writer.pending(), 0);
    }

    #[tokio::test]
    async fn database_type_is_buffered_not_cached() {
        let h = harness();
        let route = route(&h, "player_username_state");
        h.dispatcher.dispatch(
            route.as_ref(),
            &RowEvent::Insert(EventContext::default(), username(9, "ana")),
        );
        h.dispatcher.sinks().queue().barrier().await;

        assert_eq!(h.writer.pending(), 1);
        assert!(h.cache.hash("cache:UsernameState:global").is_empty());
        let published = h.cache.published("world.username.state.insert");
        let envelope: Value = serde_json::from_str(&published[0]).unwrap();
        assert_eq!(envelope["callerIdentity"], "UNKNOWN");
        assert_eq!(envelope["action"], "UNKNOWN");
    }

    #[tokio::test]
    async fn update_publishes_old_and_new() {
        let h = harness();
        let route = route(&h, "chat_message_state");
        h.dispatcher.dispatch(
            route.as_ref(),
            &RowEvent::Update(EventContext::default(), chat(5, "before"), chat(5, "after")),
        );
        h.dispatcher.sinks().queue().barrier().await;

        let published = h.cache.published("world.chat.message.update");
        let envelope: Value = serde_json::from_str(&published[0]).unwrap();
        assert_eq!(envelope["oldEntity"]["content"], "before");
        assert_eq!(envelope["newEntity"]["content"], "after");
        let hash = h.cache.hash("cache:ChatMessage:m1");
        assert!(hash.get("5").unwrap().contains("after"));
    }

    #[tokio::test]
    async fn delete_removes_cache_field() {
        let h = harness();
        h.cache.seed("cache:ChatMessage:m1", "5", "{}");
        let route = route(&h, "chat_message_state");
        h.dispatcher.dispatch(
            route.as_ref(),
            &RowEvent::Delete(EventContext::default(), chat(5, "bye")),
        );
        h.dispatcher.sinks().queue().barrier().await;

        assert!(h.cache.hash("cache:ChatMessage:m1").is_empty());
        assert_eq!(h.cache.published("world.chat.message.delete").len(), 1);
    }

    #[tokio::test]
    async fn malformed_row_is_contained() {
        let h = harness();
        let route = route(&h, "chat_message_state");
        h.dispatcher.dispatch(
            route.as_ref(),
            &RowEvent::Insert(EventContext::default(), json!({"entity_id": "x"})),
        );
        h.dispatcher.dispatch(
            route.as_ref(),
            &RowEvent::Insert(EventContext::default(), chat(6, "ok")),
        );
        h.dispatcher.sinks().queue().barrier().await;

        assert_eq!(h.metrics.snapshot().mapping_failures, 1);
        assert_eq!(h.cache.published("world.chat.message.insert").len(), 1);
    }

    #[tokio::test]
    async fn cache_failure_does_not_block_publish() {
        let h = harness();
        h.cache.set_fail_hashes(true);
        let route = route(&h, "chat_message_state");
        h.dispatcher.dispatch(
            route.as_ref(),
            &RowEvent::Insert(EventContext::default(), chat(5, "hi")),
        );
        h.dispatcher.sinks().queue().barrier().await;

        assert_eq!(h.metrics.snapshot().sink_failures, 1);
        assert_eq!(h.cache.published("world.chat.message.insert").len(), 1);
    }

    #[tokio::test]
    async fn global_cache_key_ignores_module() {
        let h = harness();
        let sinks = h.dispatcher.sinks();
        assert_eq!(
            &*sinks.cache_key(lodestar_types::storage::ITEM),
            "cache:Item:global"
        );
        assert_eq!(
            &*sinks.cache_key(lodestar_types::storage::CHAT_MESSAGE),
            "cache:ChatMessage:m1"
        );
        let first = sinks.cache_key(lodestar_types::storage::ITEM);
        let second = sinks.cache_key(lodestar_types::storage::ITEM);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn gate_holds_until_activation_then_replays_in_order() {
        let h = harness();
        let route = route(&h, "chat_message_state");
        let gate = Arc::new(EventGate::new(Arc::clone(h.dispatcher.sinks())));

        gate.admit(&route, RowEvent::Insert(EventContext::default(), chat(1, "a")));
        gate.admit(&route, RowEvent::Update(EventContext::default(), chat(1, "a"), chat(1, "b")));
        assert_eq!(gate.held(), 2);
        h.dispatcher.sinks().queue().barrier().await;
        assert!(h.cache.channels().is_empty());

        assert_eq!(gate.open(), 2);
        assert!(gate.is_open());
        gate.admit(&route, RowEvent::Delete(EventContext::default(), chat(1, "b")));
        h.dispatcher.sinks().queue().barrier().await;

        assert_eq!(
            h.cache.channels(),
            vec![
                "world.chat.message.insert".to_owned(),
                "world.chat.message.update".to_owned(),
                "world.chat.message.delete".to_owned(),
            ]
        );
    }

    #[tokio::test]
    async fn closed_gate_discards_events() {
        let h = harness();
        let route = route(&h, "chat_message_state");
        let gate = Arc::new(EventGate::new(Arc::clone(h.dispatcher.sinks())));
        gate.admit(&route, RowEvent::Insert(EventContext::default(), chat(1, "a")));
        assert_eq!(gate.close(), 1);
        assert_eq!(h.dispatcher.sinks().metrics().snapshot().discarded_events, 1);
        gate.admit(&route, RowEvent::Insert(EventContext::default(), chat(2, "b")));
        assert_eq!(gate.open(), 0);
        assert_eq!(gate.close(), 0);
        assert_eq!(h.dispatcher.sinks().metrics().snapshot().discarded_events, 1);
        h.dispatcher.sinks().queue().barrier().await;
        assert!(h.cache.channels().is_empty());
    }
}
