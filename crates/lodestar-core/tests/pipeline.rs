//! Base population and gated activation against an in-memory changefeed.

#![allow(clippy::unwrap_used, clippy::indexing_slicing, clippy::missing_panics_doc)]

use std::sync::Arc;

use lodestar_changefeed::{
    ChangefeedLink, ConnectParams, ConnectionCallbacks, Connector, EventContext, MemoryConnector,
    SubscriptionHandlers,
};
use lodestar_core::{
    ChangeDispatcher, DispatchSinks, GatewayMetrics, PreparedEpoch, SinkQueue, default_registry,
};
use lodestar_db::{BufferedWriter, CacheOp, MemoryCache, MemoryStore, WriterConfig};
use parking_lot::Mutex;
use serde_json::{Value, json};

struct Fixture {
    connector: MemoryConnector,
    cache: Arc<MemoryCache>,
    store: Arc<MemoryStore>,
    metrics: Arc<GatewayMetrics>,
    dispatcher: Arc<ChangeDispatcher>,
}

fn fixture() -> Fixture {
    let cache = Arc::new(MemoryCache::new());
    let store = Arc::new(MemoryStore::new());
    let metrics = Arc::new(GatewayMetrics::new());
    let writer = Arc::new(BufferedWriter::new(
        Arc::clone(&store) as _,
        WriterConfig::default(),
    ));
    let (queue, _worker) = SinkQueue::spawn(Arc::clone(&cache) as _, 256, Arc::clone(&metrics));
    let sinks = Arc::new(DispatchSinks::new(
        "m1",
        queue,
        Arc::clone(&cache) as _,
        writer,
        Arc::clone(&metrics),
    ));
    let dispatcher = Arc::new(ChangeDispatcher::new(
        Arc::new(default_registry().unwrap()),
        sinks,
    ));
    Fixture {
        connector: MemoryConnector::new(),
        cache,
        store,
        metrics,
        dispatcher,
    }
}

fn item(id: i32, name: &str) -> Value {
    json!({
        "id": id, "name": name, "description": "", "volume": 1, "tier": 1,
        "rarity": 1, "item_list_id": 0, "compendium_entry": false
    })
}

fn chat(id: u64, text: &str) -> Value {
    json!({
        "entity_id": id, "channel_id": 1, "owner_entity_id": 3,
        "username": "ana", "text": text, "timestamp": 1_700_000_000
    })
}

fn open_link(connector: &MemoryConnector) -> Arc<dyn ChangefeedLink> {
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

/// Subscribe and prepare the dispatcher from inside the applied callback.
fn subscribe(
    link: &Arc<dyn ChangefeedLink>,
    dispatcher: &Arc<ChangeDispatcher>,
) -> Arc<Mutex<Option<PreparedEpoch>>> {
    let prepared = Arc::new(Mutex::new(None));
    let (out, d, l) = (Arc::clone(&prepared), Arc::clone(dispatcher), Arc::clone(link));
    link.subscribe(
        &["SELECT * FROM item_desc".to_owned()],
        SubscriptionHandlers {
            on_applied: Box::new(move || {
                *out.lock() = Some(d.prepare(l.as_ref()));
            }),
            on_error: Box::new(|_| {}),
        },
    )
    .unwrap();
    prepared
}

#[tokio::test]
async fn population_precedes_row_events() {
    let f = fixture();
    f.connector
        .seed_table("item_desc", vec![item(1, "A"), item(2, "B"), item(3, "C")]);
    let link = open_link(&f.connector);
    let slot = subscribe(&link, &f.dispatcher);

    // Applied and the insert land in the same frame.
    f.connector.last_link().unwrap().insert("item_desc", item(4, "D"));
    link.frame_tick().unwrap();

    let prepared = slot.lock().take().unwrap();
    assert_eq!(prepared.snapshot_rows(), 3);
    assert_eq!(prepared.gate().held(), 1);
    f.dispatcher.sinks().queue().barrier().await;
    assert!(f.cache.published("world.item.insert").is_empty());

    let report = f.dispatcher.populate_base(&prepared).await;
    assert_eq!(report.mapped, 3);
    assert_eq!(report.cached, 3);
    assert_eq!(report.persisted, 3);
    assert_eq!(f.store.row_count("items"), 3);

    assert_eq!(f.dispatcher.activate(&prepared), 1);
    f.dispatcher.sinks().queue().barrier().await;

    let published = f.cache.published("world.item.insert");
    assert_eq!(published.len(), 1);
    let envelope: Value = serde_json::from_str(&published[0]).unwrap();
    assert_eq!(envelope["entity"]["id"], "4");
    assert_eq!(f.cache.hash("cache:Item:global").len(), 4);

    let ops = f.cache.ops();
    let last_snapshot_write = ops
        .iter()
        .rposition(|op| matches!(op, CacheOp::HashSet { field, .. } if field == "3"))
        .unwrap();
    let first_publish = ops
        .iter()
        .position(|op| matches!(op, CacheOp::Publish { .. }))
        .unwrap();
    assert!(last_snapshot_write < first_publish);
}

#[tokio::test]
async fn events_after_activation_flow_directly() {
    let f = fixture();
    let link = open_link(&f.connector);
    let slot = subscribe(&link, &f.dispatcher);
    link.frame_tick().unwrap();
    let prepared = slot.lock().take().unwrap();
    f.dispatcher.populate_base(&prepared).await;
    f.dispatcher.activate(&prepared);

    let memory = f.connector.last_link().unwrap();
    memory.insert_with("chat_message_state", EventContext::new("abc", "chat_post"), chat(5, "hi"));
    memory.update("chat_message_state", chat(5, "hi"), chat(5, "hello"));
    memory.delete("chat_message_state", chat(5, "hello"));
    link.frame_tick().unwrap();
    f.dispatcher.sinks().queue().barrier().await;

    assert_eq!(
        f.cache.channels(),
        vec![
            "world.chat.message.insert".to_owned(),
            "world.chat.message.update".to_owned(),
            "world.chat.message.delete".to_owned(),
        ]
    );
    let insert: Value =
        serde_json::from_str(&f.cache.published("world.chat.message.insert")[0]).unwrap();
    assert_eq!(insert["callerIdentity"], "abc");
    assert_eq!(insert["action"], "chat_post");
    assert!(f.cache.hash("cache:ChatMessage:m1").is_empty());
}

#[tokio::test]
async fn population_replaces_stale_module_keys() {
    let f = fixture();
    f.cache.seed("cache:ChatMessage:m1", "99", "{}");
    f.connector.seed_table("chat_message_state", vec![chat(5, "fresh")]);
    let link = open_link(&f.connector);
    let slot = subscribe(&link, &f.dispatcher);
    link.frame_tick().unwrap();
    let prepared = slot.lock().take().unwrap();

    f.dispatcher.populate_base(&prepared).await;

    let hash = f.cache.hash("cache:ChatMessage:m1");
    assert_eq!(hash.len(), 1);
    assert!(hash.contains_key("5"));
    assert!(f.cache.ops().iter().any(
        |op| matches!(op, CacheOp::DeleteMatching { pattern } if pattern == "cache:*:m1")
    ));
}

#[tokio::test]
async fn unmappable_snapshot_row_is_skipped() {
    let f = fixture();
    f.connector.seed_table(
        "item_desc",
        vec![item(1, "A"), json!({"id": "not-a-number"})],
    );
    let link = open_link(&f.connector);
    let slot = subscribe(&link, &f.dispatcher);
    link.frame_tick().unwrap();
    let prepared = slot.lock().take().unwrap();

    let report = f.dispatcher.populate_base(&prepared).await;

    assert_eq!(report.mapped, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(f.metrics.snapshot().mapping_failures, 1);
    assert_eq!(f.store.row_count("items"), 1);
}

#[tokio::test]
async fn durable_failure_does_not_block_cache_or_publish() {
    let f = fixture();
    f.store.set_failing(true);
    f.connector.seed_table("item_desc", vec![item(1, "A")]);
    let link = open_link(&f.connector);
    let slot = subscribe(&link, &f.dispatcher);
    link.frame_tick().unwrap();
    let prepared = slot.lock().take().unwrap();

    let report = f.dispatcher.populate_base(&prepared).await;
    assert_eq!(report.cached, 1);
    assert_eq!(report.persisted, 0);

    f.dispatcher.activate(&prepared);
    f.connector.last_link().unwrap().insert("item_desc", item(2, "B"));
    link.frame_tick().unwrap();
    f.dispatcher.sinks().queue().barrier().await;

    assert_eq!(f.cache.published("world.item.insert").len(), 1);
    assert_eq!(f.cache.hash("cache:Item:global").len(), 2);
    assert_eq!(f.store.row_count("items"), 0);
}

#[tokio::test]
async fn closed_epoch_ignores_late_events() {
    let f = fixture();
    let link = open_link(&f.connector);
    let slot = subscribe(&link, &f.dispatcher);
    link.frame_tick().unwrap();
    let prepared = slot.lock().take().unwrap();
    f.dispatcher.activate(&prepared);
    prepared.close();

    f.connector.last_link().unwrap().insert("chat_message_state", chat(1, "late"));
    link.frame_tick().unwrap();
    f.dispatcher.sinks().queue().barrier().await;

    assert!(f.cache.channels().is_empty());
}
