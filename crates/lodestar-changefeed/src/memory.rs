//! In-memory changefeed link with scripted behavior.
//!
//! [`MemoryConnector`] hands out [`MemoryLink`]s whose handshake outcome is
//! scripted up front. Row events, drops, and subscription results pushed
//! onto a link are queued and only take effect inside the next
//! [`frame_tick`](ChangefeedLink::frame_tick), mirroring how a real link
//! delivers them.

use std::collections::{HashMap, VecDeque};
use std::mem;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::error::LinkError;
use crate::link::{
    ChangefeedLink, ConnectParams, ConnectionCallbacks, Connector, EventContext, RowValue,
    SubscriptionHandlers, TableHandle,
};
use crate::table::TableSet;

/// Scripted handshake result for the next connection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeOutcome {
    /// The handshake succeeds.
    Accept,
    /// The handshake fails with the given message.
    Fail(String),
    /// `connect` itself returns an error.
    Refuse(String),
    /// The handshake never completes.
    Stall,
}

/// Hands out [`MemoryLink`]s and records every attempt.
#[derive(Default)]
pub struct MemoryConnector {
    script: Mutex<VecDeque<HandshakeOutcome>>,
    always_fail: AtomicBool,
    reject_subscriptions: AtomicBool,
    seeds: Mutex<HashMap<String, Vec<RowValue>>>,
    attempts: Mutex<Vec<Instant>>,
    links: Mutex<Vec<Arc<MemoryLink>>>,
}

impl MemoryConnector {
    /// Create a connector whose attempts all succeed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the outcome of the next unscripted attempt.
    pub fn push_outcome(&self, outcome: HandshakeOutcome) {
        self.script.lock().push_back(outcome);
    }

    /// Fail the next `count` handshakes.
    pub fn fail_next(&self, count: usize) {
        let mut script = self.script.lock();
        for _ in 0..count {
            script.push_back(HandshakeOutcome::Fail("scripted failure".to_owned()));
        }
    }

    /// Fail every handshake once the script runs out.
    pub fn set_always_fail(&self, fail: bool) {
        self.always_fail.store(fail, Ordering::SeqCst);
    }

    /// Reject subscriptions on links created from now on.
    pub fn set_reject_subscriptions(&self, reject: bool) {
        self.reject_subscriptions.store(reject, Ordering::SeqCst);
    }

    /// Rows every new link materializes when a subscription is applied.
    pub fn seed_table(&self, table: &str, rows: Vec<RowValue>) {
        self.seeds.lock().insert(table.to_owned(), rows);
    }

    /// Times at which `connect` was called.
    pub fn attempts(&self) -> Vec<Instant> {
        self.attempts.lock().clone()
    }

    /// Number of `connect` calls.
    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().len()
    }

    /// Every link created so far, oldest first.
    pub fn links(&self) -> Vec<Arc<MemoryLink>> {
        self.links.lock().clone()
    }

    /// The most recently created link.
    pub fn last_link(&self) -> Option<Arc<MemoryLink>> {
        self.links.lock().last().cloned()
    }

    fn next_outcome(&self) -> HandshakeOutcome {
        if let Some(outcome) = self.script.lock().pop_front() {
            return outcome;
        }
        if self.always_fail.load(Ordering::SeqCst) {
            HandshakeOutcome::Fail("scripted failure".to_owned())
        } else {
            HandshakeOutcome::Accept
        }
    }
}

impl Connector for MemoryConnector {
    fn connect(
        &self,
        params: &ConnectParams,
        callbacks: ConnectionCallbacks,
    ) -> Result<Arc<dyn ChangefeedLink>, LinkError> {
        self.attempts.lock().push(Instant::now());
        let outcome = self.next_outcome();
        if let HandshakeOutcome::Refuse(message) = outcome {
            return Err(LinkError::Handshake(message));
        }

        let serial = self.links.lock().len();
        let link = Arc::new(MemoryLink {
            identity: format!("{}-identity-{serial}", params.module),
            handshake: Mutex::new(Some(outcome)),
            callbacks: Mutex::new(Some(callbacks)),
            on_disconnect: Mutex::new(None),
            active: AtomicBool::new(true),
            connected: AtomicBool::new(false),
            reject_subscriptions: self.reject_subscriptions.load(Ordering::SeqCst),
            seeds: self.seeds.lock().clone(),
            pending: Mutex::new(VecDeque::new()),
            tables: TableSet::default(),
            subscriptions: Mutex::new(Vec::new()),
            ticks: AtomicU64::new(0),
        });
        self.links.lock().push(Arc::clone(&link));
        Ok(link)
    }
}

enum Pending {
    Insert(String, EventContext, RowValue),
    Update(String, EventContext, RowValue, RowValue),
    Delete(String, EventContext, RowValue),
    Applied(SubscriptionHandlers),
    Drop(Option<LinkError>),
}

/// A scripted in-memory link.
pub struct MemoryLink {
    identity: String,
    handshake: Mutex<Option<HandshakeOutcome>>,
    callbacks: Mutex<Option<ConnectionCallbacks>>,
    on_disconnect: Mutex<Option<Box<dyn FnOnce(Option<LinkError>) + Send>>>,
    active: AtomicBool,
    connected: AtomicBool,
    reject_subscriptions: bool,
    seeds: HashMap<String, Vec<RowValue>>,
    pending: Mutex<VecDeque<Pending>>,
    tables: TableSet,
    subscriptions: Mutex<Vec<Vec<String>>>,
    ticks: AtomicU64,
}

impl MemoryLink {
    /// Queue an insert with unknown provenance.
    pub fn insert(&self, table: &str, row: RowValue) {
        self.insert_with(table, EventContext::default(), row);
    }

    /// Queue an insert with the given provenance.
    pub fn insert_with(&self, table: &str, ctx: EventContext, row: RowValue) {
        self.pending
            .lock()
            .push_back(Pending::Insert(table.to_owned(), ctx, row));
    }

    /// Queue an update.
    pub fn update(&self, table: &str, old: RowValue, new: RowValue) {
        self.pending.lock().push_back(Pending::Update(
            table.to_owned(),
            EventContext::default(),
            old,
            new,
        ));
    }

    /// Queue a delete.
    pub fn delete(&self, table: &str, row: RowValue) {
        self.pending
            .lock()
            .push_back(Pending::Delete(table.to_owned(), EventContext::default(), row));
    }

    /// Queue a session drop reported as an error.
    pub fn drop_with_error(&self, message: &str) {
        self.pending
            .lock()
            .push_back(Pending::Drop(Some(LinkError::Transport(message.to_owned()))));
    }

    /// Query sets passed to [`ChangefeedLink::subscribe`].
    pub fn subscriptions(&self) -> Vec<Vec<String>> {
        self.subscriptions.lock().clone()
    }

    /// Number of `frame_tick` calls observed.
    pub fn tick_count(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    /// Whether the handshake completed and the session has not ended.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn finish_handshake(&self, outcome: HandshakeOutcome) {
        let Some(callbacks) = self.callbacks.lock().take() else {
            return;
        };
        let ConnectionCallbacks {
            on_connect,
            on_connect_error,
            on_disconnect,
        } = callbacks;
        match outcome {
            HandshakeOutcome::Accept => {
                *self.on_disconnect.lock() = Some(on_disconnect);
                self.connected.store(true, Ordering::SeqCst);
                on_connect(self.identity.clone());
            }
            HandshakeOutcome::Fail(message) | HandshakeOutcome::Refuse(message) => {
                self.active.store(false, Ordering::SeqCst);
                on_connect_error(LinkError::Handshake(message));
            }
            HandshakeOutcome::Stall => {}
        }
    }

    fn end_session(&self, error: Option<LinkError>) {
        self.connected.store(false, Ordering::SeqCst);
        self.active.store(false, Ordering::SeqCst);
        self.pending.lock().clear();
        let callback = self.on_disconnect.lock().take();
        if let Some(cb) = callback {
            cb(error);
        }
    }
}

impl ChangefeedLink for MemoryLink {
    fn frame_tick(&self) -> Result<(), LinkError> {
        self.ticks.fetch_add(1, Ordering::SeqCst);
        let handshake = self.handshake.lock().take();
        if let Some(outcome) = handshake {
            if outcome == HandshakeOutcome::Stall {
                *self.handshake.lock() = Some(outcome);
            } else {
                self.finish_handshake(outcome);
            }
            return Ok(());
        }
        if !self.active.load(Ordering::SeqCst) {
            return Ok(());
        }

        let batch = mem::take(&mut *self.pending.lock());
        for item in batch {
            match item {
                Pending::Insert(table, ctx, row) => {
                    self.tables.get_or_create(&table).apply_insert(&ctx, row);
                }
                Pending::Update(table, ctx, old, new) => {
                    self.tables.get_or_create(&table).apply_update(&ctx, old, new);
                }
                Pending::Delete(table, ctx, row) => {
                    self.tables.get_or_create(&table).apply_delete(&ctx, row);
                }
                Pending::Applied(handlers) => {
                    if self.reject_subscriptions {
                        (handlers.on_error)(LinkError::Subscription("rejected".to_owned()));
                    } else {
                        for (name, rows) in &self.seeds {
                            self.tables.get_or_create(name).replace_rows(rows.clone());
                        }
                        (handlers.on_applied)();
                    }
                }
                Pending::Drop(error) => {
                    self.end_session(error);
                    break;
                }
            }
        }
        Ok(())
    }

    fn disconnect(&self) {
        if self.connected.load(Ordering::SeqCst) {
            self.pending.lock().push_back(Pending::Drop(None));
        } else if self.handshake.lock().take().is_some() {
            self.active.store(false, Ordering::SeqCst);
        }
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn identity(&self) -> Option<String> {
        self.connected
            .load(Ordering::SeqCst)
            .then(|| self.identity.clone())
    }

    fn subscribe(
        &self,
        queries: &[String],
        handlers: SubscriptionHandlers,
    ) -> Result<(), LinkError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(LinkError::NotConnected);
        }
        self.subscriptions.lock().push(queries.to_vec());
        self.pending.lock().push_back(Pending::Applied(handlers));
        Ok(())
    }

    fn table(&self, name: &str) -> Option<Arc<dyn TableHandle>> {
        let table: Arc<dyn TableHandle> = self.tables.get_or_create(name);
        Some(table)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use serde_json::json;

    use super::*;

    fn params() -> ConnectParams {
        ConnectParams {
            uri: "mem://".into(),
            module: "m1".into(),
            token: "t".into(),
        }
    }

    fn callbacks(connects: Arc<AtomicUsize>, errors: Arc<AtomicUsize>) -> ConnectionCallbacks {
        ConnectionCallbacks {
            on_connect: Box::new(move |_| {
                connects.fetch_add(1, Ordering::SeqCst);
            }),
            on_connect_error: Box::new(move |_| {
                errors.fetch_add(1, Ordering::SeqCst);
            }),
            on_disconnect: Box::new(|_| {}),
        }
    }

    #[tokio::test]
    async fn handshake_completes_on_first_tick() {
        let connector = MemoryConnector::new();
        let connects = Arc::new(AtomicUsize::new(0));
        let errors = Arc::new(AtomicUsize::new(0));
        let link = connector
            .connect(&params(), callbacks(Arc::clone(&connects), Arc::clone(&errors)))
            .unwrap();
        assert_eq!(connects.load(Ordering::SeqCst), 0);
        link.frame_tick().unwrap();
        assert_eq!(connects.load(Ordering::SeqCst), 1);
        assert_eq!(link.identity().as_deref(), Some("m1-identity-0"));
    }

    #[tokio::test]
    async fn scripted_failure_deactivates_link() {
        let connector = MemoryConnector::new();
        connector.fail_next(1);
        let connects = Arc::new(AtomicUsize::new(0));
        let errors = Arc::new(AtomicUsize::new(0));
        let link = connector
            .connect(&params(), callbacks(Arc::clone(&connects), Arc::clone(&errors)))
            .unwrap();
        link.frame_tick().unwrap();
        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert!(!link.is_active());
    }

    #[tokio::test]
    async fn rows_apply_only_inside_tick() {
        let connector = MemoryConnector::new();
        connector.seed_table("item_desc", vec![json!({"id": 1})]);
        let link = connector
            .connect(
                &params(),
                callbacks(Arc::new(AtomicUsize::new(0)), Arc::new(AtomicUsize::new(0))),
            )
            .unwrap();
        link.frame_tick().unwrap();
        link.subscribe(
            &["SELECT * FROM item_desc".to_owned()],
            SubscriptionHandlers {
                on_applied: Box::new(|| {}),
                on_error: Box::new(|_| {}),
            },
        )
        .unwrap();
        let mem = connector.last_link().unwrap();
        mem.insert("item_desc", json!({"id": 2}));
        let table = link.table("item_desc").unwrap();
        assert!(table.rows().is_empty());
        link.frame_tick().unwrap();
        assert_eq!(table.rows().len(), 2);
    }
}
