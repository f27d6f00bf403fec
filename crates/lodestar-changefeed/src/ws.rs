//! JSON-over-WebSocket changefeed link.
//!
//! A background reader task owns the socket. Decoded server frames are
//! queued on a bounded channel and applied only inside
//! [`frame_tick`](ChangefeedLink::frame_tick), so row callbacks run on the
//! frame pump in the order the server sent them.
//!
//! # Protocol
//!
//! ```text
//! client -> {"type":"subscribe","request_id":1,"queries":["SELECT * FROM item_desc"]}
//! server -> {"type":"identity","identity":"c200..."}
//! server -> {"type":"subscription_applied","request_id":1,"tables":[{"name":"item_desc","rows":[...]}]}
//! server -> {"type":"subscription_error","request_id":1,"error":"..."}
//! server -> {"type":"transaction","caller_identity":"c200...","action":"craft",
//!            "operations":[{"op":"insert","table":"item_desc","row":{...}}]}
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::{HeaderValue, Request};
use tracing::{debug, warn};

use crate::error::LinkError;
use crate::link::{
    ChangefeedLink, ConnectParams, ConnectionCallbacks, Connector, EventContext, RowValue,
    SubscriptionHandlers, TableHandle,
};
use crate::table::TableSet;

/// Capacity of the reader-to-tick frame queue.
const INBOUND_CAPACITY: usize = 4096;

/// Frames sent by the server.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Handshake completed; carries the identity assigned to this client.
    Identity {
        /// Assigned identity.
        identity: String,
    },
    /// Initial rows for a subscription request.
    SubscriptionApplied {
        /// Request being answered.
        request_id: u64,
        /// Rows per subscribed table.
        tables: Vec<TableRows>,
    },
    /// A subscription request was rejected.
    SubscriptionError {
        /// Request being answered.
        request_id: u64,
        /// Rejection reason.
        error: String,
    },
    /// Row changes from one committed action.
    Transaction {
        /// Caller whose action produced the change.
        #[serde(default)]
        caller_identity: Option<String>,
        /// Action name.
        #[serde(default)]
        action: Option<String>,
        /// Row operations in commit order.
        operations: Vec<TableOperation>,
    },
}

/// Rows of one table in a subscription snapshot.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TableRows {
    /// Table name.
    pub name: String,
    /// Materialized rows.
    pub rows: Vec<RowValue>,
}

/// One row operation inside a transaction.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TableOperation {
    /// Row inserted.
    Insert {
        /// Table name.
        table: String,
        /// Inserted row.
        row: RowValue,
    },
    /// Row replaced.
    Update {
        /// Table name.
        table: String,
        /// Previous row.
        old: RowValue,
        /// New row.
        new: RowValue,
    },
    /// Row removed.
    Delete {
        /// Table name.
        table: String,
        /// Removed row.
        row: RowValue,
    },
}

/// Frames sent by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Subscribe to a set of queries.
    Subscribe {
        /// Correlates the server's answer.
        request_id: u64,
        /// Query strings.
        queries: Vec<String>,
    },
}

enum Inbound {
    Opened,
    HandshakeFailed(LinkError),
    Frame(ServerFrame),
    Closed(Option<LinkError>),
}

/// Opens [`WsLink`]s against `{uri}/database/{module}/subscribe`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl WsConnector {
    /// Build the upgrade request for a connection.
    pub fn request(params: &ConnectParams) -> Result<Request<()>, LinkError> {
        let base = params.uri.trim_end_matches('/');
        let mut request = format!("{base}/database/{}/subscribe", params.module)
            .into_client_request()
            .map_err(|e| LinkError::Handshake(e.to_string()))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", params.token))
            .map_err(|e| LinkError::Handshake(e.to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);
        Ok(request)
    }
}

impl Connector for WsConnector {
    fn connect(
        &self,
        params: &ConnectParams,
        callbacks: ConnectionCallbacks,
    ) -> Result<Arc<dyn ChangefeedLink>, LinkError> {
        let request = Self::request(params)?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| LinkError::Transport(e.to_string()))?;

        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let reader = runtime.spawn(run_socket(request, inbound_tx, outbound_rx));

        Ok(Arc::new(WsLink {
            inbound: Mutex::new(inbound_rx),
            outbound: outbound_tx,
            reader: Mutex::new(Some(reader)),
            callbacks: Mutex::new(Some(callbacks)),
            on_disconnect: Mutex::new(None),
            identity: Mutex::new(None),
            opened: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            active: AtomicBool::new(true),
            next_request_id: AtomicU64::new(1),
            pending_subscriptions: Mutex::new(HashMap::new()),
            tables: TableSet::default(),
        }))
    }
}

async fn run_socket(
    request: Request<()>,
    inbound: mpsc::Sender<Inbound>,
    mut outbound: mpsc::UnboundedReceiver<Message>,
) {
    let stream = match tokio_tungstenite::connect_async(request).await {
        Ok((stream, _)) => stream,
        Err(e) => {
            let _ = inbound
                .send(Inbound::HandshakeFailed(LinkError::Handshake(e.to_string())))
                .await;
            return;
        }
    };
    if inbound.send(Inbound::Opened).await.is_err() {
        return;
    }

    let (mut write, mut read) = stream.split();
    let mut outbound_open = true;
    let closed = loop {
        tokio::select! {
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<ServerFrame>(&text) {
                    Ok(frame) => {
                        if inbound.send(Inbound::Frame(frame)).await.is_err() {
                            break None;
                        }
                    }
                    Err(e) => warn!(error = %e, "Dropping undecodable changefeed frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "Changefeed sent close frame");
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break Some(LinkError::Transport(e.to_string())),
                None => break None,
            },
            out = outbound.recv(), if outbound_open => match out {
                Some(msg) => {
                    if let Err(e) = write.send(msg).await {
                        break Some(LinkError::Transport(e.to_string()));
                    }
                }
                None => {
                    outbound_open = false;
                    let _ = write.close().await;
                }
            },
        }
    };
    let _ = inbound.send(Inbound::Closed(closed)).await;
}

/// A changefeed link over a WebSocket.
pub struct WsLink {
    inbound: Mutex<mpsc::Receiver<Inbound>>,
    outbound: mpsc::UnboundedSender<Message>,
    reader: Mutex<Option<JoinHandle<()>>>,
    callbacks: Mutex<Option<ConnectionCallbacks>>,
    on_disconnect: Mutex<Option<Box<dyn FnOnce(Option<LinkError>) + Send>>>,
    identity: Mutex<Option<String>>,
    opened: AtomicBool,
    connected: AtomicBool,
    active: AtomicBool,
    next_request_id: AtomicU64,
    pending_subscriptions: Mutex<HashMap<u64, SubscriptionHandlers>>,
    tables: TableSet,
}

impl WsLink {
    fn drain_inbound(&self) -> Vec<Inbound> {
        let mut rx = self.inbound.lock();
        let mut batch = Vec::new();
        while let Ok(item) = rx.try_recv() {
            batch.push(item);
        }
        batch
    }

    fn fail_handshake(&self, error: LinkError) {
        self.active.store(false, Ordering::SeqCst);
        let callbacks = self.callbacks.lock().take();
        if let Some(cb) = callbacks {
            (cb.on_connect_error)(error);
        }
    }

    fn complete_handshake(&self, identity: String) {
        *self.identity.lock() = Some(identity.clone());
        let callbacks = self.callbacks.lock().take();
        if let Some(cb) = callbacks {
            *self.on_disconnect.lock() = Some(cb.on_disconnect);
            self.connected.store(true, Ordering::SeqCst);
            (cb.on_connect)(identity);
        }
    }

    fn close(&self, error: Option<LinkError>) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            let reason = error.unwrap_or_else(|| {
                LinkError::Handshake("closed before identity was received".to_owned())
            });
            self.fail_handshake(reason);
            return;
        }
        self.active.store(false, Ordering::SeqCst);
        let callback = self.on_disconnect.lock().take();
        if let Some(cb) = callback {
            cb(error);
        }
    }

    fn apply_frame(&self, frame: ServerFrame) {
        match frame {
            ServerFrame::Identity { identity } => self.complete_handshake(identity),
            ServerFrame::SubscriptionApplied { request_id, tables } => {
                for t in tables {
                    self.tables.get_or_create(&t.name).replace_rows(t.rows);
                }
                let handlers = self.pending_subscriptions.lock().remove(&request_id);
                if let Some(h) = handlers {
                    (h.on_applied)();
                }
            }
            ServerFrame::SubscriptionError { request_id, error } => {
                let handlers = self.pending_subscriptions.lock().remove(&request_id);
                if let Some(h) = handlers {
                    (h.on_error)(LinkError::Subscription(error));
                }
            }
            ServerFrame::Transaction {
                caller_identity,
                action,
                operations,
            } => {
                let ctx = EventContext {
                    caller_identity,
                    action,
                };
                for op in operations {
                    match op {
                        TableOperation::Insert { table, row } => {
                            self.tables.get_or_create(&table).apply_insert(&ctx, row);
                        }
                        TableOperation::Update { table, old, new } => {
                            self.tables.get_or_create(&table).apply_update(&ctx, old, new);
                        }
                        TableOperation::Delete { table, row } => {
                            self.tables.get_or_create(&table).apply_delete(&ctx, row);
                        }
                    }
                }
            }
        }
    }
}

impl ChangefeedLink for WsLink {
    fn frame_tick(&self) -> Result<(), LinkError> {
        if !self.active.load(Ordering::SeqCst) {
            return Ok(());
        }
        for item in self.drain_inbound() {
            match item {
                Inbound::Opened => self.opened.store(true, Ordering::SeqCst),
                Inbound::HandshakeFailed(e) => self.fail_handshake(e),
                Inbound::Frame(frame) => self.apply_frame(frame),
                Inbound::Closed(e) => {
                    self.close(e);
                    break;
                }
            }
        }
        Ok(())
    }

    fn disconnect(&self) {
        if self.outbound.send(Message::Close(None)).is_err() {
            self.active.store(false, Ordering::SeqCst);
        }
        if !self.opened.load(Ordering::SeqCst) {
            if let Some(reader) = self.reader.lock().take() {
                reader.abort();
            }
            self.active.store(false, Ordering::SeqCst);
        }
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn identity(&self) -> Option<String> {
        self.identity.lock().clone()
    }

    fn subscribe(
        &self,
        queries: &[String],
        handlers: SubscriptionHandlers,
    ) -> Result<(), LinkError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(LinkError::NotConnected);
        }
        let request_id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
        let frame = ClientFrame::Subscribe {
            request_id,
            queries: queries.to_vec(),
        };
        let text = serde_json::to_string(&frame).map_err(|e| LinkError::Protocol(e.to_string()))?;
        self.pending_subscriptions.lock().insert(request_id, handlers);
        self.outbound
            .send(Message::Text(text))
            .map_err(|e| LinkError::Transport(e.to_string()))
    }

    fn table(&self, name: &str) -> Option<Arc<dyn TableHandle>> {
        let table: Arc<dyn TableHandle> = self.tables.get_or_create(name);
        Some(table)
    }
}

impl Drop for WsLink {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
    }
}
