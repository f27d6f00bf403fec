//! The changefeed link contract.
//!
//! A [`Connector`] opens a [`ChangefeedLink`]. The link does no work on its
//! own: the owner drives it by calling [`ChangefeedLink::frame_tick`] at a
//! steady cadence, and every callback (connection lifecycle, subscription
//! results, row events) fires from inside that call, in source order.

use std::sync::Arc;

use crate::error::LinkError;

/// A source row, as delivered by the link.
pub type RowValue = serde_json::Value;

/// Callback for row inserts and deletes.
pub type RowCallback = Arc<dyn Fn(&EventContext, &RowValue) + Send + Sync>;

/// Callback for row updates, receiving the old and the new row.
pub type UpdateCallback = Arc<dyn Fn(&EventContext, &RowValue, &RowValue) + Send + Sync>;

/// Provenance of a row event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventContext {
    /// Identity of the caller whose action produced the change.
    pub caller_identity: Option<String>,
    /// Name of the action that produced the change.
    pub action: Option<String>,
}

impl EventContext {
    /// Context for a change with known provenance.
    pub fn new(caller_identity: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            caller_identity: Some(caller_identity.into()),
            action: Some(action.into()),
        }
    }
}

/// Parameters for opening a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectParams {
    /// Source endpoint.
    pub uri: String,
    /// Module (database) name.
    pub module: String,
    /// Bearer token.
    pub token: String,
}

/// Lifecycle callbacks for one link. Each fires at most once.
pub struct ConnectionCallbacks {
    /// The handshake completed; receives the link identity.
    pub on_connect: Box<dyn FnOnce(String) + Send>,
    /// The handshake failed.
    pub on_connect_error: Box<dyn FnOnce(LinkError) + Send>,
    /// An established session ended; `None` for an orderly close.
    pub on_disconnect: Box<dyn FnOnce(Option<LinkError>) + Send>,
}

impl std::fmt::Debug for ConnectionCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionCallbacks").finish_non_exhaustive()
    }
}

/// Result callbacks for one subscription request.
pub struct SubscriptionHandlers {
    /// The initial rows for every query are materialized in the tables.
    pub on_applied: Box<dyn FnOnce() + Send>,
    /// The source rejected the query set.
    pub on_error: Box<dyn FnOnce(LinkError) + Send>,
}

impl std::fmt::Debug for SubscriptionHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandlers").finish_non_exhaustive()
    }
}

/// A client-side table cache fed by the link.
pub trait TableHandle: Send + Sync {
    /// Source table name.
    fn name(&self) -> &str;

    /// Snapshot of every currently materialized row.
    fn rows(&self) -> Vec<RowValue>;

    /// Register a callback fired after a row is inserted.
    fn on_insert(&self, callback: RowCallback);

    /// Register a callback fired after a row is replaced.
    fn on_update(&self, callback: UpdateCallback);

    /// Register a callback fired after a row is removed.
    fn on_delete(&self, callback: RowCallback);
}

/// A live, subscribable connection to the source database.
pub trait ChangefeedLink: Send + Sync {
    /// Process everything received since the previous tick and fire the
    /// resulting callbacks.
    fn frame_tick(&self) -> Result<(), LinkError>;

    /// Request an orderly close. Completion is observed through later
    /// ticks until [`is_active`](Self::is_active) reports `false`.
    fn disconnect(&self);

    /// Whether the link still holds (or is still opening) a session.
    fn is_active(&self) -> bool;

    /// Identity assigned by the source, once the handshake completed.
    fn identity(&self) -> Option<String>;

    /// Issue a subscription for a set of queries.
    fn subscribe(&self, queries: &[String], handlers: SubscriptionHandlers)
    -> Result<(), LinkError>;

    /// Look up a table by source name.
    fn table(&self, name: &str) -> Option<Arc<dyn TableHandle>>;
}

/// Opens changefeed links.
pub trait Connector: Send + Sync {
    /// Start opening a link. The handshake completes during later ticks.
    fn connect(
        &self,
        params: &ConnectParams,
        callbacks: ConnectionCallbacks,
    ) -> Result<Arc<dyn ChangefeedLink>, LinkError>;
}
