//! Changefeed links for the Lodestar event gateway.
//!
//! The gateway consumes a live, subscribable source database through the
//! [`ChangefeedLink`] contract. Links are passive: their owner drives them
//! with [`ChangefeedLink::frame_tick`], and every callback fires from
//! inside that call.
//!
//! # Modules
//!
//! - [`link`] -- Connector, link, and table handle traits
//! - [`table`] -- Client-side table cache shared by the implementations
//! - [`ws`] -- JSON-over-WebSocket link
//! - [`memory`] -- Scripted in-memory link for tests
//! - [`error`] -- Link error type

pub mod error;
pub mod link;
pub mod memory;
pub mod table;
pub mod ws;

pub use error::LinkError;
pub use link::{
    ChangefeedLink, ConnectParams, ConnectionCallbacks, Connector, EventContext, RowCallback,
    RowValue, SubscriptionHandlers, TableHandle, UpdateCallback,
};
pub use memory::{HandshakeOutcome, MemoryConnector, MemoryLink};
pub use table::{TableCache, TableSet};
pub use ws::{WsConnector, WsLink};
