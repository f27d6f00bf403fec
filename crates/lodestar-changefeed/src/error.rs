//! Error types for changefeed links.

/// Errors reported by a changefeed link.
///
/// Payloads are rendered strings so errors can be cloned into callbacks.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    /// The connection handshake failed.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// The transport failed mid-session.
    #[error("transport error: {0}")]
    Transport(String),

    /// The remote side closed the session.
    #[error("connection closed: {0}")]
    Closed(String),

    /// The source rejected a subscription query set.
    #[error("subscription rejected: {0}")]
    Subscription(String),

    /// A frame could not be decoded or violated the protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The operation needs an established session.
    #[error("link is not connected")]
    NotConnected,
}
