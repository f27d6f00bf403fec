//! Single-slot holder for the current live connection.
//!
//! Backed by a [`tokio::sync::watch`] channel: every [`ConnectionSlot::set`]
//! wakes all current waiters with the new value, including `None`, and
//! later waiters see the latest value immediately.

use std::fmt;
use std::sync::Arc;

use lodestar_changefeed::ChangefeedLink;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// One continuous period during which a single physical connection is live.
///
/// Epochs compare by `id`, never by link contents.
#[derive(Clone)]
pub struct ConnectionEpoch {
    id: u64,
    link: Arc<dyn ChangefeedLink>,
}

impl ConnectionEpoch {
    /// Wrap a connected link.
    pub fn new(id: u64, link: Arc<dyn ChangefeedLink>) -> Self {
        Self { id, link }
    }

    /// Epoch identifier, unique for the process lifetime.
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// The link driving this epoch.
    pub const fn link(&self) -> &Arc<dyn ChangefeedLink> {
        &self.link
    }
}

impl PartialEq for ConnectionEpoch {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ConnectionEpoch {}

impl fmt::Debug for ConnectionEpoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionEpoch")
            .field("id", &self.id)
            .field("active", &self.link.is_active())
            .finish()
    }
}

/// Broadcast holder for "the current live connection".
///
/// Single writer (the resilience manager), many readers.
#[derive(Debug)]
pub struct ConnectionSlot {
    tx: watch::Sender<Option<ConnectionEpoch>>,
}

impl Default for ConnectionSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionSlot {
    /// Create an empty slot.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Replace the current value and wake every waiter.
    pub fn set(&self, epoch: Option<ConnectionEpoch>) {
        self.tx.send_replace(epoch);
    }

    /// The current value, without waiting.
    pub fn try_get(&self) -> Option<ConnectionEpoch> {
        self.tx.borrow().clone()
    }

    /// Id of the current epoch, if any.
    pub fn current_id(&self) -> Option<u64> {
        self.tx.borrow().as_ref().map(ConnectionEpoch::id)
    }

    /// Whether `epoch_id` is still the live epoch.
    pub fn is_current(&self, epoch_id: u64) -> bool {
        self.current_id() == Some(epoch_id)
    }

    /// Return the current connection if one is live, otherwise wait for the
    /// next [`set`](Self::set) and return whatever it stored.
    ///
    /// Returns `None` when `cancel` fires or the next `set` stores `None`.
    pub async fn await_connection(&self, cancel: &CancellationToken) -> Option<ConnectionEpoch> {
        let mut rx = self.tx.subscribe();
        if let Some(epoch) = rx.borrow_and_update().clone() {
            return Some(epoch);
        }
        tokio::select! {
            () = cancel.cancelled() => None,
            changed = rx.changed() => match changed {
                Ok(()) => rx.borrow_and_update().clone(),
                Err(_) => None,
            },
        }
    }

    /// Clear the slot only if it still holds `epoch_id`.
    ///
    /// Returns `true` if the slot was cleared.
    pub fn clear_if(&self, epoch_id: u64) -> bool {
        self.tx.send_if_modified(|current| {
            if current.as_ref().is_some_and(|e| e.id == epoch_id) {
                *current = None;
                true
            } else {
                false
            }
        })
    }
}
