//! Identity Registry
//!
//! Single source of truth for presence: maps each identity (phone number)
//! to its current live connection and optional push token.
//! Uses DashMap so every operation locks only the shard holding the entry.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::mpsc;
use tracing::debug;

use crate::envelope::ServerMessage;

/// Outbound half of a connection
///
/// Cloning is cheap. Two handles are equal when they refer to the same
/// connection, regardless of which clone is compared.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    conn_id: u64,
    tx: mpsc::Sender<ServerMessage>,
}

impl ConnectionHandle {
    pub fn new(conn_id: u64, tx: mpsc::Sender<ServerMessage>) -> Self {
        Self { conn_id, tx }
    }

    pub fn conn_id(&self) -> u64 {
        self.conn_id
    }

    /// A connection is open while its outbound receiver is alive
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Queue a message for the connection's writer
    pub async fn send(&self, msg: ServerMessage) -> Result<(), ConnectionClosed> {
        self.tx.send(msg).await.map_err(|_| ConnectionClosed {
            conn_id: self.conn_id,
        })
    }

    /// Queue a message without waiting for queue space
    pub fn try_send(&self, msg: ServerMessage) -> Result<(), DeliveryError> {
        self.tx.try_send(msg).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Full {
                conn_id: self.conn_id,
            },
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed {
                conn_id: self.conn_id,
            },
        })
    }
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.conn_id == other.conn_id
    }
}

impl Eq for ConnectionHandle {}

/// Send to a connection whose writer is gone
#[derive(Debug, thiserror::Error)]
#[error("connection {conn_id} is closed")]
pub struct ConnectionClosed {
    pub conn_id: u64,
}

/// Non-blocking delivery errors
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("connection {conn_id} outbound queue is full")]
    Full { conn_id: u64 },
    #[error("connection {conn_id} is closed")]
    Closed { conn_id: u64 },
}

/// Per-identity presence
///
/// Never stored with both fields empty.
#[derive(Debug, Clone, Default)]
pub struct RegistryEntry {
    pub connection: Option<ConnectionHandle>,
    pub push_token: Option<String>,
}

impl RegistryEntry {
    fn is_empty(&self) -> bool {
        self.connection.is_none() && self.push_token.is_none()
    }
}

/// Registry of identities
#[derive(Default)]
pub struct Registry {
    /// identity -> entry
    entries: DashMap<String, RegistryEntry>,

    /// Connection ID allocator
    next_conn_id: AtomicU64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a connection ID and its outbound channel
    pub fn open_channel(
        &self,
        capacity: usize,
    ) -> (ConnectionHandle, mpsc::Receiver<ServerMessage>) {
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (ConnectionHandle::new(conn_id, tx), rx)
    }

    /// Bind `identity` to `handle`, keeping any known push token
    ///
    /// Last register wins: a previous connection for the same identity is
    /// replaced silently.
    pub fn register(&self, identity: &str, handle: ConnectionHandle) {
        let conn_id = handle.conn_id();
        let mut entry = self.entries.entry(identity.to_string()).or_default();

        if let Some(previous) = entry.connection.replace(handle)
            && previous.conn_id() != conn_id
        {
            debug!(identity, replaced = previous.conn_id(), conn_id, "connection replaced");
        } else {
            debug!(identity, conn_id, "connection registered");
        }
    }

    /// Set the push token for `identity`, keeping any live connection
    pub fn register_token(&self, identity: &str, token: &str) {
        self.entries
            .entry(identity.to_string())
            .or_default()
            .push_token = Some(token.to_string());
        debug!(identity, "push token registered");
    }

    /// Get the connection for `identity` if it is still open
    ///
    /// A stored but closed handle is reported as absent and left in place.
    pub fn lookup_connection(&self, identity: &str) -> Option<ConnectionHandle> {
        self.entries
            .get(identity)?
            .connection
            .as_ref()
            .filter(|handle| handle.is_open())
            .cloned()
    }

    /// Get the push token for `identity`
    pub fn lookup_token(&self, identity: &str) -> Option<String> {
        self.entries.get(identity)?.push_token.clone()
    }

    /// Unbind `identity` from `handle`
    ///
    /// Does nothing unless `handle` is the identity's current connection,
    /// so a late disconnect never evicts a newer registration. The entry is
    /// dropped when no token remains. Returns whether anything was removed.
    pub fn remove_connection(&self, identity: &str, handle: &ConnectionHandle) -> bool {
        let Entry::Occupied(mut occupied) = self.entries.entry(identity.to_string()) else {
            return false;
        };

        if occupied.get().connection.as_ref() != Some(handle) {
            debug!(identity, conn_id = handle.conn_id(), "stale disconnect ignored");
            return false;
        }

        occupied.get_mut().connection = None;
        if occupied.get().is_empty() {
            occupied.remove();
        }

        debug!(identity, conn_id = handle.conn_id(), "connection removed");
        true
    }

    /// Drop closed connections and empty entries, returning entries removed
    pub fn sweep(&self) -> usize {
        let before = self.entries.len();

        self.entries.retain(|identity, entry| {
            if entry.connection.as_ref().is_some_and(|c| !c.is_open()) {
                debug!(identity = %identity, "pruned closed connection");
                entry.connection = None;
            }
            !entry.is_empty()
        });

        before.saturating_sub(self.entries.len())
    }

    /// Number of known identities
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of identities with an open connection
    pub fn online_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.connection.as_ref().is_some_and(|c| c.is_open()))
            .count()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("entries", &self.entries.len())
            .field("next_conn_id", &self.next_conn_id.load(Ordering::Relaxed))
            .finish()
    }
}
