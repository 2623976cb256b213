//! Presence registry
//!
//! Single owner of the username → live connection binding. At most one
//! connection is addressable per username at any instant; a later
//! identify for the same username overwrites the binding (last writer
//! wins) and the superseded socket silently stops being addressable.

use crate::ConnId;
use dashmap::DashMap;
use tokio::sync::mpsc;

/// The live connection currently bound to a username.
#[derive(Debug, Clone)]
pub struct PresenceHandle {
    pub conn_id: ConnId,
    pub tx: mpsc::Sender<String>,
}

/// Username → connection map. Operations on the same username are
/// serialized by the map's shard locks; distinct usernames proceed
/// concurrently.
#[derive(Default)]
pub struct PresenceRegistry {
    entries: DashMap<String, PresenceHandle>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Bind `username` to a connection, overwriting any existing entry.
    /// Returns the superseded connection id when a different connection
    /// held the binding.
    pub fn bind(&self, username: &str, conn_id: ConnId, tx: mpsc::Sender<String>) -> Option<ConnId> {
        let previous = self
            .entries
            .insert(username.to_string(), PresenceHandle { conn_id, tx });

        previous
            .map(|handle| handle.conn_id)
            .filter(|&prev| prev != conn_id)
    }

    /// Find the connection a direct message for `username` should go to.
    pub fn lookup(&self, username: &str) -> Option<PresenceHandle> {
        self.entries.get(username).map(|entry| entry.value().clone())
    }

    /// Remove the binding for `username` only if it still belongs to
    /// `conn_id`. Returns whether an entry was removed. The guard keeps
    /// a stale disconnect from evicting a newer connection's binding.
    pub fn unbind(&self, username: &str, conn_id: ConnId) -> bool {
        self.entries
            .remove_if(username, |_, handle| handle.conn_id == conn_id)
            .is_some()
    }

    /// Number of usernames currently bound.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
