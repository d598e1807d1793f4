use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use campus_shared::UserId;

use super::events::ConnectionId;

/// Which users are reachable right now, and through which connections.
///
/// A user may hold several connections (tabs, devices). The user counts as
/// online while at least one remains.
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    entries: RwLock<HashMap<UserId, HashSet<ConnectionId>>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when this is the user's first live connection.
    pub fn set_online(&self, user_id: UserId, conn: ConnectionId) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(|p| p.into_inner());
        let conns = entries.entry(user_id).or_default();
        let was_offline = conns.is_empty();
        conns.insert(conn);
        was_offline
    }

    /// Drop `conn` from the user's entry. Only that exact connection is
    /// removed, so a late disconnect never erases a newer connection.
    /// Returns true when the user has no connection left.
    pub fn clear_if_current(&self, user_id: UserId, conn: ConnectionId) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(|p| p.into_inner());
        let Some(conns) = entries.get_mut(&user_id) else {
            return false;
        };
        if !conns.remove(&conn) {
            return false;
        }
        if conns.is_empty() {
            entries.remove(&user_id);
            return true;
        }
        false
    }

    pub fn get(&self, user_id: UserId) -> Vec<ConnectionId> {
        let entries = self.entries.read().unwrap_or_else(|p| p.into_inner());
        entries
            .get(&user_id)
            .map(|conns| conns.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_online(&self, user_id: UserId) -> bool {
        let entries = self.entries.read().unwrap_or_else(|p| p.into_inner());
        entries.get(&user_id).is_some_and(|conns| !conns.is_empty())
    }

    pub fn online_count(&self) -> usize {
        self.entries.read().unwrap_or_else(|p| p.into_inner()).len()
    }
}
