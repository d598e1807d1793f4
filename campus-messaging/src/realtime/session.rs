use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use campus_shared::UserId;

use super::events::ConnectionId;
use crate::models::ConversationId;

/// Per-connection identity and joined rooms.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    pub user_id: Option<UserId>,
    pub rooms: HashSet<ConversationId>,
}

#[derive(Debug, Default)]
struct SessionState {
    sessions: HashMap<ConnectionId, Session>,
    rooms: HashMap<ConversationId, HashSet<ConnectionId>>,
}

/// Room membership bookkeeping. Purely in memory: after a restart clients
/// reconnect and rejoin.
#[derive(Debug, Default)]
pub struct SessionManager {
    state: RwLock<SessionState>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, SessionState> {
        self.state.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, SessionState> {
        self.state.write().unwrap_or_else(|p| p.into_inner())
    }

    pub fn open(&self, conn: ConnectionId) {
        self.write().sessions.entry(conn).or_default();
    }

    /// Bind `user_id` to an open connection. Returns the previous binding.
    pub fn bind_user(&self, conn: ConnectionId, user_id: UserId) -> Option<UserId> {
        let mut state = self.write();
        let session = state.sessions.entry(conn).or_default();
        session.user_id.replace(user_id)
    }

    pub fn user_of(&self, conn: ConnectionId) -> Option<UserId> {
        self.read().sessions.get(&conn).and_then(|s| s.user_id)
    }

    /// Returns false when the connection was already in the room or is unknown.
    pub fn join(&self, conn: ConnectionId, room: ConversationId) -> bool {
        let mut state = self.write();
        let Some(session) = state.sessions.get_mut(&conn) else {
            return false;
        };
        if !session.rooms.insert(room) {
            return false;
        }
        state.rooms.entry(room).or_default().insert(conn);
        true
    }

    pub fn leave(&self, conn: ConnectionId, room: ConversationId) -> bool {
        let mut state = self.write();
        let left = state
            .sessions
            .get_mut(&conn)
            .is_some_and(|session| session.rooms.remove(&room));
        if left {
            remove_member(&mut state.rooms, room, conn);
        }
        left
    }

    pub fn is_member(&self, conn: ConnectionId, room: ConversationId) -> bool {
        self.read()
            .rooms
            .get(&room)
            .is_some_and(|members| members.contains(&conn))
    }

    pub fn members_of(&self, room: ConversationId) -> Vec<ConnectionId> {
        self.read()
            .rooms
            .get(&room)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Empty a room, e.g. after its conversation is deleted.
    pub fn close_room(&self, room: ConversationId) -> Vec<ConnectionId> {
        let mut state = self.write();
        let members: Vec<ConnectionId> = state
            .rooms
            .remove(&room)
            .map(|m| m.into_iter().collect())
            .unwrap_or_default();
        for conn in &members {
            if let Some(session) = state.sessions.get_mut(conn) {
                session.rooms.remove(&room);
            }
        }
        members
    }

    /// Forget the connection and all its room memberships.
    pub fn close(&self, conn: ConnectionId) -> Option<Session> {
        let mut state = self.write();
        let session = state.sessions.remove(&conn)?;
        for room in &session.rooms {
            remove_member(&mut state.rooms, *room, conn);
        }
        Some(session)
    }

    pub fn connection_count(&self) -> usize {
        self.read().sessions.len()
    }

    pub fn connections(&self) -> Vec<ConnectionId> {
        self.read().sessions.keys().copied().collect()
    }
}

fn remove_member(
    rooms: &mut HashMap<ConversationId, HashSet<ConnectionId>>,
    room: ConversationId,
    conn: ConnectionId,
) {
    if let Some(members) = rooms.get_mut(&room) {
        members.remove(&conn);
        if members.is_empty() {
            rooms.remove(&room);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_is_idempotent() {
        let sessions = SessionManager::new();
        let conn = ConnectionId::new();
        sessions.open(conn);

        assert!(sessions.join(conn, 10));
        assert!(!sessions.join(conn, 10));
        assert_eq!(sessions.members_of(10), vec![conn]);
    }

    #[test]
    fn unknown_connection_cannot_join() {
        let sessions = SessionManager::new();
        assert!(!sessions.join(ConnectionId::new(), 10));
        assert!(sessions.members_of(10).is_empty());
    }

    #[test]
    fn close_leaves_every_room() {
        let sessions = SessionManager::new();
        let (a, b) = (ConnectionId::new(), ConnectionId::new());
        sessions.open(a);
        sessions.open(b);
        sessions.bind_user(a, 1);
        sessions.join(a, 10);
        sessions.join(a, 11);
        sessions.join(b, 10);

        let closed = sessions.close(a).unwrap();
        assert_eq!(closed.user_id, Some(1));
        assert_eq!(closed.rooms.len(), 2);
        assert_eq!(sessions.members_of(10), vec![b]);
        assert!(sessions.members_of(11).is_empty());
        assert_eq!(sessions.connection_count(), 1);
    }

    #[test]
    fn leave_and_close_room() {
        let sessions = SessionManager::new();
        let (a, b) = (ConnectionId::new(), ConnectionId::new());
        sessions.open(a);
        sessions.open(b);
        sessions.join(a, 5);
        sessions.join(b, 5);

        assert!(sessions.leave(a, 5));
        assert!(!sessions.leave(a, 5));
        assert!(!sessions.is_member(a, 5));

        assert_eq!(sessions.close_room(5), vec![b]);
        assert!(!sessions.is_member(b, 5));
    }

    #[test]
    fn bind_user_reports_previous() {
        let sessions = SessionManager::new();
        let conn = ConnectionId::new();
        sessions.open(conn);
        assert_eq!(sessions.bind_user(conn, 1), None);
        assert_eq!(sessions.bind_user(conn, 1), Some(1));
        assert_eq!(sessions.user_of(conn), Some(1));
    }
}
