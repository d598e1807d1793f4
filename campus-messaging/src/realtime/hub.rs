use std::collections::HashMap;
use std::sync::RwLock;

use campus_shared::{AppError, ErrorCode, UserId};
use tokio::sync::mpsc;

use super::events::{ConnectionId, ServerEvent};
use super::presence::PresenceRegistry;
use super::session::SessionManager;
use crate::models::ConversationId;

pub type OutboundTx = mpsc::UnboundedSender<ServerEvent>;
pub type OutboundRx = mpsc::UnboundedReceiver<ServerEvent>;

/// Result of a disconnect.
#[derive(Debug, Clone, PartialEq)]
pub struct Departure {
    pub user_id: Option<UserId>,
    /// The user has no connection left.
    pub went_offline: bool,
}

/// Owns every piece of live connection state: outbound queues, the
/// presence registry and room membership. Built once at startup and shared
/// with every connection task and HTTP handler.
#[derive(Debug, Default)]
pub struct Hub {
    outbound: RwLock<HashMap<ConnectionId, OutboundTx>>,
    presence: PresenceRegistry,
    sessions: SessionManager,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn presence(&self) -> &PresenceRegistry {
        &self.presence
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Register an anonymous connection and return the queue its writer drains.
    pub fn connect(&self) -> (ConnectionId, OutboundRx) {
        let conn = ConnectionId::new();
        let (tx, rx) = mpsc::unbounded_channel();
        self.attach(conn, tx);
        (conn, rx)
    }

    pub fn attach(&self, conn: ConnectionId, tx: OutboundTx) {
        self.sessions.open(conn);
        let mut outbound = self.outbound.write().unwrap_or_else(|p| p.into_inner());
        outbound.insert(conn, tx);
        metrics::gauge!("messaging_connections_active").set(outbound.len() as f64);
    }

    /// Bind a verified user to the connection and mark them present.
    /// Returns true when the user just came online.
    pub fn authenticate(&self, conn: ConnectionId, user_id: UserId) -> Result<bool, AppError> {
        if !self.is_connected(conn) {
            return Err(AppError::new(ErrorCode::BadRequest, "connection is closed"));
        }
        match self.sessions.user_of(conn) {
            Some(existing) if existing != user_id => {
                return Err(AppError::new(
                    ErrorCode::Forbidden,
                    "connection is already authenticated as another user",
                ));
            }
            Some(_) => return Ok(false),
            None => {}
        }
        self.sessions.bind_user(conn, user_id);
        Ok(self.presence.set_online(user_id, conn))
    }

    pub fn user_of(&self, conn: ConnectionId) -> Option<UserId> {
        self.sessions.user_of(conn)
    }

    pub fn join(&self, conn: ConnectionId, room: ConversationId) -> bool {
        self.sessions.join(conn, room)
    }

    pub fn leave(&self, conn: ConnectionId, room: ConversationId) -> bool {
        self.sessions.leave(conn, room)
    }

    pub fn close_room(&self, room: ConversationId) {
        self.sessions.close_room(room);
    }

    /// Tear down everything tied to the connection. `None` if it was unknown.
    pub fn disconnect(&self, conn: ConnectionId) -> Option<Departure> {
        let removed = {
            let mut outbound = self.outbound.write().unwrap_or_else(|p| p.into_inner());
            let removed = outbound.remove(&conn);
            metrics::gauge!("messaging_connections_active").set(outbound.len() as f64);
            removed
        };
        let session = self.sessions.close(conn);
        if removed.is_none() && session.is_none() {
            return None;
        }

        let user_id = session.and_then(|s| s.user_id);
        let went_offline = user_id.is_some_and(|uid| self.presence.clear_if_current(uid, conn));
        Some(Departure { user_id, went_offline })
    }

    pub fn is_connected(&self, conn: ConnectionId) -> bool {
        self.outbound
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .contains_key(&conn)
    }

    // --- delivery primitives -------------------------------------------------

    /// Queue an event for one connection. Returns false if it is gone.
    pub fn send_to_connection(&self, conn: ConnectionId, event: ServerEvent) -> bool {
        let outbound = self.outbound.read().unwrap_or_else(|p| p.into_inner());
        match outbound.get(&conn) {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    fn send_to_many(&self, conns: &[ConnectionId], event: &ServerEvent) -> usize {
        let outbound = self.outbound.read().unwrap_or_else(|p| p.into_inner());
        conns
            .iter()
            .filter_map(|conn| outbound.get(conn))
            .filter(|tx| tx.send(event.clone()).is_ok())
            .count()
    }

    /// Every connection of `user_id`. Zero when the user is offline.
    pub fn send_to_user(&self, user_id: UserId, event: ServerEvent) -> usize {
        self.send_to_many(&self.presence.get(user_id), &event)
    }

    pub fn send_to_users(&self, user_ids: &[UserId], event: ServerEvent) -> usize {
        let conns: Vec<ConnectionId> = user_ids.iter().flat_map(|uid| self.presence.get(*uid)).collect();
        self.send_to_many(&conns, &event)
    }

    pub fn broadcast_room(&self, room: ConversationId, event: ServerEvent) -> usize {
        self.send_to_many(&self.sessions.members_of(room), &event)
    }

    pub fn broadcast_room_except(&self, room: ConversationId, except: ConnectionId, event: ServerEvent) -> usize {
        let members: Vec<ConnectionId> = self
            .sessions
            .members_of(room)
            .into_iter()
            .filter(|conn| *conn != except)
            .collect();
        self.send_to_many(&members, &event)
    }

    pub fn broadcast_all_except(&self, except: Option<ConnectionId>, event: ServerEvent) -> usize {
        let conns: Vec<ConnectionId> = self
            .sessions
            .connections()
            .into_iter()
            .filter(|conn| Some(*conn) != except)
            .collect();
        self.send_to_many(&conns, &event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::events::{TypingPayload, UserStatusPayload};

    fn typing(conversation_id: ConversationId, user_id: UserId) -> ServerEvent {
        ServerEvent::UserTyping(TypingPayload { conversation_id, user_id })
    }

    #[test]
    fn room_broadcast_reaches_members_only() {
        let hub = Hub::new();
        let (a, mut rx_a) = hub.connect();
        let (b, mut rx_b) = hub.connect();
        let (_c, mut rx_c) = hub.connect();
        hub.join(a, 1);
        hub.join(b, 1);

        assert_eq!(hub.broadcast_room_except(1, a, typing(1, 10)), 1);
        assert!(rx_a.try_recv().is_err());
        assert_eq!(rx_b.try_recv().unwrap(), typing(1, 10));
        assert!(rx_c.try_recv().is_err());

        assert_eq!(hub.broadcast_room(1, typing(1, 11)), 2);
        assert!(rx_a.try_recv().is_ok());
    }

    #[test]
    fn user_fanout_covers_every_connection() {
        let hub = Hub::new();
        let (a, mut rx_a) = hub.connect();
        let (b, mut rx_b) = hub.connect();
        assert!(hub.authenticate(a, 7).unwrap());
        assert!(!hub.authenticate(b, 7).unwrap());

        let status = ServerEvent::UserStatus(UserStatusPayload { user_id: 3, is_online: true });
        assert_eq!(hub.send_to_user(7, status), 2);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
        assert_eq!(hub.send_to_user(8, typing(1, 1)), 0);
    }

    #[test]
    fn rebinding_to_another_user_is_rejected() {
        let hub = Hub::new();
        let (a, _rx) = hub.connect();
        hub.authenticate(a, 1).unwrap();
        assert_eq!(hub.authenticate(a, 2).unwrap_err().code(), ErrorCode::Forbidden);
        assert!(!hub.authenticate(a, 1).unwrap());
    }

    #[test]
    fn disconnect_reports_offline_transition() {
        let hub = Hub::new();
        let (a, _rx_a) = hub.connect();
        let (b, _rx_b) = hub.connect();
        hub.authenticate(a, 1).unwrap();
        hub.authenticate(b, 1).unwrap();
        hub.join(a, 4);

        assert_eq!(hub.disconnect(a), Some(Departure { user_id: Some(1), went_offline: false }));
        assert!(hub.sessions().members_of(4).is_empty());
        assert_eq!(hub.disconnect(b), Some(Departure { user_id: Some(1), went_offline: true }));
        assert_eq!(hub.disconnect(b), None);
        assert!(!hub.presence().is_online(1));
    }

    #[test]
    fn anonymous_disconnect_has_no_user() {
        let hub = Hub::new();
        let (a, _rx) = hub.connect();
        assert_eq!(hub.disconnect(a), Some(Departure { user_id: None, went_offline: false }));
    }

    #[test]
    fn global_broadcast_skips_origin() {
        let hub = Hub::new();
        let (a, mut rx_a) = hub.connect();
        let (_b, mut rx_b) = hub.connect();
        let status = ServerEvent::UserStatus(UserStatusPayload { user_id: 1, is_online: true });
        assert_eq!(hub.broadcast_all_except(Some(a), status), 1);
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_ok());
    }
}
