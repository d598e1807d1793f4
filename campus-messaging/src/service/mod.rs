//! Messaging operations shared by the socket gateway and the REST routes.
//!
//! Both transports call the same functions here, so validation, the
//! membership gate, persistence and fan-out behave identically whichever
//! way a client reaches the service.

mod draft;

pub use draft::{ImageAttachment, MessageDraft};

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use campus_shared::{AppError, AppResult, ErrorCode, UserId};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::{AppConfig, PresenceScope};
use crate::models::{Conversation, ConversationId, Message, NewMessage};
use crate::profiles::{PeerProfile, ProfileClient};
use crate::realtime::events::{
    AuthenticatedPayload, MessageNotificationPayload, MessagesReadPayload, NewMessagePayload,
    TypingPayload, UserStatusPayload,
};
use crate::realtime::{ConnectionId, Hub, OutboundMessage, ServerEvent};
use crate::store::{ConversationStore, StoreError};

/// Which transport a send came through; used for metrics only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Socket,
    Http,
}

impl Transport {
    fn as_str(&self) -> &'static str {
        match self {
            Transport::Socket => "socket",
            Transport::Http => "http",
        }
    }
}

// --- Response DTOs ---

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PeerSummary {
    pub user_id: UserId,
    pub display_name: Option<String>,
    pub photo: Option<String>,
    pub is_online: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationPreview {
    pub conversation_id: ConversationId,
    pub peer: PeerSummary,
    pub last_message: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub last_message_from_me: bool,
    pub unread_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationDetail {
    pub conversation: Conversation,
    pub peer: PeerSummary,
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedConversation {
    pub conversation: Conversation,
    pub created: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    pub conversation_id: ConversationId,
    pub updated: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeletedConversation {
    pub conversation_id: ConversationId,
    pub messages_deleted: usize,
}

pub struct Messaging {
    store: Arc<dyn ConversationStore>,
    hub: Arc<Hub>,
    profiles: ProfileClient,
    store_timeout: Duration,
    max_image_bytes: usize,
    presence_scope: PresenceScope,
}

impl Messaging {
    pub fn new(store: Arc<dyn ConversationStore>, hub: Arc<Hub>, profiles: ProfileClient, config: &AppConfig) -> Self {
        Self {
            store,
            hub,
            profiles,
            store_timeout: config.store_timeout(),
            max_image_bytes: config.max_image_bytes,
            presence_scope: config.presence_scope,
        }
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    pub fn max_image_bytes(&self) -> usize {
        self.max_image_bytes
    }

    /// Await a store call under the configured timeout. The inner result is
    /// left for the caller when it needs to react to specific store errors.
    async fn timed<T>(&self, op: &'static str, fut: impl Future<Output = Result<T, StoreError>>) -> AppResult<Result<T, StoreError>> {
        tokio::time::timeout(self.store_timeout, fut).await.map_err(|_| {
            tracing::warn!(op, timeout_ms = self.store_timeout.as_millis() as u64, "store call timed out");
            AppError::new(ErrorCode::ServiceUnavailable, "storage did not respond in time, please retry")
        })
    }

    fn store_failure(op: &'static str, err: StoreError) -> AppError {
        tracing::error!(op, error = %err, "store call failed");
        match err {
            StoreError::NotFound => AppError::new(ErrorCode::NotFound, "resource not found"),
            StoreError::Unavailable(_) => AppError::with_cause(
                ErrorCode::ServiceUnavailable,
                "storage is temporarily unavailable, please retry",
                &err,
            ),
            StoreError::Conflict(_) | StoreError::Backend(_) => {
                AppError::with_cause(ErrorCode::InternalError, "database error", &err)
            }
        }
    }

    /// Run a store call under the configured timeout and translate failures
    /// into client-facing errors.
    async fn store_call<T>(&self, op: &'static str, fut: impl Future<Output = Result<T, StoreError>>) -> AppResult<T> {
        self.timed(op, fut).await?.map_err(|e| Self::store_failure(op, e))
    }

    /// Load a conversation `user_id` participates in. Foreign and missing
    /// conversations look the same to the caller.
    async fn participant_conversation(&self, user_id: UserId, conversation_id: ConversationId) -> AppResult<Conversation> {
        self.store_call("find_conversation", self.store.find_conversation(conversation_id))
            .await?
            .filter(|c| c.has_participant(user_id))
            .ok_or_else(|| AppError::new(ErrorCode::ConversationNotFound, "conversation not found"))
    }

    // --- connection lifecycle ------------------------------------------------

    pub async fn authenticate(&self, conn: ConnectionId, user_id: UserId) -> AppResult<()> {
        let came_online = self.hub.authenticate(conn, user_id)?;
        tracing::info!(conn = %conn, user_id, came_online, "socket authenticated");

        self.hub.send_to_connection(conn, ServerEvent::Authenticated(AuthenticatedPayload { user_id }));
        if came_online {
            self.announce_status(user_id, true, Some(conn)).await;
        }
        Ok(())
    }

    pub async fn disconnect(&self, conn: ConnectionId) {
        let Some(departure) = self.hub.disconnect(conn) else {
            return;
        };
        tracing::info!(conn = %conn, user_id = ?departure.user_id, went_offline = departure.went_offline, "socket disconnected");

        if let (Some(user_id), true) = (departure.user_id, departure.went_offline) {
            self.announce_status(user_id, false, None).await;
        }
    }

    /// Presence changes are best effort: a failed peer lookup is logged, never surfaced.
    async fn announce_status(&self, user_id: UserId, is_online: bool, except: Option<ConnectionId>) {
        let event = ServerEvent::UserStatus(UserStatusPayload { user_id, is_online });
        let delivered = match self.presence_scope {
            PresenceScope::Global => self.hub.broadcast_all_except(except, event),
            PresenceScope::Peers => match self.store_call("peer_ids", self.store.peer_ids(user_id)).await {
                Ok(peers) => self.hub.send_to_users(&peers, event),
                Err(_) => 0,
            },
        };
        tracing::debug!(user_id, is_online, delivered, "presence announced");
    }

    // --- rooms ----------------------------------------------------------------

    /// Rooms carry message content, so only participants may join. This is
    /// stricter than a plain room join: a non-participant gets
    /// `ConversationNotFound` and stays out of the room.
    pub async fn join_conversation(&self, conn: ConnectionId, user_id: UserId, conversation_id: ConversationId) -> AppResult<bool> {
        self.participant_conversation(user_id, conversation_id).await?;
        let joined = self.hub.join(conn, conversation_id);
        tracing::debug!(conn = %conn, user_id, conversation_id, joined, "join conversation");
        Ok(joined)
    }

    pub fn leave_conversation(&self, conn: ConnectionId, conversation_id: ConversationId) -> bool {
        self.hub.leave(conn, conversation_id)
    }

    /// Fire-and-forget typing notice to the rest of the room. Connections
    /// that never joined the room are ignored.
    pub fn typing(&self, conn: ConnectionId, user_id: UserId, conversation_id: ConversationId, active: bool) -> usize {
        if !self.hub.sessions().is_member(conn, conversation_id) {
            tracing::debug!(conn = %conn, conversation_id, "typing outside a joined room ignored");
            return 0;
        }
        let payload = TypingPayload { conversation_id, user_id };
        let event = if active {
            ServerEvent::UserTyping(payload)
        } else {
            ServerEvent::UserStopTyping(payload)
        };
        self.hub.broadcast_room_except(conversation_id, conn, event)
    }

    // --- send -----------------------------------------------------------------

    /// Persist a message and fan it out.
    ///
    /// Nothing is delivered unless the insert succeeds. Afterwards the room
    /// gets `new_message`, every connection of the other participant gets
    /// `message_notification`, and the originating connection (if any) gets
    /// `message_sent`.
    pub async fn send_message(
        &self,
        sender_id: UserId,
        origin: Option<ConnectionId>,
        draft: MessageDraft,
        transport: Transport,
    ) -> AppResult<OutboundMessage> {
        let conversation = self.participant_conversation(sender_id, draft.conversation_id).await?;

        let new_message = NewMessage {
            conversation_id: conversation.conversation_id,
            sender_id,
            content: draft.content,
            image: draft.image.as_ref().map(ImageAttachment::to_data_url),
        };
        // No timeout here: an insert that already committed must still be
        // delivered. Pool checkout is bounded by the connection timeout.
        let stored = self
            .store
            .insert_message(new_message)
            .await
            .map_err(|e| Self::store_failure("insert_message", e))?;

        let other_user = conversation.other_participant(sender_id);
        let message = OutboundMessage::new(stored);

        let room_deliveries = self.hub.broadcast_room(
            conversation.conversation_id,
            ServerEvent::NewMessage(NewMessagePayload { message: message.clone() }),
        );
        let notified = self.hub.send_to_user(
            other_user,
            ServerEvent::MessageNotification(MessageNotificationPayload {
                conversation_id: conversation.conversation_id,
                message: message.clone(),
            }),
        );
        if let Some(conn) = origin {
            self.hub.send_to_connection(conn, ServerEvent::MessageSent(NewMessagePayload { message: message.clone() }));
        }

        metrics::counter!("messaging_messages_sent_total", "transport" => transport.as_str()).increment(1);
        tracing::info!(
            message_id = message.message_id,
            conversation_id = message.conversation_id,
            sender_id,
            recipient_id = other_user,
            room_deliveries,
            notified,
            transport = transport.as_str(),
            "message sent"
        );

        Ok(message)
    }

    // --- read receipts --------------------------------------------------------

    pub async fn mark_as_read(&self, reader_id: UserId, conversation_id: ConversationId) -> AppResult<ReadReceipt> {
        let conversation = self.participant_conversation(reader_id, conversation_id).await?;
        let updated = self
            .store_call("mark_read", self.store.mark_read(conversation_id, reader_id))
            .await?;

        self.hub.send_to_user(
            conversation.other_participant(reader_id),
            ServerEvent::MessagesRead(MessagesReadPayload { conversation_id, reader_id }),
        );
        tracing::debug!(conversation_id, reader_id, updated, "messages marked read");

        Ok(ReadReceipt { conversation_id, updated })
    }

    // --- conversations --------------------------------------------------------

    async fn peer_summaries(&self, peer_ids: &[UserId]) -> HashMap<UserId, PeerSummary> {
        let mut profiles = self.profiles.fetch(peer_ids).await;
        peer_ids
            .iter()
            .map(|id| {
                let profile = profiles.remove(id).unwrap_or_else(|| PeerProfile {
                    user_id: *id,
                    ..PeerProfile::default()
                });
                let summary = PeerSummary {
                    user_id: *id,
                    display_name: profile.display_name,
                    photo: profile.photo,
                    is_online: self.hub.presence().is_online(*id),
                };
                (*id, summary)
            })
            .collect()
    }

    /// Conversations of `user_id`, most recent activity first.
    pub async fn list_conversations(&self, user_id: UserId) -> AppResult<Vec<ConversationPreview>> {
        let conversations = self
            .store_call("conversations_for", self.store.conversations_for(user_id))
            .await?;

        let peer_ids: Vec<UserId> = conversations.iter().map(|c| c.other_participant(user_id)).collect();
        let mut peers = self.peer_summaries(&peer_ids).await;

        let mut previews = Vec::with_capacity(conversations.len());
        for conv in conversations {
            let latest = self
                .store_call("latest_message", self.store.latest_message(conv.conversation_id))
                .await?;
            let unread_count = self
                .store_call("unread_count", self.store.unread_count(conv.conversation_id, user_id))
                .await?;

            let peer_id = conv.other_participant(user_id);
            let peer = peers.remove(&peer_id).unwrap_or(PeerSummary {
                user_id: peer_id,
                display_name: None,
                photo: None,
                is_online: self.hub.presence().is_online(peer_id),
            });

            previews.push(ConversationPreview {
                conversation_id: conv.conversation_id,
                peer,
                last_message: latest.as_ref().map(Message::preview),
                last_message_at: latest.as_ref().map(|m| m.created_at),
                last_message_from_me: latest.as_ref().is_some_and(|m| m.sender_id == user_id),
                unread_count,
                created_at: conv.created_at,
                updated_at: conv.updated_at,
            });
        }

        previews.sort_by(|a, b| {
            let a_time = a.last_message_at.unwrap_or(a.created_at);
            let b_time = b.last_message_at.unwrap_or(b.created_at);
            b_time.cmp(&a_time)
        });
        Ok(previews)
    }

    /// Full history of one conversation plus who the peer is.
    pub async fn conversation_detail(&self, user_id: UserId, conversation_id: ConversationId) -> AppResult<ConversationDetail> {
        let conversation = self.participant_conversation(user_id, conversation_id).await?;
        let messages = self
            .store_call("messages", self.store.messages(conversation_id))
            .await?;

        let peer_id = conversation.other_participant(user_id);
        let peer = self
            .peer_summaries(&[peer_id])
            .await
            .remove(&peer_id)
            .unwrap_or(PeerSummary {
                user_id: peer_id,
                display_name: None,
                photo: None,
                is_online: false,
            });

        Ok(ConversationDetail { conversation, peer, messages })
    }

    /// Find or create the conversation between the caller and `target_id`.
    pub async fn create_conversation(&self, user_id: UserId, target_id: UserId) -> AppResult<CreatedConversation> {
        if target_id <= 0 {
            return Err(AppError::new(ErrorCode::ValidationError, "invalid target user id"));
        }
        if target_id == user_id {
            return Err(AppError::new(ErrorCode::CannotMessageSelf, "cannot start a conversation with yourself"));
        }

        if let Some(existing) = self
            .store_call("find_conversation_between", self.store.find_conversation_between(user_id, target_id))
            .await?
        {
            return Ok(CreatedConversation { conversation: existing, created: false });
        }

        match self
            .timed("insert_conversation", self.store.insert_conversation(user_id, target_id))
            .await?
        {
            Ok(conversation) => {
                tracing::info!(conversation_id = conversation.conversation_id, user_id, target_id, "conversation created");
                Ok(CreatedConversation { conversation, created: true })
            }
            // Lost a race with a concurrent create for the same pair.
            Err(StoreError::Conflict(_)) => {
                let conversation = self
                    .store_call("find_conversation_between", self.store.find_conversation_between(user_id, target_id))
                    .await?
                    .ok_or_else(|| AppError::internal("conversation vanished after conflicting insert"))?;
                Ok(CreatedConversation { conversation, created: false })
            }
            Err(err) => Err(Self::store_failure("insert_conversation", err)),
        }
    }

    /// Delete a conversation and its messages in one store transaction.
    pub async fn delete_conversation(&self, user_id: UserId, conversation_id: ConversationId) -> AppResult<DeletedConversation> {
        self.participant_conversation(user_id, conversation_id).await?;

        let messages_deleted = match self
            .timed("delete_conversation", self.store.delete_conversation(conversation_id))
            .await?
        {
            Ok(count) => count,
            // Deleted concurrently by the other participant.
            Err(StoreError::NotFound) => {
                return Err(AppError::new(ErrorCode::ConversationNotFound, "conversation not found"))
            }
            Err(err) => return Err(Self::store_failure("delete_conversation", err)),
        };

        self.hub.close_room(conversation_id);
        tracing::info!(conversation_id, user_id, messages_deleted, "conversation deleted");
        Ok(DeletedConversation { conversation_id, messages_deleted })
    }

    pub async fn unread_count(&self, user_id: UserId) -> AppResult<i64> {
        self.store_call("total_unread", self.store.total_unread(user_id)).await
    }

    pub async fn store_healthy(&self) -> Result<(), String> {
        self.store_call("ping", self.store.ping())
            .await
            .map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::OutboundRx;
    use crate::store::{MemoryStore, StoreResult};
    use async_trait::async_trait;

    struct Fixture {
        store: Arc<MemoryStore>,
        hub: Arc<Hub>,
        messaging: Messaging,
    }

    fn fixture_with(store: MemoryStore, config: AppConfig) -> Fixture {
        let store = Arc::new(store);
        let hub = Arc::new(Hub::new());
        let messaging = Messaging::new(store.clone(), hub.clone(), ProfileClient::disabled(), &config);
        Fixture { store, hub, messaging }
    }

    fn fixture() -> Fixture {
        fixture_with(MemoryStore::new(), AppConfig::default())
    }

    fn drain(rx: &mut OutboundRx) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            events.push(ev);
        }
        events
    }

    fn names(events: &[ServerEvent]) -> Vec<&'static str> {
        events.iter().map(ServerEvent::name).collect()
    }

    async fn online(f: &Fixture, user_id: UserId) -> (ConnectionId, OutboundRx) {
        let (conn, mut rx) = f.hub.connect();
        f.messaging.authenticate(conn, user_id).await.unwrap();
        drain(&mut rx);
        (conn, rx)
    }

    async fn conversation(f: &Fixture, a: UserId, b: UserId) -> ConversationId {
        f.messaging.create_conversation(a, b).await.unwrap().conversation.conversation_id
    }

    fn text(conversation_id: ConversationId, content: &str) -> MessageDraft {
        MessageDraft::new(conversation_id, content, None).unwrap()
    }

    #[tokio::test]
    async fn send_fans_out_to_room_recipient_and_origin() {
        let f = fixture();
        let conv = conversation(&f, 1, 2).await;
        let (a, mut rx_a) = online(&f, 1).await;
        let (b, mut rx_b) = online(&f, 2).await;
        let (_b2, mut rx_b2) = online(&f, 2).await;
        f.messaging.join_conversation(a, 1, conv).await.unwrap();
        f.messaging.join_conversation(b, 2, conv).await.unwrap();
        drain(&mut rx_a);

        let sent = f
            .messaging
            .send_message(1, Some(a), text(conv, "  hello  "), Transport::Socket)
            .await
            .unwrap();
        assert_eq!(sent.content, "hello");

        assert_eq!(names(&drain(&mut rx_a)), ["new_message", "message_sent"]);
        assert_eq!(names(&drain(&mut rx_b)), ["new_message", "message_notification"]);
        assert_eq!(names(&drain(&mut rx_b2)), ["message_notification"]);
        assert_eq!(f.store.message_count(conv), 1);
    }

    #[tokio::test]
    async fn http_send_reaches_socket_clients() {
        let f = fixture();
        let conv = conversation(&f, 1, 2).await;
        let (b, mut rx_b) = online(&f, 2).await;
        f.messaging.join_conversation(b, 2, conv).await.unwrap();

        f.messaging
            .send_message(1, None, text(conv, "from http"), Transport::Http)
            .await
            .unwrap();

        let events = drain(&mut rx_b);
        assert_eq!(names(&events), ["new_message", "message_notification"]);
        match &events[0] {
            ServerEvent::NewMessage(p) => assert_eq!(p.message.content, "from http"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_participant_cannot_send_or_join() {
        let f = fixture();
        let conv = conversation(&f, 1, 2).await;
        let (c, mut rx_c) = online(&f, 3).await;

        let err = f
            .messaging
            .send_message(3, Some(c), text(conv, "intrusion"), Transport::Socket)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ConversationNotFound);
        assert_eq!(f.store.message_count(conv), 0);

        let err = f.messaging.join_conversation(c, 3, conv).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ConversationNotFound);
        assert!(drain(&mut rx_c).is_empty());
    }

    #[tokio::test]
    async fn unavailable_store_sends_nothing() {
        let f = fixture();
        let conv = conversation(&f, 1, 2).await;
        let (a, mut rx_a) = online(&f, 1).await;
        let (b, mut rx_b) = online(&f, 2).await;
        f.messaging.join_conversation(a, 1, conv).await.unwrap();
        f.messaging.join_conversation(b, 2, conv).await.unwrap();
        drain(&mut rx_a);

        f.store.set_unavailable(true);
        let err = f
            .messaging
            .send_message(1, Some(a), text(conv, "lost"), Transport::Socket)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ServiceUnavailable);
        assert!(err.code().is_retryable());
        assert!(drain(&mut rx_a).is_empty());
        assert!(drain(&mut rx_b).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_store_times_out() {
        let config = AppConfig { store_timeout_ms: 50, ..AppConfig::default() };
        let f = fixture_with(MemoryStore::with_latency(Duration::from_secs(1)), config);

        let err = f.messaging.unread_count(1).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ServiceUnavailable);
    }

    /// Commits inserts right away but acknowledges them only after `ack_delay`.
    struct SlowAck {
        inner: Arc<MemoryStore>,
        ack_delay: Duration,
    }

    #[async_trait]
    impl ConversationStore for SlowAck {
        async fn find_conversation(&self, id: ConversationId) -> StoreResult<Option<Conversation>> {
            self.inner.find_conversation(id).await
        }
        async fn find_conversation_between(&self, a: UserId, b: UserId) -> StoreResult<Option<Conversation>> {
            self.inner.find_conversation_between(a, b).await
        }
        async fn insert_conversation(&self, user1_id: UserId, user2_id: UserId) -> StoreResult<Conversation> {
            self.inner.insert_conversation(user1_id, user2_id).await
        }
        async fn conversations_for(&self, user_id: UserId) -> StoreResult<Vec<Conversation>> {
            self.inner.conversations_for(user_id).await
        }
        async fn latest_message(&self, id: ConversationId) -> StoreResult<Option<Message>> {
            self.inner.latest_message(id).await
        }
        async fn unread_count(&self, id: ConversationId, reader: UserId) -> StoreResult<i64> {
            self.inner.unread_count(id, reader).await
        }
        async fn total_unread(&self, reader: UserId) -> StoreResult<i64> {
            self.inner.total_unread(reader).await
        }
        async fn messages(&self, id: ConversationId) -> StoreResult<Vec<Message>> {
            self.inner.messages(id).await
        }
        async fn insert_message(&self, message: NewMessage) -> StoreResult<Message> {
            let stored = self.inner.insert_message(message).await?;
            tokio::time::sleep(self.ack_delay).await;
            Ok(stored)
        }
        async fn mark_read(&self, id: ConversationId, reader: UserId) -> StoreResult<usize> {
            self.inner.mark_read(id, reader).await
        }
        async fn delete_conversation(&self, id: ConversationId) -> StoreResult<usize> {
            self.inner.delete_conversation(id).await
        }
        async fn peer_ids(&self, user_id: UserId) -> StoreResult<Vec<UserId>> {
            self.inner.peer_ids(user_id).await
        }
        async fn ping(&self) -> StoreResult<()> {
            self.inner.ping().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn committed_insert_is_delivered_despite_slow_ack() {
        let memory = Arc::new(MemoryStore::new());
        let store = Arc::new(SlowAck { inner: memory.clone(), ack_delay: Duration::from_secs(1) });
        let hub = Arc::new(Hub::new());
        let config = AppConfig { store_timeout_ms: 50, ..AppConfig::default() };
        let messaging = Messaging::new(store, hub.clone(), ProfileClient::disabled(), &config);

        let conv = messaging.create_conversation(1, 2).await.unwrap().conversation.conversation_id;
        let (b, mut rx_b) = hub.connect();
        messaging.authenticate(b, 2).await.unwrap();
        messaging.join_conversation(b, 2, conv).await.unwrap();
        drain(&mut rx_b);

        let sent = messaging
            .send_message(1, None, text(conv, "made it"), Transport::Http)
            .await
            .unwrap();
        assert_eq!(sent.content, "made it");
        assert_eq!(memory.message_count(conv), 1);
        assert_eq!(names(&drain(&mut rx_b)), ["new_message", "message_notification"]);
    }

    #[tokio::test]
    async fn read_state_never_reverts() {
        let f = fixture();
        let conv = conversation(&f, 1, 2).await;
        f.messaging.send_message(1, None, text(conv, "one"), Transport::Http).await.unwrap();
        f.messaging.send_message(1, None, text(conv, "two"), Transport::Http).await.unwrap();

        assert_eq!(f.messaging.mark_as_read(2, conv).await.unwrap().updated, 2);
        assert_eq!(f.messaging.mark_as_read(2, conv).await.unwrap().updated, 0);

        f.messaging.send_message(2, None, text(conv, "reply"), Transport::Http).await.unwrap();
        f.messaging.send_message(1, None, text(conv, "three"), Transport::Http).await.unwrap();
        f.messaging.mark_as_read(1, conv).await.unwrap();

        let detail = f.messaging.conversation_detail(2, conv).await.unwrap();
        let read: Vec<(&str, bool)> = detail.messages.iter().map(|m| (m.content.as_str(), m.is_read)).collect();
        assert_eq!(read, [("one", true), ("two", true), ("reply", true), ("three", false)]);
        assert_eq!(f.messaging.unread_count(2).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn mark_read_notifies_peer() {
        let f = fixture();
        let conv = conversation(&f, 1, 2).await;
        let (_a, mut rx_a) = online(&f, 1).await;
        let (_b, mut rx_b) = online(&f, 2).await;

        f.messaging.send_message(1, None, text(conv, "one"), Transport::Http).await.unwrap();
        f.messaging.send_message(1, None, text(conv, "two"), Transport::Http).await.unwrap();
        f.messaging.send_message(2, None, text(conv, "mine"), Transport::Http).await.unwrap();
        drain(&mut rx_a);
        drain(&mut rx_b);
        assert_eq!(f.messaging.unread_count(2).await.unwrap(), 2);

        let receipt = f.messaging.mark_as_read(2, conv).await.unwrap();
        assert_eq!(receipt.updated, 2);
        assert_eq!(f.messaging.unread_count(2).await.unwrap(), 0);

        let events = drain(&mut rx_a);
        assert_eq!(
            events,
            vec![ServerEvent::MessagesRead(MessagesReadPayload { conversation_id: conv, reader_id: 2 })]
        );
        assert!(drain(&mut rx_b).is_empty());
    }

    #[tokio::test]
    async fn typing_requires_joined_room() {
        let f = fixture();
        let conv = conversation(&f, 1, 2).await;
        let (a, mut rx_a) = online(&f, 1).await;
        let (b, mut rx_b) = online(&f, 2).await;
        drain(&mut rx_a);

        assert_eq!(f.messaging.typing(a, 1, conv, true), 0);

        f.messaging.join_conversation(a, 1, conv).await.unwrap();
        f.messaging.join_conversation(b, 2, conv).await.unwrap();
        assert_eq!(f.messaging.typing(a, 1, conv, true), 1);
        assert_eq!(f.messaging.typing(a, 1, conv, false), 1);

        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(names(&drain(&mut rx_b)), ["user_typing", "user_stop_typing"]);

        assert!(f.messaging.leave_conversation(b, conv));
        assert_eq!(f.messaging.typing(a, 1, conv, true), 0);
    }

    #[tokio::test]
    async fn presence_reaches_peers_once_per_transition() {
        let f = fixture();
        conversation(&f, 1, 2).await;
        let (_b, mut rx_b) = online(&f, 2).await;
        let (_c, mut rx_c) = online(&f, 3).await;

        let (a1, mut rx_a1) = f.hub.connect();
        f.messaging.authenticate(a1, 1).await.unwrap();
        assert_eq!(
            drain(&mut rx_a1),
            vec![ServerEvent::Authenticated(AuthenticatedPayload { user_id: 1 })]
        );
        assert_eq!(
            drain(&mut rx_b),
            vec![ServerEvent::UserStatus(UserStatusPayload { user_id: 1, is_online: true })]
        );
        assert!(drain(&mut rx_c).is_empty());

        let (a2, _rx_a2) = f.hub.connect();
        f.messaging.authenticate(a2, 1).await.unwrap();
        assert!(drain(&mut rx_b).is_empty());

        f.messaging.disconnect(a1).await;
        assert!(drain(&mut rx_b).is_empty());
        assert!(f.hub.presence().is_online(1));

        f.messaging.disconnect(a2).await;
        assert_eq!(
            drain(&mut rx_b),
            vec![ServerEvent::UserStatus(UserStatusPayload { user_id: 1, is_online: false })]
        );
        assert!(!f.hub.presence().is_online(1));
    }

    #[tokio::test]
    async fn global_presence_reaches_everyone_else() {
        let config = AppConfig { presence_scope: PresenceScope::Global, ..AppConfig::default() };
        let f = fixture_with(MemoryStore::new(), config);
        let (_anon, mut rx_anon) = f.hub.connect();

        let (a, mut rx_a) = f.hub.connect();
        f.messaging.authenticate(a, 1).await.unwrap();

        assert_eq!(names(&drain(&mut rx_anon)), ["user_status"]);
        assert_eq!(names(&drain(&mut rx_a)), ["authenticated"]);
    }

    #[tokio::test]
    async fn create_conversation_is_idempotent_per_pair() {
        let f = fixture();
        let first = f.messaging.create_conversation(1, 2).await.unwrap();
        assert!(first.created);

        let again = f.messaging.create_conversation(2, 1).await.unwrap();
        assert!(!again.created);
        assert_eq!(again.conversation.conversation_id, first.conversation.conversation_id);
        assert_eq!(f.store.conversation_count(), 1);

        let err = f.messaging.create_conversation(4, 4).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::CannotMessageSelf);
    }

    #[tokio::test]
    async fn list_is_sorted_by_latest_activity() {
        let f = fixture();
        let older = conversation(&f, 1, 2).await;
        let newer = conversation(&f, 1, 3).await;
        f.messaging.send_message(2, None, text(older, "bump"), Transport::Http).await.unwrap();
        let (_c, _rx) = online(&f, 2).await;

        let list = f.messaging.list_conversations(1).await.unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].conversation_id, older);
        assert_eq!(list[0].last_message.as_deref(), Some("bump"));
        assert!(!list[0].last_message_from_me);
        assert_eq!(list[0].unread_count, 1);
        assert!(list[0].peer.is_online);
        assert_eq!(list[1].conversation_id, newer);
        assert!(list[1].last_message.is_none());
        assert!(!list[1].peer.is_online);
    }

    #[tokio::test]
    async fn detail_returns_ordered_history() {
        let f = fixture();
        let conv = conversation(&f, 1, 2).await;
        for body in ["a", "b", "c"] {
            f.messaging.send_message(1, None, text(conv, body), Transport::Http).await.unwrap();
        }

        let detail = f.messaging.conversation_detail(2, conv).await.unwrap();
        let bodies: Vec<&str> = detail.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(bodies, ["a", "b", "c"]);
        assert_eq!(detail.peer.user_id, 1);

        let err = f.messaging.conversation_detail(3, conv).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ConversationNotFound);
    }

    #[tokio::test]
    async fn delete_removes_history_and_closes_room() {
        let f = fixture();
        let conv = conversation(&f, 1, 2).await;
        let (a, _rx_a) = online(&f, 1).await;
        f.messaging.join_conversation(a, 1, conv).await.unwrap();
        f.messaging.send_message(1, None, text(conv, "bye"), Transport::Http).await.unwrap();

        let deleted = f.messaging.delete_conversation(2, conv).await.unwrap();
        assert_eq!(deleted.messages_deleted, 1);
        assert_eq!(f.store.message_count(conv), 0);
        assert!(f.hub.sessions().members_of(conv).is_empty());

        let err = f.messaging.delete_conversation(1, conv).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ConversationNotFound);
    }

    #[tokio::test]
    async fn image_only_message_is_stored_as_data_url() {
        let f = fixture();
        let conv = conversation(&f, 1, 2).await;
        let image = ImageAttachment::from_upload("image/png", vec![1, 2, 3], 1024).unwrap();
        let draft = MessageDraft::new(conv, "", Some(image)).unwrap();

        let sent = f.messaging.send_message(1, None, draft, Transport::Http).await.unwrap();
        assert!(sent.image.as_deref().is_some_and(|i| i.starts_with("data:image/png;base64,")));

        let list = f.messaging.list_conversations(2).await.unwrap();
        assert_eq!(list[0].last_message.as_deref(), Some("[image]"));
    }
}
