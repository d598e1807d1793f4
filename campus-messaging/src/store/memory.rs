use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use campus_shared::UserId;
use chrono::Utc;

use super::{ConversationStore, StoreError, StoreResult};
use crate::models::{Conversation, ConversationId, Message, MessageId, NewMessage};

#[derive(Default)]
struct MemoryState {
    next_conversation_id: ConversationId,
    next_message_id: MessageId,
    conversations: BTreeMap<ConversationId, Conversation>,
    messages: BTreeMap<MessageId, Message>,
}

/// In-process store with the same constraints as the Postgres schema:
/// one conversation per unordered pair, messages removed with their
/// conversation, monotonic ids.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
    unavailable: AtomicBool,
    latency: Option<Duration>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call, to exercise timeouts.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    /// Make every call fail as if the database connection dropped.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of stored messages belonging to `id`, bypassing all checks.
    pub fn message_count(&self, id: ConversationId) -> usize {
        self.read().messages.values().filter(|m| m.conversation_id == id).count()
    }

    pub fn conversation_count(&self) -> usize {
        self.read().conversations.len()
    }

    async fn enter(&self) -> StoreResult<()> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store switched off".into()));
        }
        Ok(())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, MemoryState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, MemoryState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn find_conversation(&self, id: ConversationId) -> StoreResult<Option<Conversation>> {
        self.enter().await?;
        Ok(self.read().conversations.get(&id).cloned())
    }

    async fn find_conversation_between(&self, a: UserId, b: UserId) -> StoreResult<Option<Conversation>> {
        self.enter().await?;
        Ok(self.read().conversations.values().find(|c| c.pairs(a, b)).cloned())
    }

    async fn insert_conversation(&self, user1_id: UserId, user2_id: UserId) -> StoreResult<Conversation> {
        self.enter().await?;
        let mut state = self.write();
        if state.conversations.values().any(|c| c.pairs(user1_id, user2_id)) {
            return Err(StoreError::Conflict(format!(
                "conversation between {user1_id} and {user2_id} already exists"
            )));
        }

        state.next_conversation_id += 1;
        let now = Utc::now();
        let conversation = Conversation {
            conversation_id: state.next_conversation_id,
            user1_id,
            user2_id,
            created_at: now,
            updated_at: now,
        };
        state.conversations.insert(conversation.conversation_id, conversation.clone());
        Ok(conversation)
    }

    async fn conversations_for(&self, user_id: UserId) -> StoreResult<Vec<Conversation>> {
        self.enter().await?;
        let mut convs: Vec<Conversation> = self
            .read()
            .conversations
            .values()
            .filter(|c| c.has_participant(user_id))
            .cloned()
            .collect();
        convs.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(convs)
    }

    async fn latest_message(&self, id: ConversationId) -> StoreResult<Option<Message>> {
        self.enter().await?;
        Ok(self
            .read()
            .messages
            .values()
            .filter(|m| m.conversation_id == id)
            .max_by_key(|m| (m.created_at, m.message_id))
            .cloned())
    }

    async fn unread_count(&self, id: ConversationId, reader: UserId) -> StoreResult<i64> {
        self.enter().await?;
        let count = self
            .read()
            .messages
            .values()
            .filter(|m| m.conversation_id == id && m.sender_id != reader && !m.is_read)
            .count();
        Ok(count as i64)
    }

    async fn total_unread(&self, reader: UserId) -> StoreResult<i64> {
        self.enter().await?;
        let state = self.read();
        let count = state
            .messages
            .values()
            .filter(|m| m.sender_id != reader && !m.is_read)
            .filter(|m| {
                state
                    .conversations
                    .get(&m.conversation_id)
                    .is_some_and(|c| c.has_participant(reader))
            })
            .count();
        Ok(count as i64)
    }

    async fn messages(&self, id: ConversationId) -> StoreResult<Vec<Message>> {
        self.enter().await?;
        let mut history: Vec<Message> = self
            .read()
            .messages
            .values()
            .filter(|m| m.conversation_id == id)
            .cloned()
            .collect();
        history.sort_by_key(|m| (m.created_at, m.message_id));
        Ok(history)
    }

    async fn insert_message(&self, message: NewMessage) -> StoreResult<Message> {
        self.enter().await?;
        let mut state = self.write();
        let now = Utc::now();
        let conversation = state
            .conversations
            .get_mut(&message.conversation_id)
            .ok_or_else(|| StoreError::Backend("foreign key violation: conversation_id".into()))?;
        conversation.updated_at = now;

        state.next_message_id += 1;
        let stored = Message {
            message_id: state.next_message_id,
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            content: message.content,
            image: message.image,
            is_read: false,
            created_at: now,
        };
        state.messages.insert(stored.message_id, stored.clone());
        Ok(stored)
    }

    async fn mark_read(&self, id: ConversationId, reader: UserId) -> StoreResult<usize> {
        self.enter().await?;
        let mut updated = 0;
        for message in self.write().messages.values_mut() {
            if message.conversation_id == id && message.sender_id != reader && !message.is_read {
                message.is_read = true;
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn delete_conversation(&self, id: ConversationId) -> StoreResult<usize> {
        self.enter().await?;
        let mut state = self.write();
        if state.conversations.remove(&id).is_none() {
            return Err(StoreError::NotFound);
        }
        let before = state.messages.len();
        state.messages.retain(|_, m| m.conversation_id != id);
        Ok(before - state.messages.len())
    }

    async fn peer_ids(&self, user_id: UserId) -> StoreResult<Vec<UserId>> {
        let mut peers: Vec<UserId> = self
            .conversations_for(user_id)
            .await?
            .iter()
            .map(|c| c.other_participant(user_id))
            .collect();
        peers.sort_unstable();
        peers.dedup();
        Ok(peers)
    }

    async fn ping(&self) -> StoreResult<()> {
        self.enter().await
    }
}
