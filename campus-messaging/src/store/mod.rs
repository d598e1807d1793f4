//! Persistence for conversations and messages.
//!
//! The service talks to the relational store only through [`ConversationStore`].
//! `PgStore` is the production backend; `MemoryStore` keeps everything in
//! process and backs tests and `storage = "memory"` runs.

mod memory;
mod pg;

pub use memory::MemoryStore;
pub use pg::PgStore;

use async_trait::async_trait;
use campus_shared::UserId;

use crate::models::{Conversation, ConversationId, Message, NewMessage};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,

    #[error("conflicting record: {0}")]
    Conflict(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn find_conversation(&self, id: ConversationId) -> StoreResult<Option<Conversation>>;

    /// Looks the pair up in both orders.
    async fn find_conversation_between(&self, a: UserId, b: UserId) -> StoreResult<Option<Conversation>>;

    /// Fails with [`StoreError::Conflict`] when the unordered pair already has a conversation.
    async fn insert_conversation(&self, user1_id: UserId, user2_id: UserId) -> StoreResult<Conversation>;

    async fn conversations_for(&self, user_id: UserId) -> StoreResult<Vec<Conversation>>;

    async fn latest_message(&self, id: ConversationId) -> StoreResult<Option<Message>>;

    /// Unread messages in `id` authored by someone other than `reader`.
    async fn unread_count(&self, id: ConversationId, reader: UserId) -> StoreResult<i64>;

    async fn total_unread(&self, reader: UserId) -> StoreResult<i64>;

    /// Full history ordered by `(created_at, message_id)`.
    async fn messages(&self, id: ConversationId) -> StoreResult<Vec<Message>>;

    /// Inserts the message and bumps the conversation's `updated_at`.
    async fn insert_message(&self, message: NewMessage) -> StoreResult<Message>;

    /// Flips `is_read` on peer-authored unread messages; returns how many changed.
    async fn mark_read(&self, id: ConversationId, reader: UserId) -> StoreResult<usize>;

    /// Deletes the messages then the conversation, atomically. Returns the
    /// number of messages removed, or [`StoreError::NotFound`].
    async fn delete_conversation(&self, id: ConversationId) -> StoreResult<usize>;

    /// Everyone who shares a conversation with `user_id`.
    async fn peer_ids(&self, user_id: UserId) -> StoreResult<Vec<UserId>>;

    async fn ping(&self) -> StoreResult<()>;
}
