use campus_shared::UserId;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::Serialize;

use crate::schema::{conversations, messages};

pub type ConversationId = i64;
pub type MessageId = i64;

// --- Conversation ---

/// A durable pairing of two users. The order of `user1_id`/`user2_id` reflects
/// who created the conversation and carries no meaning.
#[derive(Debug, Queryable, Selectable, Identifiable, Serialize, Clone, PartialEq)]
#[diesel(table_name = conversations, primary_key(conversation_id))]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub conversation_id: ConversationId,
    pub user1_id: UserId,
    pub user2_id: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn has_participant(&self, user_id: UserId) -> bool {
        self.user1_id == user_id || self.user2_id == user_id
    }

    /// The participant that is not `user_id`. Callers check membership first.
    pub fn other_participant(&self, user_id: UserId) -> UserId {
        if self.user1_id == user_id {
            self.user2_id
        } else {
            self.user1_id
        }
    }

    /// True when this conversation pairs `a` and `b`, in either order.
    pub fn pairs(&self, a: UserId, b: UserId) -> bool {
        (self.user1_id == a && self.user2_id == b) || (self.user1_id == b && self.user2_id == a)
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = conversations)]
pub struct NewConversation {
    pub user1_id: UserId,
    pub user2_id: UserId,
}

// --- Message ---

#[derive(Debug, Queryable, Selectable, Identifiable, Serialize, Clone, PartialEq)]
#[diesel(table_name = messages, primary_key(message_id))]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub message_id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: String,
    /// `data:` URL of an attached image.
    pub image: Option<String>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Short text for conversation lists.
    pub fn preview(&self) -> String {
        if self.content.is_empty() && self.image.is_some() {
            "[image]".to_string()
        } else {
            self.content.chars().take(100).collect()
        }
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = messages)]
pub struct NewMessage {
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: String,
    pub image: Option<String>,
}
