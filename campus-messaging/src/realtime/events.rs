use campus_shared::errors::PublicError;
use campus_shared::{AppError, ErrorCode, UserId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::models::{ConversationId, Message, MessageId};

/// Identifies one live socket. Minted by the gateway, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

// ---------------------------------------------------------------------------
// Outbound message representation
// ---------------------------------------------------------------------------

/// A persisted message as pushed to clients. `unique_timestamp` lets a client
/// drop the second copy when the same message reaches it by two paths; it is
/// generated per send and never stored.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessage {
    pub message_id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: String,
    pub image: Option<String>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
    pub unique_timestamp: String,
}

impl OutboundMessage {
    pub fn new(message: Message) -> Self {
        Self {
            message_id: message.message_id,
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            content: message.content,
            image: message.image,
            is_read: message.is_read,
            created_at: message.created_at,
            unique_timestamp: dedup_token(),
        }
    }
}

fn dedup_token() -> String {
    format!("{}-{:08x}", Utc::now().timestamp_millis(), rand::random::<u32>())
}

// ---------------------------------------------------------------------------
// Client -> server
// ---------------------------------------------------------------------------

/// Inbound socket events after decoding.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Authenticate { token: String },
    JoinConversation { conversation_id: ConversationId },
    LeaveConversation { conversation_id: ConversationId },
    SendMessage {
        conversation_id: ConversationId,
        content: String,
        image: Option<String>,
    },
    MarkAsRead { conversation_id: ConversationId },
    Typing { conversation_id: ConversationId },
    StopTyping { conversation_id: ConversationId },
}

impl ClientEvent {
    /// Every event name the gateway listens for.
    pub const NAMES: [&'static str; 7] = [
        "authenticate",
        "join_conversation",
        "leave_conversation",
        "send_message",
        "mark_as_read",
        "typing",
        "stop_typing",
    ];

    /// Everything except `authenticate` needs a bound user.
    pub fn requires_identity(name: &str) -> bool {
        name != "authenticate"
    }

    /// Decode a named event. `Ok(None)` means the name is not one we handle.
    pub fn decode(name: &str, payload: &serde_json::Value) -> Result<Option<Self>, AppError> {
        let event = match name {
            "authenticate" => {
                let token = payload
                    .get("token")
                    .and_then(|v| v.as_str())
                    .filter(|t| !t.is_empty())
                    .ok_or_else(|| AppError::new(ErrorCode::ValidationError, "token is required"))?;
                Self::Authenticate { token: token.to_string() }
            }
            "join_conversation" => Self::JoinConversation { conversation_id: conversation_id(payload)? },
            "leave_conversation" => Self::LeaveConversation { conversation_id: conversation_id(payload)? },
            "send_message" => {
                let conversation_id = conversation_id(payload)?;
                let content = match payload.get("content") {
                    None | Some(serde_json::Value::Null) => String::new(),
                    Some(serde_json::Value::String(s)) => s.clone(),
                    Some(_) => {
                        return Err(AppError::new(ErrorCode::ValidationError, "content must be a string"))
                    }
                };
                let image = payload
                    .get("image")
                    .and_then(|v| v.as_str())
                    .filter(|s| !s.is_empty())
                    .map(str::to_string);
                Self::SendMessage { conversation_id, content, image }
            }
            "mark_as_read" => Self::MarkAsRead { conversation_id: conversation_id(payload)? },
            "typing" => Self::Typing { conversation_id: conversation_id(payload)? },
            "stop_typing" => Self::StopTyping { conversation_id: conversation_id(payload)? },
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}

/// Accepts a positive integer or its decimal string; browsers send either.
fn conversation_id(payload: &serde_json::Value) -> Result<ConversationId, AppError> {
    let raw = payload.get("conversationId");
    let parsed = match raw {
        Some(serde_json::Value::Number(n)) => n.as_i64(),
        Some(serde_json::Value::String(s)) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    parsed
        .filter(|id| *id > 0)
        .ok_or_else(|| AppError::new(ErrorCode::ValidationError, "conversationId is required and must be a positive integer"))
}

// ---------------------------------------------------------------------------
// Server -> client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewMessagePayload {
    pub message: OutboundMessage,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessageNotificationPayload {
    pub conversation_id: ConversationId,
    pub message: OutboundMessage,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessagesReadPayload {
    pub conversation_id: ConversationId,
    pub reader_id: UserId,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub conversation_id: ConversationId,
    pub user_id: UserId,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserStatusPayload {
    pub user_id: UserId,
    pub is_online: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatedPayload {
    pub user_id: UserId,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl From<PublicError> for ErrorPayload {
    fn from(err: PublicError) -> Self {
        Self {
            code: err.code.code().to_string(),
            message: err.message,
            details: err.details,
        }
    }
}

/// Outbound socket events. Serialized as `{ "event": <name>, "data": <payload> }`
/// and split back into name + payload by the socket writer.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    Authenticated(AuthenticatedPayload),
    NewMessage(NewMessagePayload),
    MessageNotification(MessageNotificationPayload),
    MessageSent(NewMessagePayload),
    MessagesRead(MessagesReadPayload),
    UserTyping(TypingPayload),
    UserStopTyping(TypingPayload),
    UserStatus(UserStatusPayload),
    Error(ErrorPayload),
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Authenticated(_) => "authenticated",
            Self::NewMessage(_) => "new_message",
            Self::MessageNotification(_) => "message_notification",
            Self::MessageSent(_) => "message_sent",
            Self::MessagesRead(_) => "messages_read",
            Self::UserTyping(_) => "user_typing",
            Self::UserStopTyping(_) => "user_stop_typing",
            Self::UserStatus(_) => "user_status",
            Self::Error(_) => "error",
        }
    }

    /// Event name and JSON payload, ready to emit.
    pub fn into_wire(self) -> (&'static str, serde_json::Value) {
        let name = self.name();
        let data = match serde_json::to_value(&self) {
            Ok(serde_json::Value::Object(mut map)) => map.remove("data").unwrap_or(serde_json::Value::Null),
            _ => serde_json::Value::Null,
        };
        (name, data)
    }

    pub fn error(err: &AppError) -> Self {
        Self::Error(err.to_public().into())
    }
}
