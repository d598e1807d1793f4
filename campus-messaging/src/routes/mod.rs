pub mod conversations;
pub mod health;
pub mod messages;

use campus_shared::{AppError, ErrorCode};

use crate::models::ConversationId;

/// Path ids arrive as strings so malformed ones get the JSON error envelope.
pub(crate) fn parse_conversation_id(raw: &str) -> Result<ConversationId, AppError> {
    raw.trim()
        .parse::<ConversationId>()
        .ok()
        .filter(|id| *id > 0)
        .ok_or_else(|| AppError::new(ErrorCode::ValidationError, "conversation id must be a positive integer"))
}
