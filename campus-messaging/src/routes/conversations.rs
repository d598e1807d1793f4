use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use campus_shared::errors::AppResult;
use campus_shared::types::api::ApiResponse;
use campus_shared::types::auth::AuthUser;
use campus_shared::UserId;

use super::parse_conversation_id;
use crate::service::{ConversationDetail, ConversationPreview, CreatedConversation, DeletedConversation};
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConversationRequest {
    #[serde(alias = "userId", alias = "otherUserId")]
    pub target_user_id: UserId,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadCountResponse {
    pub total_unread: i64,
}

/// GET /conversations - caller's conversations, most recent activity first
pub async fn list_conversations(
    auth_user: AuthUser,
    State(state): State<AppState>,
) -> AppResult<Json<ApiResponse<Vec<ConversationPreview>>>> {
    let previews = state.messaging.list_conversations(auth_user.id).await?;
    Ok(Json(ApiResponse::ok(previews)))
}

/// GET /conversations/:id - full history plus peer info
pub async fn get_conversation(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<ApiResponse<ConversationDetail>>> {
    let conversation_id = parse_conversation_id(&id)?;
    let detail = state.messaging.conversation_detail(auth_user.id, conversation_id).await?;
    Ok(Json(ApiResponse::ok(detail)))
}

/// POST /conversations - find or create the conversation with a target user
pub async fn create_conversation(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Json(body): Json<CreateConversationRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<CreatedConversation>>)> {
    let result = state
        .messaging
        .create_conversation(auth_user.id, body.target_user_id)
        .await?;
    let status = if result.created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(ApiResponse::ok(result))))
}

/// DELETE /conversations/:id - remove the conversation and its messages
pub async fn delete_conversation(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<ApiResponse<DeletedConversation>>> {
    let conversation_id = parse_conversation_id(&id)?;
    let deleted = state.messaging.delete_conversation(auth_user.id, conversation_id).await?;
    Ok(Json(ApiResponse::ok_with_message(deleted, "conversation deleted")))
}

/// GET /unread-count - unread peer messages across all conversations
pub async fn get_unread_count(
    auth_user: AuthUser,
    State(state): State<AppState>,
) -> AppResult<Json<ApiResponse<UnreadCountResponse>>> {
    let total_unread = state.messaging.unread_count(auth_user.id).await?;
    Ok(Json(ApiResponse::ok(UnreadCountResponse { total_unread })))
}
