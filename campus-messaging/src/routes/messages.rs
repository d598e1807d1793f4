use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use campus_shared::errors::{AppError, AppResult, ErrorCode};
use campus_shared::types::api::ApiResponse;
use campus_shared::types::auth::AuthUser;

use super::parse_conversation_id;
use crate::realtime::OutboundMessage;
use crate::service::{ImageAttachment, MessageDraft, ReadReceipt, Transport};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub content: String,
    /// Optional `data:image/...;base64,` URL.
    #[serde(default)]
    pub image: Option<String>,
}

/// POST /conversations/:id/send
pub async fn send_message(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<SendMessageRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<OutboundMessage>>)> {
    let conversation_id = parse_conversation_id(&id)?;
    let image = body
        .image
        .filter(|url| !url.is_empty())
        .map(|url| ImageAttachment::from_data_url(&url, state.messaging.max_image_bytes()))
        .transpose()?;
    let draft = MessageDraft::new(conversation_id, &body.content, image)?;

    let message = state
        .messaging
        .send_message(auth_user.id, None, draft, Transport::Http)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(message))))
}

/// POST /conversations/with-image/:id - multipart with an `image` (or `file`)
/// part and an optional `content` part
pub async fn send_message_with_image(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<ApiResponse<OutboundMessage>>)> {
    let conversation_id = parse_conversation_id(&id)?;
    let max_bytes = state.messaging.max_image_bytes();

    let mut content = String::new();
    let mut image = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "image" | "file" => {
                let content_type = field.content_type().unwrap_or_default().to_string();
                let bytes = field.bytes().await.map_err(multipart_error)?;
                image = Some(ImageAttachment::from_upload(&content_type, bytes.to_vec(), max_bytes)?);
            }
            "content" => {
                content = field.text().await.map_err(multipart_error)?;
            }
            other => {
                tracing::debug!(field = other, "ignoring unknown multipart field");
            }
        }
    }

    let image = image.ok_or_else(|| AppError::new(ErrorCode::ValidationError, "image file is required"))?;
    let draft = MessageDraft::new(conversation_id, &content, Some(image))?;

    let message = state
        .messaging
        .send_message(auth_user.id, None, draft, Transport::Http)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(message))))
}

fn multipart_error(e: axum::extract::multipart::MultipartError) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::new(ErrorCode::PayloadTooLarge, "upload exceeds the size limit")
    } else {
        AppError::new(ErrorCode::ValidationError, format!("multipart error: {e}"))
    }
}

/// PUT|POST /conversations/:id/read
pub async fn mark_as_read(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<ApiResponse<ReadReceipt>>> {
    let conversation_id = parse_conversation_id(&id)?;
    let receipt = state.messaging.mark_as_read(auth_user.id, conversation_id).await?;
    Ok(Json(ApiResponse::ok(receipt)))
}
