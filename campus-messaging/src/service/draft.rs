use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use campus_shared::{AppError, ErrorCode};

use crate::models::ConversationId;

const ACCEPTED_IMAGE_TYPES: [&str; 5] = ["image/jpeg", "image/jpg", "image/png", "image/webp", "image/gif"];

/// An image attachment that passed type and size checks.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageAttachment {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl ImageAttachment {
    /// From a multipart upload.
    pub fn from_upload(content_type: &str, bytes: Vec<u8>, max_bytes: usize) -> Result<Self, AppError> {
        let content_type = content_type.trim().to_ascii_lowercase();
        if !ACCEPTED_IMAGE_TYPES.contains(&content_type.as_str()) {
            return Err(AppError::new(
                ErrorCode::InvalidImage,
                "unsupported format, accepted: jpeg, png, webp, gif",
            ));
        }
        if bytes.is_empty() {
            return Err(AppError::new(ErrorCode::InvalidImage, "image is empty"));
        }
        if bytes.len() > max_bytes {
            return Err(AppError::new(
                ErrorCode::PayloadTooLarge,
                format!("image exceeds {max_bytes} bytes"),
            ));
        }
        Ok(Self { content_type, bytes })
    }

    /// From a `data:image/...;base64,...` URL sent over the socket.
    pub fn from_data_url(url: &str, max_bytes: usize) -> Result<Self, AppError> {
        let invalid = || AppError::new(ErrorCode::InvalidImage, "image must be a base64 data URL");

        let rest = url.strip_prefix("data:").ok_or_else(invalid)?;
        let (meta, encoded) = rest.split_once(',').ok_or_else(invalid)?;
        let content_type = meta.strip_suffix(";base64").ok_or_else(invalid)?;

        // base64 inflates by 4/3; reject before decoding anything huge
        if encoded.len() / 4 * 3 > max_bytes + 3 {
            return Err(AppError::new(
                ErrorCode::PayloadTooLarge,
                format!("image exceeds {max_bytes} bytes"),
            ));
        }
        let bytes = STANDARD.decode(encoded.trim()).map_err(|_| invalid())?;
        Self::from_upload(content_type, bytes, max_bytes)
    }

    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.content_type, STANDARD.encode(&self.bytes))
    }
}

/// A validated outgoing message, before the membership check.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageDraft {
    pub conversation_id: ConversationId,
    pub content: String,
    pub image: Option<ImageAttachment>,
}

impl MessageDraft {
    /// Content is trimmed; it may only be empty when an image is attached.
    pub fn new(
        conversation_id: ConversationId,
        content: &str,
        image: Option<ImageAttachment>,
    ) -> Result<Self, AppError> {
        if conversation_id <= 0 {
            return Err(AppError::new(ErrorCode::ValidationError, "invalid conversation id"));
        }
        let content = content.trim().to_string();
        if content.is_empty() && image.is_none() {
            return Err(AppError::new(
                ErrorCode::ValidationError,
                "message content cannot be empty",
            ));
        }
        Ok(Self { conversation_id, content, image })
    }
}
