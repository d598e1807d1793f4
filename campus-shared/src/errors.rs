use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::env::is_production;
use crate::types::ApiErrorResponse;

/// Application error codes following the pattern E{service}{sequence}
///
/// Ranges:
/// - E0xxx: Shared/infrastructure errors
/// - E1xxx: Auth errors
/// - E4xxx: Messaging errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    // Shared (E0xxx)
    InternalError,
    ValidationError,
    NotFound,
    Unauthorized,
    Forbidden,
    ServiceUnavailable,
    BadRequest,
    PayloadTooLarge,

    // Auth (E1xxx)
    TokenExpired,
    TokenInvalid,

    // Messaging (E4xxx)
    ConversationNotFound,
    Unauthenticated,
    InvalidImage,
    CannotMessageSelf,
}

impl ErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            // Shared
            Self::InternalError => "E0001",
            Self::ValidationError => "E0002",
            Self::NotFound => "E0003",
            Self::Unauthorized => "E0004",
            Self::Forbidden => "E0005",
            Self::ServiceUnavailable => "E0007",
            Self::BadRequest => "E0008",
            Self::PayloadTooLarge => "E0009",

            // Auth
            Self::TokenExpired => "E1004",
            Self::TokenInvalid => "E1005",

            // Messaging
            Self::ConversationNotFound => "E4001",
            Self::Unauthenticated => "E4005",
            Self::InvalidImage => "E4006",
            Self::CannotMessageSelf => "E4007",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::ValidationError | Self::BadRequest | Self::InvalidImage
            | Self::CannotMessageSelf => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::NotFound | Self::ConversationNotFound => StatusCode::NOT_FOUND,
            Self::Unauthorized | Self::Unauthenticated | Self::TokenExpired
            | Self::TokenInvalid => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
        }
    }

    /// Whether a client may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ServiceUnavailable)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{message}")]
    Known {
        code: ErrorCode,
        message: String,
        details: Option<serde_json::Value>,
    },

    #[error("internal server error")]
    Internal(#[from] anyhow::Error),
}

/// The client-visible face of an [`AppError`], shared by the HTTP and socket transports.
#[derive(Debug, Clone, PartialEq)]
pub struct PublicError {
    pub code: ErrorCode,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl AppError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Known {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(code: ErrorCode, message: impl Into<String>, details: serde_json::Value) -> Self {
        Self::Known {
            code,
            message: message.into(),
            details: Some(details),
        }
    }

    /// Attach the underlying cause as `details`, unless running in production.
    pub fn with_cause(code: ErrorCode, message: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        if is_production() {
            Self::new(code, message)
        } else {
            Self::with_details(code, message, serde_json::Value::String(cause.to_string()))
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadRequest, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Known { code, .. } => *code,
            AppError::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Convert into what may be shown to a client. Internal causes are logged
    /// here and only surface as `details` outside production.
    pub fn to_public(&self) -> PublicError {
        match self {
            AppError::Known { code, message, details } => PublicError {
                code: *code,
                message: message.clone(),
                details: details.clone(),
            },
            AppError::Internal(err) => {
                tracing::error!(error = %err, "internal server error");
                PublicError {
                    code: ErrorCode::InternalError,
                    message: "internal server error".into(),
                    details: debug_details(err),
                }
            }
        }
    }
}

fn debug_details(err: &impl std::fmt::Display) -> Option<serde_json::Value> {
    if is_production() {
        None
    } else {
        Some(serde_json::Value::String(err.to_string()))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let public = self.to_public();
        let status = public.code.status_code();
        (status, Json(ApiErrorResponse::from(public))).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_json(err: AppError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn known_error_envelope() {
        let (status, value) = body_json(AppError::new(
            ErrorCode::ConversationNotFound,
            "conversation not found",
        ))
        .await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(value["success"], false);
        assert_eq!(value["error"]["code"], "E4001");
        assert_eq!(value["error"]["message"], "conversation not found");
        assert!(value["error"].get("details").is_none());
    }

    #[tokio::test]
    async fn unavailable_maps_to_503() {
        let (status, value) = body_json(AppError::new(
            ErrorCode::ServiceUnavailable,
            "storage is temporarily unavailable, please retry",
        ))
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(value["error"]["code"], "E0007");
    }

    #[tokio::test]
    async fn internal_error_hides_message() {
        let (status, value) = body_json(AppError::Internal(anyhow::anyhow!("pool exhausted"))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(value["error"]["message"], "internal server error");
    }

    #[test]
    fn only_unavailable_is_retryable() {
        assert!(ErrorCode::ServiceUnavailable.is_retryable());
        assert!(!ErrorCode::InternalError.is_retryable());
        assert_eq!(ErrorCode::ServiceUnavailable.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn public_error_keeps_known_details() {
        let err = AppError::with_details(
            ErrorCode::ValidationError,
            "bad field",
            serde_json::json!({ "field": "content" }),
        );
        let public = err.to_public();
        assert_eq!(public.code, ErrorCode::ValidationError);
        assert_eq!(public.details.unwrap()["field"], "content");
    }
}
