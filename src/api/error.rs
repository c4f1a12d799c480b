//! Error taxonomy shared by every handler.
//!
//! Handlers return `Result<_, ApiError>`; the response body is always
//! `{"message": "..."}`. Unexpected failures are logged and reported with a
//! fixed message so internal details never reach clients.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;
use utoipa::ToSchema;

pub const INTERNAL_SERVER_ERROR: &str = "Internal Server Error";
pub const MISSING_PAYLOAD: &str = "Missing payload";

/// Plain `{"message"}` body used for both errors and simple acknowledgements.
#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// `(status, {"message"})` acknowledgement.
pub fn acknowledge(
    status: StatusCode,
    message: impl Into<String>,
) -> (StatusCode, Json<MessageResponse>) {
    (status, Json(MessageResponse::new(message)))
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Unauthenticated(String),
    #[error("{0}")]
    InvalidToken(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    PayloadTooLarge(String),
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn forbidden() -> Self {
        Self::Forbidden("Forbidden".to_string())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Self::InvalidToken(_) | Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            Self::Unexpected(err) => {
                error!("Unexpected error: {err:#}");
                INTERNAL_SERVER_ERROR.to_string()
            }
            other => other.to_string(),
        };
        (status, Json(MessageResponse { message })).into_response()
    }
}

/// Unwrap an optional JSON payload or fail with 400 "Missing payload".
pub fn require_payload<T>(payload: Option<Json<T>>) -> Result<T, ApiError> {
    match payload {
        Some(Json(payload)) => Ok(payload),
        None => Err(ApiError::validation(MISSING_PAYLOAD)),
    }
}
