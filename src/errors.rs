use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

use crate::services::image_service::ImageError;

/// A lightweight wrapper for handler errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<ImageError> for AppError {
    fn from(err: ImageError) -> Self {
        let status = match &err {
            ImageError::InvalidUrl { .. } => StatusCode::BAD_REQUEST,
            ImageError::AlreadyExists(_) => StatusCode::CONFLICT,
            ImageError::NotFound(_) => StatusCode::NOT_FOUND,
            ImageError::Transfer { .. } | ImageError::Storage(_) => StatusCode::BAD_GATEWAY,
        };

        AppError::new(status, err.to_string())
    }
}
