//! Error types for the fileconv server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use fileconv_core::ConvertError;
use serde::Serialize;
use thiserror::Error;

/// Server error types
#[derive(Error, Debug)]
pub enum ServerError {
    #[error(transparent)]
    Convert(#[from] ConvertError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error response body
#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    error: String,
    code: String,
}

impl ServerError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            ServerError::Convert(err) => match err {
                ConvertError::Validation(e) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", e.to_string())
                }
                ConvertError::Conversion { .. } => {
                    (StatusCode::BAD_REQUEST, "CONVERSION_FAILED", err.to_string())
                }
                ConvertError::CapabilityUnavailable { .. } => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "CAPABILITY_UNAVAILABLE",
                    err.to_string(),
                ),
                ConvertError::NotFound { .. } => {
                    (StatusCode::NOT_FOUND, "NOT_FOUND", "File not found".to_string())
                }
                ConvertError::Workspace { .. } => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "WORKSPACE_ERROR",
                    "Failed to prepare task workspace".to_string(),
                ),
            },
            ServerError::InvalidRequest(msg) => {
                (StatusCode::BAD_REQUEST, "INVALID_REQUEST", msg.clone())
            }
            ServerError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "Internal error".to_string(),
            ),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();

        if status.is_server_error() {
            tracing::error!("{}: {}", code, self);
        }

        let body = ErrorResponse {
            success: false,
            error: message,
            code: code.to_string(),
        };

        (status, Json(body)).into_response()
    }
}
