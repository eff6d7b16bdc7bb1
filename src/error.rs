//! Error handling for the rig server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types surfaced to HTTP callers
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Stream requested without a selected camera or while disabled
    #[error("No active stream. Please select a device.")]
    NoActiveStream,

    /// Capture requested before any frame arrived
    #[error("No frame available to capture. Please start the stream first.")]
    NoFrame,

    /// Not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Image decode/encode error
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// External helper program exited unsuccessfully
    #[error("Command failed: {0}")]
    CommandFailed(String),

    /// Background task died
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        Error::Internal(e.to_string())
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_code) = match &self {
            // Missing preconditions are an expected state, reported as plain text.
            Error::NoActiveStream | Error::NoFrame => {
                tracing::debug!(message = %self, "Precondition not met");
                return (StatusCode::OK, self.to_string()).into_response();
            }
            Error::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Error::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            Error::Image(_) => (StatusCode::INTERNAL_SERVER_ERROR, "IMAGE_ERROR"),
            Error::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR"),
            Error::CommandFailed(_) => (StatusCode::INTERNAL_SERVER_ERROR, "COMMAND_FAILED"),
            Error::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };

        let message = self.to_string();
        tracing::error!(
            status = %status,
            error_code = %error_code,
            message = %message,
            "Request error"
        );

        let body = Json(json!({
            "error_code": error_code,
            "message": message
        }));

        (status, body).into_response()
    }
}
