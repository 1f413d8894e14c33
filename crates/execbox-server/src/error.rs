//! Error types for the execbox server.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::protocol::ErrorBody;

/// Server error type.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Execbox core error.
    #[error(transparent)]
    Core(#[from] execbox_core::Error),

    /// Malformed request body.
    #[error("invalid request: {0}")]
    BadRequest(String),

    /// Listen address could not be parsed.
    #[error("invalid address: {0}")]
    Address(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

impl ServerError {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        use execbox_core::Error as Core;
        match self {
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::Core(Core::InvalidRequest(_) | Core::UnsupportedLanguage(_)) => {
                StatusCode::BAD_REQUEST
            }
            ServerError::Core(Core::NotFound(_)) => StatusCode::NOT_FOUND,
            ServerError::Core(Core::InputUnavailable(_)) => StatusCode::CONFLICT,
            ServerError::Core(_) | ServerError::Address(_) | ServerError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        use execbox_core::Error as Core;
        match self {
            ServerError::BadRequest(_) | ServerError::Core(Core::InvalidRequest(_)) => "invalid_request",
            ServerError::Core(Core::UnsupportedLanguage(_)) => "unsupported_language",
            ServerError::Core(Core::NotFound(_)) => "not_found",
            ServerError::Core(Core::InputUnavailable(_)) => "input_unavailable",
            ServerError::Core(Core::Workspace { .. }) => "workspace_error",
            _ => "internal_error",
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        } else {
            tracing::debug!("Request rejected: {}", self);
        }

        let body = ErrorBody {
            success: false,
            message: self.to_string(),
            error: self.code(),
        };
        (status, Json(body)).into_response()
    }
}
