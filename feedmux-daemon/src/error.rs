//! Error types for feedmux-daemon

use crate::view::ViewState;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

/// Errors from view state-machine commands
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ViewError {
    /// The command is not valid in the view's current state
    #[error("Cannot {operation} a view in state {state}")]
    InvalidState {
        operation: &'static str,
        state: ViewState,
    },

    /// The view is closed
    #[error("View is closed")]
    Closed,
}

/// Errors from the core service registry
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Unknown service: {0}")]
    UnknownService(String),

    #[error("Unknown view: {0}")]
    UnknownView(Uuid),

    #[error(transparent)]
    View(#[from] ViewError),

    #[error("Common error: {0}")]
    Common(#[from] feedmux_common::Error),
}

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Conflict (409), e.g. starting a running view
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Gone (410), the view was closed
    #[error("Gone: {0}")]
    Gone(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<ViewError> for ApiError {
    fn from(err: ViewError) -> Self {
        match err {
            ViewError::InvalidState { .. } => ApiError::Conflict(err.to_string()),
            ViewError::Closed => ApiError::Gone(err.to_string()),
        }
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::UnknownService(_) | CoreError::UnknownView(_) => {
                ApiError::NotFound(err.to_string())
            }
            CoreError::View(view) => view.into(),
            CoreError::Common(feedmux_common::Error::InvalidInput(msg)) => {
                ApiError::BadRequest(msg)
            }
            CoreError::Common(common) => ApiError::Internal(common.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "INVALID_STATE", msg),
            ApiError::Gone(msg) => (StatusCode::GONE, "VIEW_CLOSED", msg),
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg,
            ),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
