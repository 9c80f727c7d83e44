//! Control API error type with HTTP status code mapping

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

use crate::infrastructure::sync_error::SyncError;

#[derive(Error, Debug)]
pub enum ApiError {
    /// Pipeline error surfaced by a use case
    #[error("{0}")]
    Sync(#[from] SyncError),

    /// Malformed request (bad mode, missing field)
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Missing or wrong bearer token
    #[error("{0}")]
    Unauthorized(String),
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,

            Self::Sync(SyncError::UnknownForm(_) | SyncError::SnapshotMissing(_)) => StatusCode::NOT_FOUND,
            Self::Sync(SyncError::JobAlreadyRunning(_)) => StatusCode::CONFLICT,

            // Upstream side failed
            Self::Sync(
                SyncError::Transport(_)
                | SyncError::Upstream { .. }
                | SyncError::RateLimited { .. }
                | SyncError::Decode(_),
            ) => StatusCode::BAD_GATEWAY,

            Self::Sync(
                SyncError::Config(_) | SyncError::Io(_) | SyncError::Json(_) | SyncError::Csv(_),
            ) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// JSON error response body
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub status: u16,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(status = status.as_u16(), "Request failed: {}", self);
        } else {
            warn!(status = status.as_u16(), "Request rejected: {}", self);
        }

        let body = ErrorResponse {
            error: self.to_string(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
