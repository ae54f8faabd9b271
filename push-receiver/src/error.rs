use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use push_agent::fs::walker::RelPath;
use push_agent::PushError;
use serde_json::json;

/// Receiver failures, each mapped to one status and a machine-readable code.
#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("no open session for push {0}")]
    NoSession(String),

    #[error("receiver is busy: {0}")]
    SessionConflict(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("upload of {path} exceeds the {limit} byte limit")]
    TooLarge { path: RelPath, limit: u64 },

    #[error("upload of {path} rejected: {detail}")]
    Integrity { path: RelPath, detail: String },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::NoSession(_) => (StatusCode::NOT_FOUND, "no_session"),
            AppError::SessionConflict(_) => (StatusCode::CONFLICT, "session_conflict"),
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            AppError::TooLarge { .. } => (StatusCode::PAYLOAD_TOO_LARGE, "too_large"),
            AppError::Integrity { .. } => (StatusCode::BAD_REQUEST, "integrity"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        }
    }
}

impl From<PushError> for AppError {
    fn from(err: PushError) -> Self {
        match err {
            PushError::InvalidPath(m) => AppError::BadRequest(format!("invalid path: {}", m)),
            PushError::CorruptManifest(m) => AppError::BadRequest(m),
            other => AppError::Internal(other.into()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let message = match &self {
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:#}");
                "Internal server error".to_string()
            }
            other => {
                tracing::debug!(code, "Request refused: {}", other);
                other.to_string()
            }
        };
        (status, Json(json!({ "error": message, "code": code }))).into_response()
    }
}
