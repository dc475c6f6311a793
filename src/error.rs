//! Error types surfaced to HTTP callers.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FocusError {
    #[error("session {0} not found")]
    NotFound(String),

    #[error("no recent activity for session {0}")]
    NoActivity(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("store failure: {0}")]
    Store(String),

    #[error("server is shutting down")]
    ShuttingDown,
}

impl FocusError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            FocusError::NotFound(_) | FocusError::NoActivity(_) => StatusCode::NOT_FOUND,
            FocusError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            FocusError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            FocusError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl From<anyhow::Error> for FocusError {
    fn from(err: anyhow::Error) -> Self {
        FocusError::Store(format!("{err:#}"))
    }
}

impl From<serde_json::Error> for FocusError {
    fn from(err: serde_json::Error) -> Self {
        FocusError::Store(format!("corrupt record: {err}"))
    }
}

impl IntoResponse for FocusError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            log::error!("request failed: {self}");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
