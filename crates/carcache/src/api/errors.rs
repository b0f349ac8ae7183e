use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::query::QueryError;
use crate::repository::RepositoryError;
use crate::sync::SyncError;

/// Errors surfaced by API handlers, rendered as `{error, category}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Query(e) if e.is_client_error() => StatusCode::BAD_REQUEST,
            ApiError::Sync(e) if e.is_conflict() => StatusCode::CONFLICT,
            ApiError::Repository(RepositoryError::NotFound { .. }) | ApiError::NotFound(_) => {
                StatusCode::NOT_FOUND
            }
            ApiError::Repository(RepositoryError::MergeInProgress { .. }) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn category(&self) -> &'static str {
        match self {
            ApiError::Query(e) => e.category(),
            ApiError::Sync(SyncError::AlreadyRunning { .. }) => "already_running",
            ApiError::Sync(SyncError::NotRunning { .. }) => "not_running",
            ApiError::Sync(SyncError::NothingToMerge { .. }) => "nothing_to_merge",
            ApiError::Repository(RepositoryError::NotFound { .. }) | ApiError::NotFound(_) => {
                "not_found"
            }
            ApiError::Repository(RepositoryError::MergeInProgress { .. }) => "merge_in_progress",
            _ => "internal",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "API request failed");
        }
        let body = Json(json!({
            "error": self.to_string(),
            "category": self.category(),
        }));
        (status, body).into_response()
    }
}
