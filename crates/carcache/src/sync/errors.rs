use sea_orm::DbErr;
use thiserror::Error;
use uuid::Uuid;

use crate::entity::error_category::ErrorCategory;
use crate::repository::RepositoryError;

/// Errors returned by the sync status store and orchestrator.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The stream already has a live run.
    #[error("Sync already running on stream '{stream}'")]
    AlreadyRunning { stream: String },

    /// The stream has no live run to act on.
    #[error("No sync running on stream '{stream}'")]
    NotRunning { stream: String },

    /// The run aborted on a non-retryable failure.
    #[error("Sync failed ({category}): {message}")]
    Fatal {
        category: ErrorCategory,
        message: String,
    },

    /// The status row was taken out of `running` by someone else.
    #[error("Run {run_id} no longer owns stream '{stream}'")]
    Superseded { stream: String, run_id: Uuid },

    /// A merge replay found no completed run with staged rows.
    #[error("Nothing to merge on stream '{stream}': {reason}")]
    NothingToMerge { stream: String, reason: String },

    /// Interrupted by shutdown; resumable.
    #[error("Run {run_id} cancelled at page {resume_page}")]
    Cancelled { run_id: Uuid, resume_page: u32 },

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("Database error: {0}")]
    Database(#[from] DbErr),
}

impl SyncError {
    pub fn fatal(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self::Fatal {
            category,
            message: message.into(),
        }
    }

    /// Whether the caller tried to start, reset or merge a run in the wrong state.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            SyncError::AlreadyRunning { .. }
                | SyncError::NotRunning { .. }
                | SyncError::NothingToMerge { .. }
        )
    }
}

/// Result type alias for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_classification() {
        assert!(
            SyncError::AlreadyRunning {
                stream: "main".into()
            }
            .is_conflict()
        );
        assert!(!SyncError::fatal(ErrorCategory::Fatal, "401").is_conflict());
    }

    #[test]
    fn test_fatal_display() {
        let err = SyncError::fatal(ErrorCategory::Fatal, "Authentication rejected");
        assert_eq!(err.to_string(), "Sync failed (fatal): Authentication rejected");
    }
}
