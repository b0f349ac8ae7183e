use sea_orm::DbErr;
use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database error from sea-orm.
    #[error("Database error: {0}")]
    Database(#[from] DbErr),

    /// Listing not found.
    #[error("Listing not found: {context}")]
    NotFound { context: String },

    /// Another task is merging the same run.
    #[error("Merge already in progress for run {run_id}")]
    MergeInProgress { run_id: Uuid },

    /// Invalid input data.
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },
}

impl RepositoryError {
    /// Create a NotFound error for a UUID lookup.
    pub fn not_found_by_id(id: Uuid) -> Self {
        Self::NotFound {
            context: format!("id={}", id),
        }
    }

    /// Whether retrying the same statement may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            RepositoryError::Database(db_err) => is_retryable_db_error(db_err),
            _ => false,
        }
    }
}

/// Check whether a database error is transient (lock contention, dropped connection).
pub fn is_retryable_db_error(err: &DbErr) -> bool {
    match err {
        DbErr::ConnectionAcquire(_) | DbErr::Conn(_) => true,
        DbErr::Exec(_) | DbErr::Query(_) => {
            let err_str = err.to_string().to_lowercase();
            // SQLite: database is locked, busy
            // PostgreSQL: connection refused, too many connections
            err_str.contains("locked")
                || err_str.contains("busy")
                || err_str.contains("timeout")
                || err_str.contains("connection")
                || err_str.contains("temporarily unavailable")
        }
        _ => false,
    }
}

/// Result type alias for repository operations.
pub type Result<T> = std::result::Result<T, RepositoryError>;

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::RuntimeErr;

    #[test]
    fn test_not_found_by_id() {
        let id = Uuid::new_v4();
        let msg = RepositoryError::not_found_by_id(id).to_string();
        assert!(msg.contains("not found"));
        assert!(msg.contains(&id.to_string()));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(is_retryable_db_error(&DbErr::Conn(RuntimeErr::Internal(
            "gone".to_string()
        ))));
        assert!(is_retryable_db_error(&DbErr::Exec(RuntimeErr::Internal(
            "database is locked".to_string()
        ))));
        assert!(!is_retryable_db_error(&DbErr::Exec(RuntimeErr::Internal(
            "UNIQUE constraint failed".to_string()
        ))));
        assert!(!RepositoryError::MergeInProgress { run_id: Uuid::nil() }.is_retryable());
    }
}
