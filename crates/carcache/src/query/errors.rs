use sea_orm::DbErr;
use thiserror::Error;

/// Errors from the read side.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Unknown sort '{value}'")]
    UnknownSort { value: String },

    #[error("Invalid cursor: {reason}")]
    InvalidCursor { reason: String },

    /// The cursor was issued for another sort key or filter set.
    #[error("Cursor does not match the requested sort and filters")]
    CursorMismatch,

    #[error("Invalid filter: {message}")]
    InvalidFilter { message: String },

    #[error("Database error: {0}")]
    Database(#[from] DbErr),
}

impl QueryError {
    pub fn invalid_cursor(reason: impl Into<String>) -> Self {
        Self::InvalidCursor {
            reason: reason.into(),
        }
    }

    pub fn invalid_filter(message: impl Into<String>) -> Self {
        Self::InvalidFilter {
            message: message.into(),
        }
    }

    /// Whether the caller sent a bad request.
    #[inline]
    pub fn is_client_error(&self) -> bool {
        !matches!(self, QueryError::Database(_))
    }

    /// Short machine-readable category for API responses.
    pub fn category(&self) -> &'static str {
        match self {
            QueryError::UnknownSort { .. } => "unknown_sort",
            QueryError::InvalidCursor { .. } => "invalid_cursor",
            QueryError::CursorMismatch => "cursor_mismatch",
            QueryError::InvalidFilter { .. } => "invalid_filter",
            QueryError::Database(_) => "database",
        }
    }
}

/// Result type alias for query operations.
pub type Result<T> = std::result::Result<T, QueryError>;
