use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::entity::error_category::ErrorCategory;

/// Failure fetching one page from the remote listing API.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// Connection refused, reset, DNS failure.
    #[error("Network error: {message}")]
    Network { message: String },

    /// The attempt exceeded its time budget.
    #[error("Request timed out after {after:?}")]
    Timeout { after: Duration },

    /// 5xx or 408 from the remote.
    #[error("Server error: HTTP {status}")]
    Server { status: u16 },

    /// 429 from the remote, with the `Retry-After` hint if one was sent.
    #[error("Rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// 401 or 403.
    #[error("Authentication failed: HTTP {status}")]
    Auth { status: u16 },

    /// Malformed base URL or credentials.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// The body was not a listing page.
    #[error("Undecodable page body: {message}")]
    Decode { message: String },

    /// Any other non-success status.
    #[error("Unexpected response: HTTP {status}")]
    Unexpected { status: u16 },
}

impl FetchError {
    #[inline]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    #[inline]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, retry_after: Option<Duration>) -> Self {
        match status {
            429 => Self::RateLimited { retry_after },
            401 | 403 => Self::Auth { status },
            408 | 500..=599 => Self::Server { status },
            _ => Self::Unexpected { status },
        }
    }

    /// Failure category the orchestrator branches on.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Network { .. }
            | Self::Timeout { .. }
            | Self::Server { .. }
            | Self::RateLimited { .. } => ErrorCategory::Transient,
            Self::Auth { .. } | Self::Config { .. } => ErrorCategory::Fatal,
            Self::Decode { .. } | Self::Unexpected { .. } => ErrorCategory::PartialData,
        }
    }

    /// Whether another attempt may succeed.
    #[inline]
    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::Transient
    }

    /// Whether the run must stop.
    #[inline]
    pub fn is_fatal(&self) -> bool {
        self.category() == ErrorCategory::Fatal
    }

    /// Server-provided minimum wait before the next attempt.
    #[inline]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Parse a `Retry-After` header: delta-seconds or an HTTP date.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}

/// First line of an error message, for progress output and status rows.
#[inline]
pub fn short_error_message(e: &impl std::error::Error) -> String {
    let full = e.to_string();
    full.lines().next().unwrap_or(&full).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            FetchError::from_status(429, None),
            FetchError::RateLimited { .. }
        ));
        assert_eq!(FetchError::from_status(401, None).category(), ErrorCategory::Fatal);
        assert_eq!(FetchError::from_status(403, None).category(), ErrorCategory::Fatal);
        assert_eq!(
            FetchError::from_status(503, None).category(),
            ErrorCategory::Transient
        );
        assert_eq!(
            FetchError::from_status(408, None).category(),
            ErrorCategory::Transient
        );
        assert_eq!(
            FetchError::from_status(422, None).category(),
            ErrorCategory::PartialData
        );
    }

    #[test]
    fn test_only_transient_errors_retry() {
        assert!(FetchError::network("reset").is_retryable());
        assert!(
            FetchError::Timeout {
                after: Duration::from_secs(30)
            }
            .is_retryable()
        );
        assert!(!FetchError::decode("not json").is_retryable());
        assert!(!FetchError::config("bad url").is_retryable());
        assert!(FetchError::config("bad url").is_fatal());
    }

    #[test]
    fn test_retry_after_only_on_rate_limit() {
        let err = FetchError::from_status(429, Some(Duration::from_secs(7)));
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
        assert_eq!(FetchError::from_status(503, None).retry_after(), None);
    }

    #[test]
    fn test_parse_retry_after_seconds_and_date() {
        let now = DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(parse_retry_after("12", now), Some(Duration::from_secs(12)));
        assert_eq!(
            parse_retry_after("Sun, 01 Mar 2026 12:00:30 GMT", now),
            Some(Duration::from_secs(30))
        );
        assert_eq!(
            parse_retry_after("Sun, 01 Mar 2026 11:00:00 GMT", now),
            Some(Duration::ZERO)
        );
        assert_eq!(parse_retry_after("soon", now), None);
    }

    #[test]
    fn test_short_error_message_multiline() {
        let err = std::io::Error::other("first line\nsecond line");
        assert_eq!(short_error_message(&err), "first line");
    }
}
