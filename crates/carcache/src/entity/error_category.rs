//! Failure taxonomy shared by the fetch path and the sync status record.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Category of a sync failure.
///
/// Ops tooling branches on this to decide between retrying and escalating.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Timeouts, 5xx, 429. Retried with backoff.
    #[sea_orm(string_value = "transient")]
    Transient,
    /// Authentication or configuration failure. Never retried.
    #[sea_orm(string_value = "fatal")]
    Fatal,
    /// A page failed after retries; the run continued.
    #[sea_orm(string_value = "partial_data")]
    PartialData,
    /// Flagged by the watchdog.
    #[sea_orm(string_value = "stalled")]
    Stalled,
    /// Interrupted by shutdown or an operator reset.
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

impl ErrorCategory {
    /// Whether an automatic resume is reasonable after this failure.
    #[inline]
    pub fn is_resumable(self) -> bool {
        !matches!(self, ErrorCategory::Fatal)
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Transient => write!(f, "transient"),
            ErrorCategory::Fatal => write!(f, "fatal"),
            ErrorCategory::PartialData => write!(f, "partial_data"),
            ErrorCategory::Stalled => write!(f, "stalled"),
            ErrorCategory::Cancelled => write!(f, "cancelled"),
        }
    }
}
