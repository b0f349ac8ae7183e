//! Sync run state machine enums.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// State of a sync stream.
///
/// Valid transitions: `Idle | Completed | Failed -> Running` on start, and
/// `Running -> Completed | Failed` on termination. Nothing else writes the
/// status column.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize,
    Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "snake_case")]
pub enum SyncRunStatus {
    #[default]
    #[sea_orm(string_value = "idle")]
    Idle,
    #[sea_orm(string_value = "running")]
    Running,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "failed")]
    Failed,
}

impl SyncRunStatus {
    /// Whether a new run may start from this state.
    #[inline]
    pub fn can_start(self) -> bool {
        !matches!(self, SyncRunStatus::Running)
    }
}

impl std::fmt::Display for SyncRunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncRunStatus::Idle => write!(f, "idle"),
            SyncRunStatus::Running => write!(f, "running"),
            SyncRunStatus::Completed => write!(f, "completed"),
            SyncRunStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Kind of sync pass.
///
/// Only a `Full` pass may archive listings that were not seen, since an
/// incremental pass by definition does not visit every page.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize,
    Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "snake_case")]
pub enum SyncType {
    #[default]
    #[sea_orm(string_value = "full")]
    Full,
    #[sea_orm(string_value = "incremental")]
    Incremental,
}

impl std::fmt::Display for SyncType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncType::Full => write!(f, "full"),
            SyncType::Incremental => write!(f, "incremental"),
        }
    }
}

impl std::str::FromStr for SyncType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "full" => Ok(SyncType::Full),
            "incremental" | "inc" => Ok(SyncType::Incremental),
            _ => Err(format!("Unknown sync type: {}", s)),
        }
    }
}
