//! SyncStatus entity - persisted state machine of a sync stream.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::entity::error_category::ErrorCategory;
use crate::entity::sync_run_status::{SyncRunStatus, SyncType};

/// One row per logical stream. Only `sync::status::SyncStatusStore` writes it.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sync_status")]
pub struct Model {
    /// Logical stream name, "main" by default.
    #[sea_orm(primary_key, auto_increment = false)]
    pub stream: String,

    // ─── State Machine ───────────────────────────────────────────────────────
    pub status: SyncRunStatus,
    /// Run currently (or last) owning the row.
    pub run_id: Option<Uuid>,
    pub sync_type: SyncType,

    // ─── Timing ──────────────────────────────────────────────────────────────
    pub started_at: Option<DateTimeWithTimeZone>,
    /// Heartbeat, bumped after every completed page.
    pub last_activity_at: Option<DateTimeWithTimeZone>,
    pub finished_at: Option<DateTimeWithTimeZone>,

    // ─── Progress ────────────────────────────────────────────────────────────
    /// Highest completed page.
    #[sea_orm(default_value = 0)]
    pub current_page: i32,
    /// Lowest page not yet known complete.
    #[sea_orm(default_value = 1)]
    pub resume_page: i32,
    pub total_pages: Option<i32>,
    #[sea_orm(default_value = 0)]
    pub records_processed: i64,
    pub total_records: Option<i64>,
    #[sea_orm(default_value = true)]
    pub total_is_estimate: bool,
    #[sea_orm(default_value = 0)]
    pub failed_pages: i32,
    #[sea_orm(default_value = 0)]
    pub consecutive_empty_pages: i32,

    // ─── Outcome ─────────────────────────────────────────────────────────────
    #[sea_orm(column_type = "Text", nullable)]
    pub error_message: Option<String>,
    pub error_category: Option<ErrorCategory>,
    /// Completed below the completeness threshold.
    #[sea_orm(default_value = false)]
    pub incomplete: bool,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Whether the row currently belongs to a live run.
    #[inline]
    pub fn is_running(&self) -> bool {
        self.status == SyncRunStatus::Running
    }

    /// Fraction of the total already processed, if a total is known.
    pub fn progress_ratio(&self) -> Option<f64> {
        match self.total_records {
            Some(total) if total > 0 => Some(self.records_processed as f64 / total as f64),
            _ => None,
        }
    }
}
