//! Persisted sync state machine.
//!
//! Every write to `sync_status` goes through [`SyncStatusStore`]. Starting a
//! run is a compare-and-set on `status != running`; every later write is a
//! compare-and-set on `(stream, run_id, status = running)`, so a run that lost
//! ownership (operator reset, watchdog) cannot overwrite the outcome.

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Utc};
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set, sea_query::OnConflict,
};
use uuid::Uuid;

use crate::entity::error_category::ErrorCategory;
use crate::entity::sync_run_status::{SyncRunStatus, SyncType};
use crate::entity::sync_status::{ActiveModel, Column, Entity as SyncStatus, Model};
use crate::repository::{RepositoryError, count_staged_before};

use super::errors::{Result, SyncError};
use super::types::StartPage;

/// Ownership of a stream handed to the orchestrator by [`SyncStatusStore::begin_run`].
#[derive(Debug, Clone, PartialEq)]
pub struct RunClaim {
    pub stream: String,
    pub run_id: Uuid,
    pub sync_type: SyncType,
    pub start_page: u32,
    /// True when continuing a failed run under its original id.
    pub resumed: bool,
    /// Records already staged by earlier attempts of this run.
    pub records_processed: u64,
    pub total_records: Option<u64>,
    pub total_pages: Option<u32>,
    pub total_is_estimate: bool,
}

/// Progress fields written after each completed page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub current_page: u32,
    pub resume_page: u32,
    pub records_processed: u64,
    pub failed_pages: u32,
    pub consecutive_empty_pages: u32,
}

fn to_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn now() -> DateTime<FixedOffset> {
    Utc::now().fixed_offset()
}

/// Handle on the `sync_status` table.
///
/// Cloning shares the connection; `DatabaseConnection` itself is not `Clone`
/// when sea-orm's mock backend is compiled in.
#[derive(Debug, Clone)]
pub struct SyncStatusStore {
    db: Arc<DatabaseConnection>,
}

impl SyncStatusStore {
    pub fn new(db: impl Into<Arc<DatabaseConnection>>) -> Self {
        Self { db: db.into() }
    }

    /// The underlying connection.
    pub fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Shared handle on the underlying connection.
    pub fn shared_db(&self) -> Arc<DatabaseConnection> {
        Arc::clone(&self.db)
    }

    /// Current row for `stream`, if one was ever created.
    pub async fn get(&self, stream: &str) -> Result<Option<Model>> {
        Ok(SyncStatus::find_by_id(stream.to_string()).one(self.db.as_ref()).await?)
    }

    async fn require(&self, stream: &str) -> Result<Model> {
        self.get(stream).await?.ok_or_else(|| {
            SyncError::Repository(RepositoryError::NotFound {
                context: format!("sync stream '{stream}'"),
            })
        })
    }

    /// Insert an idle row for `stream` unless one exists.
    async fn ensure_row(&self, stream: &str) -> Result<()> {
        let row = ActiveModel {
            stream: Set(stream.to_string()),
            status: Set(SyncRunStatus::Idle),
            run_id: Set(None),
            sync_type: Set(SyncType::Full),
            started_at: Set(None),
            last_activity_at: Set(None),
            finished_at: Set(None),
            current_page: Set(0),
            resume_page: Set(1),
            total_pages: Set(None),
            records_processed: Set(0),
            total_records: Set(None),
            total_is_estimate: Set(true),
            failed_pages: Set(0),
            consecutive_empty_pages: Set(0),
            error_message: Set(None),
            error_category: Set(None),
            incomplete: Set(false),
            updated_at: Set(now()),
        };
        SyncStatus::insert(row)
            .on_conflict(OnConflict::column(Column::Stream).do_nothing().to_owned())
            .exec_without_returning(self.db.as_ref())
            .await?;
        Ok(())
    }

    /// Claim `stream` for a new (or resumed) run.
    ///
    /// `StartPage::Resume` continues the last failed run under its original id
    /// from its `resume_page`. With nothing to resume it starts at page 1.
    ///
    /// # Errors
    /// `SyncError::AlreadyRunning` if the stream has a live run.
    #[tracing::instrument(skip(self))]
    pub async fn begin_run(
        &self,
        stream: &str,
        sync_type: SyncType,
        start: StartPage,
        estimated_total: Option<u64>,
    ) -> Result<RunClaim> {
        self.ensure_row(stream).await?;
        let prev = self.require(stream).await?;
        if prev.is_running() {
            return Err(SyncError::AlreadyRunning {
                stream: stream.to_string(),
            });
        }

        let resumable = match (start, prev.run_id) {
            (StartPage::Resume, Some(run_id)) if prev.status == SyncRunStatus::Failed => {
                Some(run_id)
            }
            _ => None,
        };

        let claim = match resumable {
            Some(run_id) => {
                let start_page = u32::try_from(prev.resume_page).unwrap_or(1).max(1);
                let records_processed =
                    count_staged_before(self.db.as_ref(), run_id, start_page).await?;
                RunClaim {
                    stream: stream.to_string(),
                    run_id,
                    sync_type,
                    start_page,
                    resumed: true,
                    records_processed,
                    total_records: prev.total_records.and_then(|t| u64::try_from(t).ok()),
                    total_pages: prev.total_pages.and_then(|t| u32::try_from(t).ok()),
                    total_is_estimate: prev.total_is_estimate,
                }
            }
            None => {
                if start == StartPage::Resume {
                    tracing::warn!(stream, status = %prev.status, "Nothing to resume, starting at page 1");
                }
                let start_page = match start {
                    StartPage::Page(page) => page.max(1),
                    StartPage::Resume => 1,
                };
                RunClaim {
                    stream: stream.to_string(),
                    run_id: Uuid::new_v4(),
                    sync_type,
                    start_page,
                    resumed: false,
                    records_processed: 0,
                    total_records: estimated_total,
                    total_pages: None,
                    total_is_estimate: true,
                }
            }
        };

        let now = now();
        let update = ActiveModel {
            status: Set(SyncRunStatus::Running),
            run_id: Set(Some(claim.run_id)),
            sync_type: Set(sync_type),
            started_at: Set(Some(now)),
            last_activity_at: Set(Some(now)),
            finished_at: Set(None),
            current_page: Set(to_i32(claim.start_page.saturating_sub(1))),
            resume_page: Set(to_i32(claim.start_page)),
            total_pages: Set(claim.total_pages.map(to_i32)),
            records_processed: Set(to_i64(claim.records_processed)),
            total_records: Set(claim.total_records.map(to_i64)),
            total_is_estimate: Set(claim.total_is_estimate),
            failed_pages: Set(0),
            consecutive_empty_pages: Set(0),
            error_message: Set(None),
            error_category: Set(None),
            incomplete: Set(false),
            updated_at: Set(now),
            ..Default::default()
        };
        let result = SyncStatus::update_many()
            .set(update)
            .filter(Column::Stream.eq(stream))
            .filter(Column::Status.ne(SyncRunStatus::Running))
            .exec(self.db.as_ref())
            .await?;
        if result.rows_affected == 0 {
            return Err(SyncError::AlreadyRunning {
                stream: stream.to_string(),
            });
        }

        tracing::info!(
            stream,
            run_id = %claim.run_id,
            start_page = claim.start_page,
            resumed = claim.resumed,
            "Sync run started"
        );
        Ok(claim)
    }

    /// Compare-and-set write for a live run.
    async fn transition(&self, stream: &str, run_id: Uuid, update: ActiveModel) -> Result<()> {
        let result = SyncStatus::update_many()
            .set(update)
            .filter(Column::Stream.eq(stream))
            .filter(Column::RunId.eq(run_id))
            .filter(Column::Status.eq(SyncRunStatus::Running))
            .exec(self.db.as_ref())
            .await?;
        if result.rows_affected == 0 {
            return Err(SyncError::Superseded {
                stream: stream.to_string(),
                run_id,
            });
        }
        Ok(())
    }

    /// Store the dataset size learned from the first page (or the configured estimate).
    pub async fn record_discovery(
        &self,
        stream: &str,
        run_id: Uuid,
        total_records: Option<u64>,
        total_pages: Option<u32>,
        estimated: bool,
    ) -> Result<()> {
        let now = now();
        let update = ActiveModel {
            total_records: Set(total_records.map(to_i64)),
            total_pages: Set(total_pages.map(to_i32)),
            total_is_estimate: Set(estimated),
            last_activity_at: Set(Some(now)),
            updated_at: Set(now),
            ..Default::default()
        };
        self.transition(stream, run_id, update).await
    }

    /// Heartbeat plus progress counters.
    pub async fn record_progress(
        &self,
        stream: &str,
        run_id: Uuid,
        progress: &ProgressUpdate,
    ) -> Result<()> {
        let now = now();
        let update = ActiveModel {
            current_page: Set(to_i32(progress.current_page)),
            resume_page: Set(to_i32(progress.resume_page)),
            records_processed: Set(to_i64(progress.records_processed)),
            failed_pages: Set(to_i32(progress.failed_pages)),
            consecutive_empty_pages: Set(to_i32(progress.consecutive_empty_pages)),
            last_activity_at: Set(Some(now)),
            updated_at: Set(now),
            ..Default::default()
        };
        self.transition(stream, run_id, update).await
    }

    /// Move a live run to `completed`.
    ///
    /// A run whose discovered (not estimated) total is known and that processed
    /// less than `completeness_threshold` of it is flagged `incomplete` with a
    /// diagnostic message.
    pub async fn complete_run(
        &self,
        stream: &str,
        run_id: Uuid,
        completeness_threshold: f64,
    ) -> Result<Model> {
        let current = self.require(stream).await?;
        let shortfall = match (current.total_is_estimate, current.total_records) {
            (false, Some(total)) if total > 0 => {
                let ratio = current.records_processed as f64 / total as f64;
                (ratio < completeness_threshold).then(|| {
                    format!(
                        "Processed {} of {} records ({:.1}%), below the {:.0}% completeness threshold",
                        current.records_processed,
                        total,
                        ratio * 100.0,
                        completeness_threshold * 100.0
                    )
                })
            }
            _ => None,
        };

        let now = now();
        let incomplete = shortfall.is_some();
        let error_category = incomplete.then_some(ErrorCategory::PartialData);
        let update = ActiveModel {
            status: Set(SyncRunStatus::Completed),
            finished_at: Set(Some(now)),
            last_activity_at: Set(Some(now)),
            incomplete: Set(incomplete),
            error_message: Set(shortfall.clone()),
            error_category: Set(error_category),
            updated_at: Set(now),
            ..Default::default()
        };
        self.transition(stream, run_id, update).await?;

        if let Some(message) = &shortfall {
            tracing::warn!(stream, %run_id, "{message}");
        }
        Ok(Model {
            status: SyncRunStatus::Completed,
            finished_at: Some(now),
            last_activity_at: Some(now),
            incomplete,
            error_message: shortfall,
            error_category,
            updated_at: now,
            ..current
        })
    }

    /// Move a live run to `failed`.
    pub async fn fail_run(
        &self,
        stream: &str,
        run_id: Uuid,
        category: ErrorCategory,
        message: &str,
    ) -> Result<()> {
        let now = now();
        let update = ActiveModel {
            status: Set(SyncRunStatus::Failed),
            finished_at: Set(Some(now)),
            error_message: Set(Some(message.to_string())),
            error_category: Set(Some(category)),
            updated_at: Set(now),
            ..Default::default()
        };
        self.transition(stream, run_id, update).await?;
        tracing::warn!(stream, %run_id, %category, "Sync run failed: {message}");
        Ok(())
    }

    /// Operator reset: force-fail whatever run currently owns `stream`.
    ///
    /// # Errors
    /// `SyncError::NotRunning` if the stream has no live run.
    pub async fn reset(&self, stream: &str, reason: &str) -> Result<Model> {
        let current = self.get(stream).await?;
        let run_id = match current {
            Some(Model {
                status: SyncRunStatus::Running,
                run_id: Some(run_id),
                ..
            }) => run_id,
            _ => {
                return Err(SyncError::NotRunning {
                    stream: stream.to_string(),
                });
            }
        };
        match self
            .fail_run(stream, run_id, ErrorCategory::Cancelled, reason)
            .await
        {
            // Finished between the read and the write.
            Err(SyncError::Superseded { .. }) => {
                return Err(SyncError::NotRunning {
                    stream: stream.to_string(),
                });
            }
            other => other?,
        }
        self.require(stream).await
    }

    /// Whether `run_id` still owns `stream` as a live run.
    pub async fn owns(&self, stream: &str, run_id: Uuid) -> Result<bool> {
        Ok(self
            .get(stream)
            .await?
            .is_some_and(|row| row.is_running() && row.run_id == Some(run_id)))
    }
}
