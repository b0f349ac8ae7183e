//! Merge step: staging rows of one run into `car_listings`.
//!
//! Idempotent. Rows are upserted on `(source_site, external_id)` only when
//! their content hash changed or the cached row is archived, and a full sync
//! archives open listings of the same source that the run never saw.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, FixedOffset, Utc};
use sea_orm::{
    ColumnTrait, Condition, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, QuerySelect,
    QueryTrait, Set,
    sea_query::{Alias, Expr, OnConflict},
};
use serde::Serialize;
use uuid::Uuid;

use crate::entity::car_listing::{ActiveModel, Column, Entity as CarListing};
use crate::entity::sale_status::SaleStatus;
use crate::entity::staged_listing::{self, Entity as StagedListing};
use crate::entity::sync_run_status::SyncType;

use super::errors::{RepositoryError, Result};

/// Staged rows read per keyset chunk.
pub const MERGE_CHUNK_SIZE: u64 = 500;

/// Rows per upsert statement.
const UPSERT_CHUNK: usize = 200;

/// Counts from one merge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    pub run_id: Uuid,
    pub staged: u64,
    pub inserted: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub archived: u64,
}

/// Options for [`merge_run`].
#[derive(Debug, Clone)]
pub struct MergeOptions {
    pub source_site: String,
    pub sync_type: SyncType,
    /// Archive open listings absent from the run. Only honoured for full syncs.
    pub archive_missing: bool,
    pub chunk_size: u64,
}

impl MergeOptions {
    pub fn new(source_site: impl Into<String>, sync_type: SyncType) -> Self {
        Self {
            source_site: source_site.into(),
            sync_type,
            archive_missing: sync_type == SyncType::Full,
            chunk_size: MERGE_CHUNK_SIZE,
        }
    }

    /// Disable archiving (used when the run finished incomplete).
    #[must_use]
    pub fn without_archive(mut self) -> Self {
        self.archive_missing = false;
        self
    }
}

/// Per-run single-writer locks for the merge step.
#[derive(Debug, Clone, Default)]
pub struct MergeLocks {
    held: Arc<Mutex<HashSet<Uuid>>>,
}

/// Releases the run's merge lock on drop.
#[derive(Debug)]
pub struct MergeGuard {
    held: Arc<Mutex<HashSet<Uuid>>>,
    run_id: Uuid,
}

impl MergeLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock for `run_id` without waiting.
    ///
    /// # Errors
    /// `RepositoryError::MergeInProgress` if another merge holds it.
    pub fn try_lock(&self, run_id: Uuid) -> Result<MergeGuard> {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        if !held.insert(run_id) {
            return Err(RepositoryError::MergeInProgress { run_id });
        }
        Ok(MergeGuard {
            held: Arc::clone(&self.held),
            run_id,
        })
    }

    pub fn is_locked(&self, run_id: Uuid) -> bool {
        self.held
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&run_id)
    }
}

impl Drop for MergeGuard {
    fn drop(&mut self) {
        self.held
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.run_id);
    }
}

/// Build the ON CONFLICT clause used by the merge upsert.
///
/// `created_at` is never overwritten. The update only fires when the content
/// hash differs or an archived listing reappears.
pub(crate) fn build_merge_on_conflict() -> OnConflict {
    let excluded = Alias::new("excluded");
    OnConflict::columns([Column::SourceSite, Column::ExternalId])
        .update_columns([
            Column::Make,
            Column::Model,
            Column::Year,
            Column::PriceCents,
            Column::MileageKm,
            Column::Fuel,
            Column::Transmission,
            Column::Color,
            Column::BodyType,
            Column::Images,
            Column::SaleStatus,
            Column::RankScore,
            Column::RawExtra,
            Column::DataHash,
            Column::LastApiSync,
            Column::UpdatedAt,
        ])
        .action_and_where(
            Condition::any()
                .add(
                    Expr::col((CarListing, Column::DataHash))
                        .ne(Expr::col((excluded.clone(), Column::DataHash))),
                )
                .add(
                    Condition::all()
                        .add(Expr::col((CarListing, Column::SaleStatus)).eq(SaleStatus::Archived))
                        .add(Expr::col((excluded, Column::SaleStatus)).ne(SaleStatus::Archived)),
                )
                .into(),
        )
        .to_owned()
}

fn to_car_listing(row: staged_listing::Model, now: DateTime<FixedOffset>) -> ActiveModel {
    ActiveModel {
        id: Set(row.listing_id),
        external_id: Set(row.external_id),
        source_site: Set(row.source_site),
        make: Set(row.make),
        model: Set(row.model),
        year: Set(row.year),
        price_cents: Set(row.price_cents),
        mileage_km: Set(row.mileage_km),
        fuel: Set(row.fuel),
        transmission: Set(row.transmission),
        color: Set(row.color),
        body_type: Set(row.body_type),
        images: Set(row.images),
        sale_status: Set(row.sale_status),
        rank_score: Set(row.rank_score),
        raw_extra: Set(row.raw_extra),
        data_hash: Set(row.data_hash),
        last_api_sync: Set(now),
        created_at: Set(now),
        updated_at: Set(now),
    }
}

enum Disposition {
    Insert,
    Update,
    Unchanged,
}

fn classify(row: &staged_listing::Model, existing: Option<&(String, SaleStatus)>) -> Disposition {
    match existing {
        None => Disposition::Insert,
        Some((hash, status)) => {
            let revived = *status == SaleStatus::Archived && row.sale_status != SaleStatus::Archived;
            if *hash != row.data_hash || revived {
                Disposition::Update
            } else {
                Disposition::Unchanged
            }
        }
    }
}

async fn upsert_listings<C: ConnectionTrait>(db: &C, mut models: Vec<ActiveModel>) -> Result<()> {
    while !models.is_empty() {
        let rest = models.split_off(models.len().min(UPSERT_CHUNK));
        CarListing::insert_many(models)
            .on_conflict(build_merge_on_conflict())
            .exec_without_returning(db)
            .await?;
        models = rest;
    }
    Ok(())
}

/// Stamp `last_api_sync` on listings the run saw with unchanged content.
async fn touch_listings<C: ConnectionTrait>(
    db: &C,
    ids: Vec<Uuid>,
    now: DateTime<FixedOffset>,
) -> Result<u64> {
    if ids.is_empty() {
        return Ok(0);
    }
    let result = CarListing::update_many()
        .col_expr(Column::LastApiSync, Expr::value(now))
        .filter(Column::Id.is_in(ids))
        .exec(db)
        .await?;
    Ok(result.rows_affected)
}

/// Archive open listings of `source_site` that the run did not stage.
async fn archive_missing<C: ConnectionTrait>(
    db: &C,
    run_id: Uuid,
    source_site: &str,
    now: DateTime<FixedOffset>,
) -> Result<u64> {
    let seen = StagedListing::find()
        .select_only()
        .column(staged_listing::Column::ListingId)
        .filter(staged_listing::Column::RunId.eq(run_id))
        .into_query();

    let result = CarListing::update_many()
        .col_expr(Column::SaleStatus, Expr::value(SaleStatus::Archived))
        .col_expr(Column::UpdatedAt, Expr::value(now))
        .filter(Column::SourceSite.eq(source_site))
        .filter(Column::SaleStatus.is_in([SaleStatus::Active, SaleStatus::Pending]))
        .filter(Column::Id.not_in_subquery(seen))
        .exec(db)
        .await?;
    Ok(result.rows_affected)
}

/// Merge a run's staged rows into the cache.
///
/// # Errors
/// `MergeInProgress` when the run is already being merged, or any database
/// error. A failed merge can be re-run; it converges to the same state.
#[tracing::instrument(skip(db, locks, options), fields(source = %options.source_site))]
pub async fn merge_run<C: ConnectionTrait>(
    db: &C,
    locks: &MergeLocks,
    run_id: Uuid,
    options: &MergeOptions,
) -> Result<MergeReport> {
    let _guard = locks.try_lock(run_id)?;
    let now = Utc::now().fixed_offset();
    let chunk_size = options.chunk_size.max(1);
    let mut report = MergeReport {
        run_id,
        ..MergeReport::default()
    };
    let mut after: Option<Uuid> = None;

    loop {
        let mut query = StagedListing::find()
            .filter(staged_listing::Column::RunId.eq(run_id))
            .order_by_asc(staged_listing::Column::Id)
            .limit(chunk_size);
        if let Some(last) = after {
            query = query.filter(staged_listing::Column::Id.gt(last));
        }
        let chunk = query.all(db).await?;
        let Some(last) = chunk.last() else {
            break;
        };
        after = Some(last.id);
        report.staged += chunk.len() as u64;

        let ids: Vec<Uuid> = chunk.iter().map(|row| row.listing_id).collect();
        let existing: HashMap<Uuid, (String, SaleStatus)> = CarListing::find()
            .select_only()
            .column(Column::Id)
            .column(Column::DataHash)
            .column(Column::SaleStatus)
            .filter(Column::Id.is_in(ids))
            .into_tuple::<(Uuid, String, SaleStatus)>()
            .all(db)
            .await?
            .into_iter()
            .map(|(id, hash, status)| (id, (hash, status)))
            .collect();

        let mut changed = Vec::new();
        let mut seen_unchanged = Vec::new();
        for row in chunk {
            match classify(&row, existing.get(&row.listing_id)) {
                Disposition::Insert => report.inserted += 1,
                Disposition::Update => report.updated += 1,
                Disposition::Unchanged => {
                    report.unchanged += 1;
                    seen_unchanged.push(row.listing_id);
                    continue;
                }
            }
            changed.push(to_car_listing(row, now));
        }
        upsert_listings(db, changed).await?;
        touch_listings(db, seen_unchanged, now).await?;
    }

    if options.archive_missing && options.sync_type == SyncType::Full {
        if report.staged == 0 {
            tracing::warn!(%run_id, "Run staged nothing; skipping archive step");
        } else {
            report.archived = archive_missing(db, run_id, &options.source_site, now).await?;
        }
    }

    tracing::info!(
        %run_id,
        staged = report.staged,
        inserted = report.inserted,
        updated = report.updated,
        unchanged = report.unchanged,
        archived = report.archived,
        "Merge complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{DatabaseBackend, MockDatabase};

    fn staged(hash: &str, status: SaleStatus) -> staged_listing::Model {
        let now = Utc::now().fixed_offset();
        staged_listing::Model {
            id: Uuid::new_v4(),
            run_id: Uuid::nil(),
            listing_id: Uuid::new_v4(),
            external_id: "1".to_string(),
            source_site: "copart".to_string(),
            make: "Ford".to_string(),
            model: "Focus".to_string(),
            year: None,
            price_cents: None,
            mileage_km: None,
            fuel: None,
            transmission: None,
            color: None,
            body_type: None,
            images: serde_json::json!([]),
            sale_status: status,
            rank_score: 0,
            raw_extra: serde_json::json!({}),
            data_hash: hash.to_string(),
            page: 1,
            staged_at: now,
        }
    }

    #[test]
    fn test_classify() {
        let row = staged("h1", SaleStatus::Active);
        assert!(matches!(classify(&row, None), Disposition::Insert));
        assert!(matches!(
            classify(&row, Some(&("h1".to_string(), SaleStatus::Active))),
            Disposition::Unchanged
        ));
        assert!(matches!(
            classify(&row, Some(&("h0".to_string(), SaleStatus::Active))),
            Disposition::Update
        ));
        assert!(matches!(
            classify(&row, Some(&("h1".to_string(), SaleStatus::Archived))),
            Disposition::Update
        ));
        let gone = staged("h1", SaleStatus::Archived);
        assert!(matches!(
            classify(&gone, Some(&("h1".to_string(), SaleStatus::Archived))),
            Disposition::Unchanged
        ));
    }

    #[test]
    fn test_merge_locks_are_exclusive_per_run() {
        let locks = MergeLocks::new();
        let run = Uuid::new_v4();
        let guard = locks.try_lock(run).expect("first lock");
        assert!(matches!(
            locks.try_lock(run),
            Err(RepositoryError::MergeInProgress { .. })
        ));
        assert!(locks.try_lock(Uuid::new_v4()).is_ok());
        drop(guard);
        assert!(!locks.is_locked(run));
        assert!(locks.try_lock(run).is_ok());
    }

    #[test]
    fn test_merge_on_conflict_sql() {
        let sql = CarListing::insert(to_car_listing(
            staged("h", SaleStatus::Active),
            Utc::now().fixed_offset(),
        ))
        .on_conflict(build_merge_on_conflict())
        .build(DatabaseBackend::Sqlite)
        .to_string();

        assert!(sql.contains(r#"ON CONFLICT ("source_site", "external_id") DO UPDATE SET"#));
        assert!(sql.contains(r#""data_hash" <> "excluded"."data_hash""#));
        assert!(!sql.contains(r#""created_at" = "excluded"."created_at""#));
    }

    #[tokio::test]
    async fn test_merge_of_empty_run_skips_archive() {
        // One empty chunk query; the archive UPDATE must not be issued.
        let db = MockDatabase::new(DatabaseBackend::Sqlite)
            .append_query_results([Vec::<staged_listing::Model>::new()])
            .into_connection();

        let report = merge_run(
            &db,
            &MergeLocks::new(),
            Uuid::new_v4(),
            &MergeOptions::new("copart", SyncType::Full),
        )
        .await
        .expect("merge");

        assert_eq!(report.staged, 0);
        assert_eq!(report.archived, 0);
        assert_eq!(db.into_transaction_log().len(), 1);
    }

    #[tokio::test]
    async fn test_merge_rejects_concurrent_merge_of_same_run() {
        let db = MockDatabase::new(DatabaseBackend::Sqlite).into_connection();
        let locks = MergeLocks::new();
        let run = Uuid::new_v4();
        let _held = locks.try_lock(run).unwrap();

        let err = merge_run(&db, &locks, run, &MergeOptions::new("copart", SyncType::Full))
            .await
            .expect_err("locked");
        assert!(matches!(err, RepositoryError::MergeInProgress { .. }));
    }
}
