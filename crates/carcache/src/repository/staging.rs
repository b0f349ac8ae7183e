//! Staging writer.
//!
//! Rows are keyed by `(run_id, external_id)`. Re-staging the same page
//! overwrites instead of duplicating, and nothing here deletes rows except
//! the explicit purge functions.

use chrono::{DateTime, Utc};
use sea_orm::{
    ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter, sea_query::OnConflict,
};
use uuid::Uuid;

use crate::entity::staged_listing::{ActiveModel, Column, Entity as StagedListing};
use crate::mapping::MappedListing;

use super::errors::{RepositoryError, Result};

/// Default number of retry attempts for staging writes.
pub const DEFAULT_STAGE_RETRIES: u32 = 3;

/// Default initial backoff delay in milliseconds for staging retries.
pub const DEFAULT_STAGE_BACKOFF_MS: u64 = 100;

/// Rows per INSERT statement; keeps SQLite under its bound-parameter limit.
const STAGE_CHUNK: usize = 200;

pub(crate) fn build_stage_on_conflict() -> OnConflict {
    OnConflict::columns([Column::RunId, Column::ExternalId])
        .update_columns([
            Column::ListingId,
            Column::SourceSite,
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
            Column::Page,
            Column::StagedAt,
        ])
        .to_owned()
}

async fn stage_models<C: ConnectionTrait>(db: &C, models: Vec<ActiveModel>) -> Result<u64> {
    let mut written = 0;
    let mut models = models;
    while !models.is_empty() {
        let rest = models.split_off(models.len().min(STAGE_CHUNK));
        written += StagedListing::insert_many(models)
            .on_conflict(build_stage_on_conflict())
            .exec_without_returning(db)
            .await?;
        models = rest;
    }
    Ok(written)
}

/// Upsert one page of mapped listings into staging.
///
/// Returns the number of rows written.
pub async fn stage_listings<C: ConnectionTrait>(
    db: &C,
    run_id: Uuid,
    page: u32,
    listings: &[MappedListing],
) -> Result<u64> {
    if listings.is_empty() {
        return Ok(0);
    }
    let staged_at = Utc::now().fixed_offset();
    let models = listings
        .iter()
        .map(|listing| listing.to_staged(run_id, page, staged_at))
        .collect();
    stage_models(db, models).await
}

/// [`stage_listings`] with retry on transient database errors.
///
/// `initial_backoff_ms` doubles after each failed attempt.
pub async fn stage_listings_with_retry<C: ConnectionTrait>(
    db: &C,
    run_id: Uuid,
    page: u32,
    listings: &[MappedListing],
    max_retries: u32,
    initial_backoff_ms: u64,
) -> Result<u64> {
    let mut backoff_ms = initial_backoff_ms;
    let mut attempt = 0;
    loop {
        match stage_listings(db, run_id, page, listings).await {
            Ok(count) => return Ok(count),
            Err(e) if e.is_retryable() && attempt < max_retries => {
                attempt += 1;
                tracing::warn!(
                    page,
                    attempt,
                    max_retries,
                    backoff_ms,
                    error = %e,
                    "Staging write failed, retrying..."
                );
                tokio::time::sleep(tokio::time::Duration::from_millis(backoff_ms)).await;
                backoff_ms = backoff_ms.saturating_mul(2);
            }
            Err(e) => return Err(e),
        }
    }
}

/// Number of staged rows for a run.
pub async fn count_staged<C: ConnectionTrait>(db: &C, run_id: Uuid) -> Result<u64> {
    StagedListing::find()
        .filter(Column::RunId.eq(run_id))
        .count(db)
        .await
        .map_err(RepositoryError::from)
}

/// Number of staged rows for a run that came from pages before `page`.
///
/// A resumed run starts its record count from this, so pages it re-fetches
/// are not counted twice.
pub async fn count_staged_before<C: ConnectionTrait>(db: &C, run_id: Uuid, page: u32) -> Result<u64> {
    StagedListing::find()
        .filter(Column::RunId.eq(run_id))
        .filter(Column::Page.lt(i32::try_from(page).unwrap_or(i32::MAX)))
        .count(db)
        .await
        .map_err(RepositoryError::from)
}

/// Delete a run's staging rows.
pub async fn purge_run<C: ConnectionTrait>(db: &C, run_id: Uuid) -> Result<u64> {
    let result = StagedListing::delete_many()
        .filter(Column::RunId.eq(run_id))
        .exec(db)
        .await?;
    Ok(result.rows_affected)
}

/// Retention sweep: delete staging rows staged before `cutoff`.
///
/// Rows belonging to `keep_run` (typically the stream's current run) are kept
/// regardless of age.
pub async fn purge_older_than<C: ConnectionTrait>(
    db: &C,
    cutoff: DateTime<Utc>,
    keep_run: Option<Uuid>,
) -> Result<u64> {
    let mut delete = StagedListing::delete_many().filter(Column::StagedAt.lt(cutoff.fixed_offset()));
    if let Some(run_id) = keep_run {
        delete = delete.filter(Column::RunId.ne(run_id));
    }
    let result = delete.exec(db).await?;
    Ok(result.rows_affected)
}
