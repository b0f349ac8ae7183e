//! Single-listing reads and cache statistics.

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset};
use sea_orm::{
    ConnectionTrait, EntityTrait, QuerySelect,
    sea_query::{Expr, Func},
};
use serde::Serialize;
use uuid::Uuid;

use crate::entity::car_listing::{Column, Entity as CarListing, Model};
use crate::entity::sale_status::SaleStatus;

use super::errors::{RepositoryError, Result};

/// Look up one listing by its stable id.
///
/// # Errors
/// `RepositoryError::NotFound` if no listing has this id.
pub async fn find_by_id<C: ConnectionTrait>(db: &C, id: Uuid) -> Result<Model> {
    CarListing::find_by_id(id)
        .one(db)
        .await?
        .ok_or_else(|| RepositoryError::not_found_by_id(id))
}

/// Row counts of the served cache.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub total: u64,
    pub by_status: BTreeMap<String, u64>,
    /// Most recent `last_api_sync` across all listings.
    pub last_api_sync: Option<DateTime<FixedOffset>>,
}

impl CacheStats {
    /// Listings served by default (active or pending).
    pub fn open(&self) -> u64 {
        [SaleStatus::Active, SaleStatus::Pending]
            .iter()
            .filter_map(|status| self.by_status.get(&status.to_string()))
            .sum()
    }
}

/// Count cached listings per sale status.
pub async fn cache_stats<C: ConnectionTrait>(db: &C) -> Result<CacheStats> {
    let rows: Vec<(SaleStatus, i64)> = CarListing::find()
        .select_only()
        .column(Column::SaleStatus)
        .column_as(Expr::col(Column::Id).count(), "count")
        .group_by(Column::SaleStatus)
        .into_tuple()
        .all(db)
        .await?;

    let last_api_sync: Option<Option<DateTime<FixedOffset>>> = CarListing::find()
        .select_only()
        .column_as(
            Expr::expr(Func::max(Expr::col(Column::LastApiSync))),
            "last_api_sync",
        )
        .into_tuple()
        .one(db)
        .await?;

    let mut stats = CacheStats {
        last_api_sync: last_api_sync.flatten(),
        ..CacheStats::default()
    };
    for (status, count) in rows {
        let count = count.max(0) as u64;
        stats.total += count;
        stats.by_status.insert(status.to_string(), count);
    }
    Ok(stats)
}
