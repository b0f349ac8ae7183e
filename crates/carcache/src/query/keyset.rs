//! Keyset pagination over `car_listings`.
//!
//! Ordering is `field {ASC|DESC} NULLS LAST, id ASC`, a total order, so
//! following `next_cursor` to exhaustion yields every matching row exactly
//! once even while rows are inserted or removed between requests.

use sea_orm::{
    ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect,
    sea_query::NullOrdering,
};
use serde::Serialize;

use crate::entity::car_listing::{Column, Entity as CarListing, Model};

use super::cursor::Cursor;
use super::errors::Result;
use super::filter::CarFilter;
use super::sort::SortKey;

/// Page size when the caller gives none.
pub const DEFAULT_LIMIT: u64 = 24;

/// Largest page size served.
pub const MAX_LIMIT: u64 = 200;

/// Clamp a requested page size into [1, 200].
#[inline]
pub fn clamp_limit(limit: Option<u64>) -> u64 {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

/// One page of listings.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CarPage {
    pub items: Vec<Model>,
    pub next_cursor: Option<String>,
    /// Rows matching the filter across all pages.
    pub total: u64,
    pub has_next: bool,
}

/// Fetch one page.
///
/// `cursor = None` starts at the global extreme of the filtered set.
///
/// # Errors
/// - `InvalidCursor` for an undecodable cursor
/// - `CursorMismatch` for a cursor issued under another sort or filter set
/// - `InvalidFilter` for inconsistent ranges
pub async fn page<C: ConnectionTrait>(
    db: &C,
    filter: &CarFilter,
    sort: SortKey,
    cursor: Option<&str>,
    limit: Option<u64>,
) -> Result<CarPage> {
    filter.check()?;
    let limit = clamp_limit(limit);
    let fingerprint = filter.fingerprint();
    let condition = filter.condition();

    let mut query = CarListing::find().filter(condition.clone());
    if let Some(token) = cursor {
        let cursor = Cursor::decode(token)?;
        cursor.ensure_matches(sort, &fingerprint)?;
        query = query.filter(sort.after(&cursor.value, cursor.id)?);
    }

    let total = CarListing::find().filter(condition).count(db).await?;
    let mut items = query
        .order_by_with_nulls(sort.field.column(), sort.direction.order(), NullOrdering::Last)
        .order_by_asc(Column::Id)
        .limit(limit + 1)
        .all(db)
        .await?;

    let has_next = items.len() as u64 > limit;
    items.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
    let next_cursor = match items.last() {
        Some(last) if has_next => Some(Cursor::after_row(sort, &fingerprint, last).encode()?),
        _ => None,
    };

    tracing::debug!(%sort, limit, total, returned = items.len(), has_next, "Served catalog page");
    Ok(CarPage {
        items,
        next_cursor,
        total,
        has_next,
    })
}
