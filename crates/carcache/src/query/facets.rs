//! Facet counts for catalog filters.

use std::collections::BTreeMap;

use sea_orm::{
    ConnectionTrait, EntityTrait, QueryFilter, QuerySelect,
    sea_query::{Expr, Func},
};
use serde::Serialize;

use crate::entity::car_listing::{Column, Entity as CarListing};

use super::errors::Result;
use super::filter::{CarFilter, lower};

/// Fields with value counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FacetField {
    Make,
    Fuel,
    Transmission,
    BodyType,
    Color,
}

impl FacetField {
    pub const ALL: [FacetField; 5] = [
        FacetField::Make,
        FacetField::Fuel,
        FacetField::Transmission,
        FacetField::BodyType,
        FacetField::Color,
    ];

    pub fn column(self) -> Column {
        match self {
            FacetField::Make => Column::Make,
            FacetField::Fuel => Column::Fuel,
            FacetField::Transmission => Column::Transmission,
            FacetField::BodyType => Column::BodyType,
            FacetField::Color => Column::Color,
        }
    }
}

/// `{field: {value: count}}`.
pub type FacetCounts = BTreeMap<FacetField, BTreeMap<String, u64>>;

/// Count listings per value of each facet field.
///
/// Each facet ignores its own clause of `filter`, so choosing one value still
/// shows the counts of its siblings. Values are bucketed case-insensitively,
/// like the filter matches them; a bucket is labelled with one of its stored
/// spellings. Null and empty values are omitted.
pub async fn facet_counts<C: ConnectionTrait>(db: &C, filter: &CarFilter) -> Result<FacetCounts> {
    filter.check()?;
    let mut counts = FacetCounts::new();

    for field in FacetField::ALL {
        let rows: Vec<(Option<String>, i64)> = CarListing::find()
            .select_only()
            .column_as(Expr::expr(Func::max(Expr::col(field.column()))), "value")
            .column_as(Expr::col(Column::Id).count(), "count")
            .filter(filter.condition_without(Some(field)))
            .group_by(lower(field.column()))
            .into_tuple()
            .all(db)
            .await?;

        let values = rows
            .into_iter()
            .filter_map(|(value, count)| {
                let value = value.filter(|v| !v.trim().is_empty())?;
                u64::try_from(count).ok().filter(|c| *c > 0).map(|c| (value, c))
            })
            .collect();
        counts.insert(field, values);
    }
    Ok(counts)
}
