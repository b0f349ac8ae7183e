//! Typed catalog filters.

use sea_orm::{
    ColumnTrait, Condition,
    sea_query::{Expr, Func, LikeExpr},
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::entity::car_listing::Column;
use crate::entity::sale_status::SaleStatus;

use super::errors::{QueryError, Result};
use super::facets::FacetField;

/// Catalog filter set.
///
/// Build it from request parameters, then call [`validated`](Self::validated)
/// once; the result drives both the count and the page query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CarFilter {
    /// Case-insensitive equality.
    pub make: Option<String>,
    /// Case-insensitive equality.
    pub model: Option<String>,
    pub year_min: Option<i32>,
    pub year_max: Option<i32>,
    /// Cents.
    pub price_min: Option<i64>,
    /// Cents.
    pub price_max: Option<i64>,
    pub mileage_max: Option<i64>,
    pub fuel: Option<String>,
    pub transmission: Option<String>,
    pub body_type: Option<String>,
    pub color: Option<String>,
    /// Free text over make and model.
    #[serde(alias = "q")]
    pub query: Option<String>,
    /// Include sold and archived listings.
    pub include_inactive: bool,
}

fn normalize(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_lowercase())
        .filter(|v| !v.is_empty())
}

fn check_range<T: PartialOrd + Copy + std::fmt::Display>(
    name: &str,
    min: Option<T>,
    max: Option<T>,
) -> Result<()> {
    if let (Some(min), Some(max)) = (min, max)
        && min > max
    {
        return Err(QueryError::invalid_filter(format!(
            "{name}_min ({min}) is greater than {name}_max ({max})"
        )));
    }
    Ok(())
}

pub(super) fn lower(column: Column) -> Expr {
    Expr::expr(Func::lower(Expr::col(column)))
}

impl CarFilter {
    /// Normalize text values and reject inconsistent ranges.
    ///
    /// # Errors
    /// `QueryError::InvalidFilter` for a min above its max or a negative bound.
    pub fn validated(self) -> Result<Self> {
        let filter = Self {
            make: normalize(self.make),
            model: normalize(self.model),
            fuel: normalize(self.fuel),
            transmission: normalize(self.transmission),
            body_type: normalize(self.body_type),
            color: normalize(self.color),
            query: normalize(self.query),
            ..self
        };
        filter.check()?;
        Ok(filter)
    }

    /// Range checks only.
    pub fn check(&self) -> Result<()> {
        check_range("year", self.year_min, self.year_max)?;
        check_range("price", self.price_min, self.price_max)?;
        for (name, value) in [
            ("price_min", self.price_min),
            ("price_max", self.price_max),
            ("mileage_max", self.mileage_max),
        ] {
            if value.is_some_and(|v| v < 0) {
                return Err(QueryError::invalid_filter(format!("{name} must not be negative")));
            }
        }
        Ok(())
    }

    /// Stable digest of the filter set, embedded in cursors.
    pub fn fingerprint(&self) -> String {
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        let digest = Sha256::digest(&canonical);
        digest.iter().take(8).map(|b| format!("{b:02x}")).collect()
    }

    /// SQL condition for the whole filter set.
    pub fn condition(&self) -> Condition {
        self.condition_without(None)
    }

    /// SQL condition with one facet's own clause removed.
    pub fn condition_without(&self, skip: Option<FacetField>) -> Condition {
        let mut cond = Condition::all();

        if !self.include_inactive {
            cond = cond.add(Column::SaleStatus.is_in([SaleStatus::Active, SaleStatus::Pending]));
        }
        if let Some(make) = &self.make
            && skip != Some(FacetField::Make)
        {
            cond = cond.add(lower(Column::Make).eq(make.to_lowercase()));
        }
        if let Some(model) = &self.model {
            cond = cond.add(lower(Column::Model).eq(model.to_lowercase()));
        }
        if let Some(year_min) = self.year_min {
            cond = cond.add(Column::Year.gte(year_min));
        }
        if let Some(year_max) = self.year_max {
            cond = cond.add(Column::Year.lte(year_max));
        }
        if let Some(price_min) = self.price_min {
            cond = cond.add(Column::PriceCents.gte(price_min));
        }
        if let Some(price_max) = self.price_max {
            cond = cond.add(Column::PriceCents.lte(price_max));
        }
        if let Some(mileage_max) = self.mileage_max {
            cond = cond.add(Column::MileageKm.lte(mileage_max));
        }
        for (field, column, value) in [
            (FacetField::Fuel, Column::Fuel, &self.fuel),
            (FacetField::Transmission, Column::Transmission, &self.transmission),
            (FacetField::BodyType, Column::BodyType, &self.body_type),
            (FacetField::Color, Column::Color, &self.color),
        ] {
            if let Some(value) = value
                && skip != Some(field)
            {
                cond = cond.add(column.eq(value.to_lowercase()));
            }
        }
        if let Some(query) = &self.query {
            let escaped = query
                .to_lowercase()
                .replace('\\', "\\\\")
                .replace('%', "\\%")
                .replace('_', "\\_");
            let pattern = format!("%{escaped}%");
            cond = cond.add(
                Condition::any()
                    .add(lower(Column::Make).like(LikeExpr::new(pattern.clone()).escape('\\')))
                    .add(lower(Column::Model).like(LikeExpr::new(pattern).escape('\\'))),
            );
        }
        cond
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{DatabaseBackend, EntityTrait, QueryFilter, QueryTrait};

    use crate::entity::car_listing::Entity as CarListing;

    fn sql(filter: &CarFilter) -> String {
        CarListing::find()
            .filter(filter.condition())
            .build(DatabaseBackend::Sqlite)
            .to_string()
    }

    #[test]
    fn test_validated_normalizes_text() {
        let filter = CarFilter {
            make: Some("  Toyota ".into()),
            fuel: Some("".into()),
            ..CarFilter::default()
        }
        .validated()
        .unwrap();
        assert_eq!(filter.make.as_deref(), Some("toyota"));
        assert_eq!(filter.fuel, None);
    }

    #[test]
    fn test_inverted_ranges_are_rejected() {
        let err = CarFilter {
            year_min: Some(2020),
            year_max: Some(2010),
            ..CarFilter::default()
        }
        .validated()
        .expect_err("inverted");
        assert!(matches!(err, QueryError::InvalidFilter { .. }));

        assert!(
            CarFilter {
                price_min: Some(-1),
                ..CarFilter::default()
            }
            .validated()
            .is_err()
        );
    }

    #[test]
    fn test_default_hides_inactive() {
        let default_sql = sql(&CarFilter::default());
        assert!(default_sql.contains(r#""sale_status" IN ('active', 'pending')"#));

        let all = CarFilter {
            include_inactive: true,
            ..CarFilter::default()
        };
        assert!(!sql(&all).contains("sale_status"));
    }

    #[test]
    fn test_facet_clause_is_removed() {
        let filter = CarFilter {
            fuel: Some("diesel".into()),
            color: Some("red".into()),
            ..CarFilter::default()
        };
        let without_fuel = CarListing::find()
            .filter(filter.condition_without(Some(FacetField::Fuel)))
            .build(DatabaseBackend::Sqlite)
            .to_string();
        assert!(!without_fuel.contains("diesel"));
        assert!(without_fuel.contains("red"));
    }

    #[test]
    fn test_fingerprint_tracks_filters() {
        let a = CarFilter::default();
        let b = CarFilter {
            make: Some("bmw".into()),
            ..CarFilter::default()
        };
        assert_eq!(a.fingerprint(), CarFilter::default().fingerprint());
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 16);
    }
}
