//! Sort key whitelist and keyset predicates.

use sea_orm::{ColumnTrait, Condition, Value, sea_query::Order};
use uuid::Uuid;

use crate::entity::car_listing::{Column, Model};

use super::cursor::SortValue;
use super::errors::{QueryError, Result};

/// Sortable fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortField {
    Price,
    Year,
    Mileage,
    Make,
    CreatedAt,
    Rank,
}

impl SortField {
    pub const ALL: [SortField; 6] = [
        SortField::Price,
        SortField::Year,
        SortField::Mileage,
        SortField::Make,
        SortField::CreatedAt,
        SortField::Rank,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SortField::Price => "price",
            SortField::Year => "year",
            SortField::Mileage => "mileage",
            SortField::Make => "make",
            SortField::CreatedAt => "created_at",
            SortField::Rank => "rank",
        }
    }

    pub fn column(self) -> Column {
        match self {
            SortField::Price => Column::PriceCents,
            SortField::Year => Column::Year,
            SortField::Mileage => Column::MileageKm,
            SortField::Make => Column::Make,
            SortField::CreatedAt => Column::CreatedAt,
            SortField::Rank => Column::RankScore,
        }
    }

    /// The row's value for this field.
    pub fn value_of(self, row: &Model) -> SortValue {
        match self {
            SortField::Price => row.price_cents.map_or(SortValue::Null, SortValue::Int),
            SortField::Year => row.year.map_or(SortValue::Null, |y| SortValue::Int(i64::from(y))),
            SortField::Mileage => row.mileage_km.map_or(SortValue::Null, SortValue::Int),
            SortField::Make => SortValue::Text(row.make.clone()),
            SortField::CreatedAt => SortValue::Time(row.created_at),
            SortField::Rank => SortValue::Int(i64::from(row.rank_score)),
        }
    }

    /// Bind a cursor value, rejecting values of the wrong type.
    fn bind(self, value: &SortValue) -> Result<Value> {
        match (self, value) {
            (SortField::Price | SortField::Year | SortField::Mileage | SortField::Rank, SortValue::Int(v)) => {
                Ok((*v).into())
            }
            (SortField::Make, SortValue::Text(v)) => Ok(v.clone().into()),
            (SortField::CreatedAt, SortValue::Time(v)) => Ok((*v).into()),
            _ => Err(QueryError::invalid_cursor(format!(
                "value does not fit sort field '{}'",
                self.as_str()
            ))),
        }
    }
}

impl std::str::FromStr for SortField {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self> {
        SortField::ALL
            .into_iter()
            .find(|field| field.as_str() == s)
            .ok_or_else(|| QueryError::UnknownSort {
                value: s.to_string(),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn order(self) -> Order {
        match self {
            SortDirection::Asc => Order::Asc,
            SortDirection::Desc => Order::Desc,
        }
    }
}

/// A field plus direction, written `<field>_<asc|desc>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SortKey {
    pub field: SortField,
    pub direction: SortDirection,
}

impl Default for SortKey {
    /// Catalog default: best-ranked first.
    fn default() -> Self {
        Self {
            field: SortField::Rank,
            direction: SortDirection::Desc,
        }
    }
}

impl std::fmt::Display for SortKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let direction = match self.direction {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        };
        write!(f, "{}_{}", self.field.as_str(), direction)
    }
}

impl std::str::FromStr for SortKey {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self> {
        let unknown = || QueryError::UnknownSort {
            value: s.to_string(),
        };
        let (field, direction) = s.rsplit_once('_').ok_or_else(unknown)?;
        let direction = match direction {
            "asc" => SortDirection::Asc,
            "desc" => SortDirection::Desc,
            _ => return Err(unknown()),
        };
        let field = field.parse::<SortField>().map_err(|_| unknown())?;
        Ok(Self { field, direction })
    }
}

impl SortKey {
    pub fn new(field: SortField, direction: SortDirection) -> Self {
        Self { field, direction }
    }

    /// Rows strictly after `(value, id)` in `field {dir} NULLS LAST, id ASC` order.
    ///
    /// # Errors
    /// `QueryError::InvalidCursor` when `value` has the wrong type for the field.
    pub fn after(&self, value: &SortValue, id: Uuid) -> Result<Condition> {
        let column = self.field.column();
        let past_id = Column::Id.gt(id);

        if *value == SortValue::Null {
            return Ok(Condition::all().add(column.is_null()).add(past_id));
        }

        let bound = self.field.bind(value)?;
        let beyond = match self.direction {
            SortDirection::Asc => column.gt(bound.clone()),
            SortDirection::Desc => column.lt(bound.clone()),
        };
        Ok(Condition::any()
            .add(beyond)
            .add(Condition::all().add(column.eq(bound)).add(past_id))
            .add(column.is_null()))
    }
}
