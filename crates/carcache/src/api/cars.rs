use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use uuid::Uuid;

use crate::entity::car_listing::Model;
use crate::query::{self, CarFilter, CarPage, FacetCounts, SortKey, facet_counts};
use crate::repository::find_by_id;

use super::AppState;
use super::errors::ApiError;

/// Query string for `GET /cars` and `GET /cars/facets`.
///
/// Fields are spelled out rather than flattening [`CarFilter`]: urlencoded
/// values are all strings, and numeric fields only parse at the top level.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CatalogQuery {
    pub make: Option<String>,
    pub model: Option<String>,
    pub year_min: Option<i32>,
    pub year_max: Option<i32>,
    pub price_min: Option<i64>,
    pub price_max: Option<i64>,
    pub mileage_max: Option<i64>,
    pub fuel: Option<String>,
    pub transmission: Option<String>,
    pub body_type: Option<String>,
    pub color: Option<String>,
    pub q: Option<String>,
    pub include_inactive: Option<bool>,
    /// `<field>_<asc|desc>`.
    pub sort: Option<String>,
    pub cursor: Option<String>,
    pub limit: Option<u64>,
}

impl CatalogQuery {
    /// The validated filter set.
    pub fn filter(&self) -> Result<CarFilter, ApiError> {
        let filter = CarFilter {
            make: self.make.clone(),
            model: self.model.clone(),
            year_min: self.year_min,
            year_max: self.year_max,
            price_min: self.price_min,
            price_max: self.price_max,
            mileage_max: self.mileage_max,
            fuel: self.fuel.clone(),
            transmission: self.transmission.clone(),
            body_type: self.body_type.clone(),
            color: self.color.clone(),
            query: self.q.clone(),
            include_inactive: self.include_inactive.unwrap_or(false),
        };
        Ok(filter.validated()?)
    }

    pub fn sort_key(&self) -> Result<SortKey, ApiError> {
        match self.sort.as_deref().map(str::trim) {
            None | Some("") => Ok(SortKey::default()),
            Some(raw) => Ok(raw.parse()?),
        }
    }
}

/// `GET /cars`
pub async fn list_cars(
    State(state): State<AppState>,
    Query(params): Query<CatalogQuery>,
) -> Result<Json<CarPage>, ApiError> {
    let filter = params.filter()?;
    let sort = params.sort_key()?;
    let page = query::page(
        state.db.as_ref(),
        &filter,
        sort,
        params.cursor.as_deref().filter(|c| !c.is_empty()),
        params.limit,
    )
    .await?;
    tracing::debug!(%sort, items = page.items.len(), total = page.total, "Served catalog page");
    Ok(Json(page))
}

/// `GET /cars/facets`
pub async fn list_facets(
    State(state): State<AppState>,
    Query(params): Query<CatalogQuery>,
) -> Result<Json<FacetCounts>, ApiError> {
    let filter = params.filter()?;
    Ok(Json(facet_counts(state.db.as_ref(), &filter).await?))
}

/// `GET /cars/{id}`
pub async fn get_car(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Model>, ApiError> {
    Ok(Json(find_by_id(state.db.as_ref(), id).await?))
}
