//! CarListing entity - the served cache of vehicle listings.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::entity::sale_status::SaleStatus;

/// CarListing model - one listing as served by the read API.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "car_listings")]
pub struct Model {
    /// Stable internal UUID (v5 over source site and external id).
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    // ─── Source Identity ─────────────────────────────────────────────────────
    /// Identifier assigned by the remote auction feed.
    pub external_id: String,
    /// Source site the listing was scraped from (e.g. "copart").
    pub source_site: String,

    // ─── Vehicle ─────────────────────────────────────────────────────────────
    pub make: String,
    pub model: String,
    pub year: Option<i32>,
    /// Price in minor currency units.
    pub price_cents: Option<i64>,
    pub mileage_km: Option<i64>,
    pub fuel: Option<String>,
    pub transmission: Option<String>,
    pub color: Option<String>,
    pub body_type: Option<String>,
    /// Ordered image URLs (JSON array).
    #[sea_orm(column_type = "Json")]
    pub images: serde_json::Value,

    // ─── Lifecycle ───────────────────────────────────────────────────────────
    pub sale_status: SaleStatus,
    /// Default catalog ordering weight computed by the mapper.
    #[sea_orm(default_value = 0)]
    pub rank_score: i32,

    // ─── Sync Bookkeeping ────────────────────────────────────────────────────
    /// Fields from the remote payload that have no typed column.
    #[sea_orm(column_type = "Json")]
    pub raw_extra: serde_json::Value,
    /// Hex SHA-256 over the displayed fields.
    pub data_hash: String,
    pub last_api_sync: DateTimeWithTimeZone,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Human-readable title, e.g. "2019 Toyota Camry".
    pub fn title(&self) -> String {
        match self.year {
            Some(year) => format!("{} {} {}", year, self.make, self.model),
            None => format!("{} {}", self.make, self.model),
        }
    }

    /// Image URLs as strings, skipping non-string entries.
    pub fn image_urls(&self) -> Vec<String> {
        self.images
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}
