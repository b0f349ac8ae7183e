//! StagedListing entity - per-run landing area for fetched records.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::entity::sale_status::SaleStatus;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "staged_listings")]
pub struct Model {
    /// Per-run row id (UUIDv5 of the run id and external id).
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    /// Sync run that staged this row.
    pub run_id: Uuid,
    /// Stable id the listing carries in `car_listings`.
    pub listing_id: Uuid,
    pub external_id: String,
    pub source_site: String,
    pub make: String,
    pub model: String,
    pub year: Option<i32>,
    pub price_cents: Option<i64>,
    pub mileage_km: Option<i64>,
    pub fuel: Option<String>,
    pub transmission: Option<String>,
    pub color: Option<String>,
    pub body_type: Option<String>,
    #[sea_orm(column_type = "Json")]
    pub images: serde_json::Value,
    pub sale_status: SaleStatus,
    pub rank_score: i32,
    #[sea_orm(column_type = "Json")]
    pub raw_extra: serde_json::Value,
    pub data_hash: String,
    /// Remote page the record came from.
    pub page: i32,
    pub staged_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
