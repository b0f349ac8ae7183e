//! Raw remote record to typed listing.
//!
//! Every logical field has an ordered list of JSON paths to try. The first
//! path that resolves to a usable value wins. Top-level keys that were not
//! consumed by a direct (single-segment) path are kept in `raw_extra`.

use std::collections::BTreeSet;

use chrono::{DateTime, FixedOffset};
use sea_orm::Set;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

use crate::entity::sale_status::SaleStatus;
use crate::entity::staged_listing::ActiveModel as StagedListingActiveModel;

/// Namespace for listing ids (UUIDv5 over `source_site:external_id`).
pub const LISTING_NAMESPACE: Uuid = Uuid::from_u128(0x6c1f_3f0e_52b4_4c8e_9a57_0d2e_8b43_a1c9);

/// Field path table.
pub mod paths {
    pub const EXTERNAL_ID: &[&str] = &["id", "lot_id", "external_id", "lots.0.lot"];
    pub const MAKE: &[&str] = &["make", "manufacturer.name", "manufacturer", "brand"];
    pub const MODEL: &[&str] = &["model.name", "model"];
    pub const YEAR: &[&str] = &["year", "model_year"];
    /// Currency units; converted to cents.
    pub const PRICE: &[&str] = &["price", "buy_now", "lots.0.buy_now", "lots.0.bid"];
    pub const MILEAGE_KM: &[&str] = &["mileage_km", "mileage", "odometer.km", "lots.0.odometer.km"];
    pub const MILEAGE_MI: &[&str] = &["mileage_mi", "odometer.mi", "lots.0.odometer.mi"];
    pub const FUEL: &[&str] = &["fuel", "fuel_type", "engine.fuel.name", "fuel.name"];
    pub const TRANSMISSION: &[&str] = &["transmission", "transmission.name", "gearbox"];
    pub const COLOR: &[&str] = &["color", "color.name", "colour"];
    pub const BODY_TYPE: &[&str] = &["body_type", "body_type.name", "body"];
    pub const IMAGES: &[&str] = &["images", "photos", "lots.0.images.normal", "lots.0.images"];
    pub const SALE_STATUS: &[&str] = &["sale_status", "status", "lots.0.status.name", "lots.0.status"];
}

const MIN_YEAR: i64 = 1886;
const MAX_YEAR: i64 = 2100;
const KM_PER_MILE: f64 = 1.609_344;

/// A record that cannot become a listing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MapError {
    #[error("record is not a JSON object")]
    NotAnObject,

    #[error("missing required field `{field}`")]
    MissingField { field: &'static str },
}

/// Typed listing produced from one raw record.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedListing {
    pub id: Uuid,
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
    pub images: Vec<String>,
    pub sale_status: SaleStatus,
    pub rank_score: i32,
    pub raw_extra: Value,
    pub data_hash: String,
}

impl MappedListing {
    /// Staging row for this listing within a run.
    pub fn to_staged(
        &self,
        run_id: Uuid,
        page: u32,
        staged_at: DateTime<FixedOffset>,
    ) -> StagedListingActiveModel {
        StagedListingActiveModel {
            id: Set(staged_row_id(run_id, &self.external_id)),
            run_id: Set(run_id),
            listing_id: Set(self.id),
            external_id: Set(self.external_id.clone()),
            source_site: Set(self.source_site.clone()),
            make: Set(self.make.clone()),
            model: Set(self.model.clone()),
            year: Set(self.year),
            price_cents: Set(self.price_cents),
            mileage_km: Set(self.mileage_km),
            fuel: Set(self.fuel.clone()),
            transmission: Set(self.transmission.clone()),
            color: Set(self.color.clone()),
            body_type: Set(self.body_type.clone()),
            images: Set(Value::from(self.images.clone())),
            sale_status: Set(self.sale_status),
            rank_score: Set(self.rank_score),
            raw_extra: Set(self.raw_extra.clone()),
            data_hash: Set(self.data_hash.clone()),
            page: Set(i32::try_from(page).unwrap_or(i32::MAX)),
            staged_at: Set(staged_at),
        }
    }
}

/// Stable listing id.
pub fn listing_id(source_site: &str, external_id: &str) -> Uuid {
    Uuid::new_v5(
        &LISTING_NAMESPACE,
        format!("{source_site}:{external_id}").as_bytes(),
    )
}

/// Staging row id, unique per run.
pub fn staged_row_id(run_id: Uuid, external_id: &str) -> Uuid {
    Uuid::new_v5(&run_id, external_id.as_bytes())
}

/// Resolve a dotted path. Numeric segments index arrays.
pub fn resolve<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Strip null values from a JSON value, recursively.
pub fn strip_null_values(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let filtered: Map<String, Value> = map
                .into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, strip_null_values(v)))
                .collect();
            Value::Object(filtered)
        }
        Value::Array(arr) => Value::Array(arr.into_iter().map(strip_null_values).collect()),
        other => other,
    }
}

fn as_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

fn as_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let cleaned: String = s
                .chars()
                .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
                .collect();
            cleaned.parse().ok()
        }
        _ => None,
    };
    number.filter(|n| n.is_finite())
}

fn image_list(value: &Value) -> Option<Vec<String>> {
    let items = value.as_array()?;
    let urls: Vec<String> = items
        .iter()
        .filter_map(|item| match item {
            Value::String(s) => Some(s.trim().to_string()),
            Value::Object(map) => map.get("url").and_then(Value::as_str).map(str::to_string),
            _ => None,
        })
        .filter(|s| !s.is_empty())
        .collect();
    (!urls.is_empty()).then_some(urls)
}

/// Tracks which direct top-level keys a record consumed.
struct Resolver<'a> {
    record: &'a Value,
    consumed: BTreeSet<&'static str>,
}

impl<'a> Resolver<'a> {
    fn first<T>(&mut self, paths: &[&'static str], convert: impl Fn(&Value) -> Option<T>) -> Option<T> {
        for path in paths {
            if let Some(found) = resolve(self.record, path).and_then(&convert) {
                if !path.contains('.') {
                    self.consumed.insert(*path);
                }
                return Some(found);
            }
        }
        None
    }
}

/// Map one raw record.
///
/// # Errors
/// `MapError` when the record has no external id, make or model.
pub fn map_record(source_site: &str, record: &Value) -> Result<MappedListing, MapError> {
    if !record.is_object() {
        return Err(MapError::NotAnObject);
    }
    let mut r = Resolver {
        record,
        consumed: BTreeSet::new(),
    };

    let external_id = r
        .first(paths::EXTERNAL_ID, as_text)
        .ok_or(MapError::MissingField { field: "external_id" })?;
    let make = r
        .first(paths::MAKE, as_text)
        .ok_or(MapError::MissingField { field: "make" })?;
    let model = r
        .first(paths::MODEL, as_text)
        .ok_or(MapError::MissingField { field: "model" })?;

    let year = r
        .first(paths::YEAR, as_number)
        .map(|y| y.round() as i64)
        .filter(|y| (MIN_YEAR..=MAX_YEAR).contains(y))
        .map(|y| y as i32);
    let price_cents = r
        .first(paths::PRICE, as_number)
        .filter(|p| *p >= 0.0)
        .map(|p| (p * 100.0).round() as i64);
    let mileage_km = r
        .first(paths::MILEAGE_KM, as_number)
        .or_else(|| r.first(paths::MILEAGE_MI, as_number).map(|mi| mi * KM_PER_MILE))
        .filter(|m| *m >= 0.0)
        .map(|m| m.round() as i64);
    let fuel = r.first(paths::FUEL, as_text).map(|s| s.to_lowercase());
    let transmission = r.first(paths::TRANSMISSION, as_text).map(|s| s.to_lowercase());
    let color = r.first(paths::COLOR, as_text).map(|s| s.to_lowercase());
    let body_type = r.first(paths::BODY_TYPE, as_text).map(|s| s.to_lowercase());
    let images = r.first(paths::IMAGES, image_list).unwrap_or_default();
    let sale_status = r
        .first(paths::SALE_STATUS, as_text)
        .map(|s| SaleStatus::from_remote(&s))
        .unwrap_or_default();

    let raw_extra = match record {
        Value::Object(map) => strip_null_values(Value::Object(
            map.iter()
                .filter(|(k, _)| !r.consumed.contains(k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )),
        _ => Value::Object(Map::new()),
    };

    let mut listing = MappedListing {
        id: listing_id(source_site, &external_id),
        external_id,
        source_site: source_site.to_string(),
        make,
        model,
        year,
        price_cents,
        mileage_km,
        fuel,
        transmission,
        color,
        body_type,
        images,
        sale_status,
        rank_score: 0,
        raw_extra,
        data_hash: String::new(),
    };
    listing.rank_score = rank_score(&listing);
    listing.data_hash = data_hash(&listing);
    Ok(listing)
}

/// Map a page of records, returning the mapped listings and the skip count.
///
/// Duplicate external ids within a page keep the last occurrence.
pub fn map_page(source_site: &str, records: &[Value]) -> (Vec<MappedListing>, usize) {
    let mut mapped: Vec<MappedListing> = Vec::with_capacity(records.len());
    let mut skipped = 0;
    for record in records {
        match map_record(source_site, record) {
            Ok(listing) => {
                if let Some(existing) = mapped.iter_mut().find(|m| m.id == listing.id) {
                    *existing = listing;
                } else {
                    mapped.push(listing);
                }
            }
            Err(err) => {
                skipped += 1;
                tracing::debug!(error = %err, "Skipping unmappable record");
            }
        }
    }
    (mapped, skipped)
}

/// Default catalog ordering weight: completeness of the listing plus recency.
pub fn rank_score(listing: &MappedListing) -> i32 {
    let mut score = 0;
    if listing.price_cents.is_some() {
        score += 20;
    }
    if listing.mileage_km.is_some() {
        score += 10;
    }
    if let Some(year) = listing.year {
        score += 10 + (year - 1990).clamp(0, 40);
    }
    score += 3 * listing.images.len().min(10) as i32;
    if listing.sale_status == SaleStatus::Pending {
        score -= 10;
    }
    score
}

/// Hex SHA-256 over the displayed fields.
pub fn data_hash(listing: &MappedListing) -> String {
    let displayed = serde_json::json!([
        listing.make,
        listing.model,
        listing.year,
        listing.price_cents,
        listing.mileage_km,
        listing.fuel,
        listing.transmission,
        listing.color,
        listing.body_type,
        listing.images,
        listing.sale_status,
    ]);
    let digest = Sha256::digest(displayed.to_string().as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
