//! Listing sale status.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Lifecycle state of a listing in the cache.
///
/// Listings are never hard-deleted by sync activity. A listing that disappears
/// from a full sync pass moves to `Archived`; the remote marks sold lots itself.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize,
    Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "snake_case")]
pub enum SaleStatus {
    #[default]
    #[sea_orm(string_value = "active")]
    Active,
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "sold")]
    Sold,
    #[sea_orm(string_value = "archived")]
    Archived,
}

impl SaleStatus {
    /// Whether the listing is still for sale (shown by default in the catalog).
    #[inline]
    pub fn is_open(self) -> bool {
        matches!(self, SaleStatus::Active | SaleStatus::Pending)
    }

    /// Parse the loose status vocabulary used by auction feeds.
    ///
    /// Unknown values fall back to `Active`, since the remote only lists lots
    /// that are still visible on the source site.
    pub fn from_remote(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "sold" | "closed" => SaleStatus::Sold,
            "pending" | "on_approval" | "on approval" | "reserved" | "upcoming" => {
                SaleStatus::Pending
            }
            "archived" | "removed" | "deleted" | "expired" => SaleStatus::Archived,
            _ => SaleStatus::Active,
        }
    }
}

impl std::fmt::Display for SaleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SaleStatus::Active => write!(f, "active"),
            SaleStatus::Pending => write!(f, "pending"),
            SaleStatus::Sold => write!(f, "sold"),
            SaleStatus::Archived => write!(f, "archived"),
        }
    }
}

impl std::str::FromStr for SaleStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(SaleStatus::Active),
            "pending" => Ok(SaleStatus::Pending),
            "sold" => Ok(SaleStatus::Sold),
            "archived" => Ok(SaleStatus::Archived),
            _ => Err(format!("Unknown sale status: {}", s)),
        }
    }
}
