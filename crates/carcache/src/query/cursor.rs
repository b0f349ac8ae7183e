//! Opaque keyset cursors.
//!
//! A cursor is URL-safe base64 (no padding) over compact JSON holding the
//! last row's sort value and id, the sort key it was issued for, and the
//! fingerprint of the filter set.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entity::car_listing::Model;

use super::errors::{QueryError, Result};
use super::sort::SortKey;

/// A sort column value captured in a cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortValue {
    Int(i64),
    Text(String),
    Time(DateTime<FixedOffset>),
    Null,
}

/// Position after the last row of a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    /// Sort key, e.g. "price_asc".
    #[serde(rename = "s")]
    pub sort: String,
    #[serde(rename = "v")]
    pub value: SortValue,
    pub id: Uuid,
    /// Filter set fingerprint.
    #[serde(rename = "f")]
    pub filters: String,
}

impl Cursor {
    /// Cursor positioned after `row`.
    pub fn after_row(sort: SortKey, filters: &str, row: &Model) -> Self {
        Self {
            sort: sort.to_string(),
            value: sort.field.value_of(row),
            id: row.id,
            filters: filters.to_string(),
        }
    }

    pub fn encode(&self) -> Result<String> {
        let json = serde_json::to_vec(self).map_err(|e| QueryError::invalid_cursor(e.to_string()))?;
        Ok(URL_SAFE_NO_PAD.encode(json))
    }

    pub fn decode(token: &str) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|_| QueryError::invalid_cursor("not base64url"))?;
        serde_json::from_slice(&bytes).map_err(|_| QueryError::invalid_cursor("malformed payload"))
    }

    /// Reject a cursor issued for another sort or filter set.
    pub fn ensure_matches(&self, sort: SortKey, filters: &str) -> Result<()> {
        if self.sort != sort.to_string() || self.filters != filters {
            return Err(QueryError::CursorMismatch);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use crate::query::sort::{SortDirection, SortField};

    #[test]
    fn test_round_trip_is_exact() {
        let cursors = [
            SortValue::Int(-42),
            SortValue::Text("Škoda \"Octavia\"".to_string()),
            SortValue::Time(Utc::now().fixed_offset()),
            SortValue::Null,
        ]
        .map(|value| Cursor {
            sort: "price_asc".to_string(),
            value,
            id: Uuid::new_v4(),
            filters: "0123456789abcdef".to_string(),
        });

        for cursor in cursors {
            let token = cursor.encode().unwrap();
            assert!(!token.contains('=') && !token.contains('+') && !token.contains('/'));
            assert_eq!(Cursor::decode(&token).unwrap(), cursor);
        }
    }

    #[test]
    fn test_garbage_is_invalid() {
        assert!(matches!(
            Cursor::decode("%%%"),
            Err(QueryError::InvalidCursor { .. })
        ));
        let not_json = URL_SAFE_NO_PAD.encode(b"hello");
        assert!(matches!(
            Cursor::decode(&not_json),
            Err(QueryError::InvalidCursor { .. })
        ));
    }

    #[test]
    fn test_mismatch() {
        let cursor = Cursor {
            sort: "price_asc".to_string(),
            value: SortValue::Int(1),
            id: Uuid::nil(),
            filters: "aaaa".to_string(),
        };
        let price_asc = SortKey::new(SortField::Price, SortDirection::Asc);
        let price_desc = SortKey::new(SortField::Price, SortDirection::Desc);
        assert!(cursor.ensure_matches(price_asc, "aaaa").is_ok());
        assert!(matches!(
            cursor.ensure_matches(price_desc, "aaaa"),
            Err(QueryError::CursorMismatch)
        ));
        assert!(matches!(
            cursor.ensure_matches(price_asc, "bbbb"),
            Err(QueryError::CursorMismatch)
        ));
    }
}
