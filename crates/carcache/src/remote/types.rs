use async_trait::async_trait;
use serde_json::Value;

use super::errors::FetchError;

/// Pagination metadata a page response may carry.
///
/// Every field is optional: the remote does not guarantee any of them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageMeta {
    /// Total record count across all pages.
    pub total: Option<u64>,
    /// Index of the last page.
    pub last_page: Option<u32>,
    /// Whether pages after this one exist.
    pub has_more: Option<bool>,
    /// Page size the remote actually applied.
    pub per_page: Option<u32>,
}

impl PageMeta {
    /// Whether the remote disclosed the dataset size.
    #[inline]
    pub fn has_size(&self) -> bool {
        self.total.is_some() || self.last_page.is_some()
    }

    /// Extract metadata from a page body, checking the top level first and
    /// then a nested `meta` object.
    pub fn from_body(body: &Value) -> Self {
        let lookup = |key: &str| {
            body.get(key)
                .filter(|v| !v.is_null())
                .or_else(|| body.get("meta").and_then(|m| m.get(key)))
                .filter(|v| !v.is_null())
        };

        let has_more = lookup("has_more").and_then(as_bool).or_else(|| {
            // Laravel-style paginators only expose the next link.
            // A null next link is the end-of-data signal, so look it up raw.
            body.get("next_page_url")
                .or_else(|| body.get("meta").and_then(|m| m.get("next_page_url")))
                .or_else(|| body.get("links").and_then(|l| l.get("next")))
                .map(|next| !next.is_null())
        });

        Self {
            total: lookup("total").and_then(as_u64),
            last_page: lookup("last_page")
                .and_then(as_u64)
                .and_then(|v| u32::try_from(v).ok()),
            has_more,
            per_page: lookup("per_page")
                .and_then(as_u64)
                .and_then(|v| u32::try_from(v).ok()),
        }
    }
}

fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_u64().map(|v| v != 0),
        Value::String(s) => match s.trim() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// One fetched page of raw listing records.
#[derive(Debug, Clone, PartialEq)]
pub struct ListingPage {
    /// Page index (1-based).
    pub page: u32,
    /// Raw records, mapped later by [`crate::mapping`].
    pub records: Vec<Value>,
    pub meta: PageMeta,
}

impl ListingPage {
    /// An empty page with no metadata.
    pub fn empty(page: u32) -> Self {
        Self {
            page,
            records: Vec::new(),
            meta: PageMeta::default(),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// True when the remote says this empty page is the end of the data.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        self.is_empty() && self.meta.has_more == Some(false)
    }

    /// Decode a page body: `{data: [...], total?, last_page?, has_more?, meta?}`
    /// or a bare JSON array.
    pub fn from_body(page: u32, body: &[u8]) -> Result<Self, FetchError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::empty(page));
        }

        let value: Value =
            serde_json::from_slice(body).map_err(|e| FetchError::decode(e.to_string()))?;

        match value {
            Value::Array(records) => Ok(Self {
                page,
                records,
                meta: PageMeta::default(),
            }),
            Value::Object(_) => {
                let meta = PageMeta::from_body(&value);
                let records = match value.get("data") {
                    Some(Value::Array(items)) => items.clone(),
                    Some(Value::Null) | None => {
                        return Err(FetchError::decode("missing `data` array"));
                    }
                    Some(_) => return Err(FetchError::decode("`data` is not an array")),
                };
                Ok(Self {
                    page,
                    records,
                    meta,
                })
            }
            _ => Err(FetchError::decode("page body is not an object or array")),
        }
    }
}

/// A paginated source of raw listing records.
///
/// Implementations classify every failure into a [`FetchError`]; retrying is
/// the caller's job (see [`crate::retry::fetch_page_with_retry`]).
#[async_trait]
pub trait ListingSource: Send + Sync {
    /// Source site the records belong to (stored on every listing).
    fn source_site(&self) -> &str;

    /// Fetch a single page (1-based).
    async fn fetch_page(&self, page: u32) -> Result<ListingPage, FetchError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_meta_top_level_and_nested() {
        let top = json!({"data": [], "total": 150000, "last_page": 6000});
        let meta = PageMeta::from_body(&top);
        assert_eq!(meta.total, Some(150_000));
        assert_eq!(meta.last_page, Some(6000));
        assert!(meta.has_size());

        let nested = json!({"data": [], "meta": {"total": "42", "last_page": 3, "has_more": true}});
        let meta = PageMeta::from_body(&nested);
        assert_eq!(meta.total, Some(42));
        assert_eq!(meta.last_page, Some(3));
        assert_eq!(meta.has_more, Some(true));
    }

    #[test]
    fn test_meta_absent() {
        let meta = PageMeta::from_body(&json!({"data": [{"id": 1}]}));
        assert_eq!(meta, PageMeta::default());
        assert!(!meta.has_size());
    }

    #[test]
    fn test_has_more_from_next_link() {
        let meta = PageMeta::from_body(&json!({"data": [], "next_page_url": null}));
        assert_eq!(meta.has_more, None);
        let meta = PageMeta::from_body(&json!({"data": [], "links": {"next": null}}));
        assert_eq!(meta.has_more, Some(false));
        let meta = PageMeta::from_body(&json!({"data": [], "next_page_url": "https://x/cars?page=3"}));
        assert_eq!(meta.has_more, Some(true));
    }

    #[test]
    fn test_from_body_variants() {
        let page = ListingPage::from_body(2, br#"{"data":[{"id":"a"}],"has_more":true}"#).unwrap();
        assert_eq!(page.page, 2);
        assert_eq!(page.records.len(), 1);
        assert!(!page.is_terminal());

        let page = ListingPage::from_body(3, br#"[{"id":"a"},{"id":"b"}]"#).unwrap();
        assert_eq!(page.records.len(), 2);

        let page = ListingPage::from_body(9, b"  ").unwrap();
        assert!(page.is_empty());
        assert!(!page.is_terminal());

        let page = ListingPage::from_body(10, br#"{"data":[],"has_more":false}"#).unwrap();
        assert!(page.is_terminal());
    }

    #[test]
    fn test_from_body_rejects_garbage() {
        assert!(matches!(
            ListingPage::from_body(1, b"<html>oops</html>"),
            Err(FetchError::Decode { .. })
        ));
        assert!(matches!(
            ListingPage::from_body(1, br#"{"items": []}"#),
            Err(FetchError::Decode { .. })
        ));
        assert!(matches!(
            ListingPage::from_body(1, br#"{"data": {"id": 1}}"#),
            Err(FetchError::Decode { .. })
        ));
    }
}
