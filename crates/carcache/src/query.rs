//! Read side of the cache: filtered, globally sorted, cursor-paginated pages.
//!
//! - [`filter`] - `CarFilter`, validated once at the API boundary
//! - [`sort`] - `SortKey` whitelist and keyset predicates
//! - [`cursor`] - opaque continuation tokens
//! - [`keyset`] - `page()`, the pagination engine
//! - [`facets`] - per-field value counts

mod errors;
pub mod cursor;
pub mod facets;
pub mod filter;
pub mod keyset;
pub mod sort;

pub use cursor::{Cursor, SortValue};
pub use errors::{QueryError, Result};
pub use facets::{FacetCounts, FacetField, facet_counts};
pub use filter::CarFilter;
pub use keyset::{CarPage, DEFAULT_LIMIT, MAX_LIMIT, clamp_limit, page};
pub use sort::{SortDirection, SortField, SortKey};
