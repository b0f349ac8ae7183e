//! Remote auction listing API.
//!
//! [`ListingSource`] is the seam the sync orchestrator depends on: fetch one
//! page, classify failures. [`AuctionApiClient`] implements it over
//! [`HttpTransport`](crate::http::HttpTransport).
//!
//! # Example
//!
//! ```ignore
//! use carcache::remote::{AuctionApiClient, AuctionApiConfig, ListingSource};
//!
//! let client = AuctionApiClient::from_config(AuctionApiConfig::new("https://api.example.com/v2"))?;
//! let page = client.fetch_page(1).await?;
//! println!("{} records, last page {:?}", page.records.len(), page.meta.last_page);
//! ```

mod client;
mod errors;
mod types;

pub use client::{AuctionApiClient, AuctionApiConfig, DEFAULT_PER_PAGE};
pub use errors::{FetchError, parse_retry_after, short_error_message};
pub use types::{ListingPage, ListingSource, PageMeta};
