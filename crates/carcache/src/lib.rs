//! Carcache - vehicle listing ingestion and a keyset-paginated cache.
//!
//! Listings are pulled page by page from a remote auction API into a staging
//! table, merged idempotently into `car_listings`, and served through cursor
//! pagination with filters and facets.
//!
//! # Features
//!
//! - `migrate` - Enables database migration support. When enabled, you can use
//!   [`connect_and_migrate`] to automatically run migrations on connection.
//! - `client` - The reqwest-backed HTTP transport for [`remote::AuctionApiClient`].
//! - `server` - The axum read and sync-control API in [`api`].
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use carcache::{connect_and_migrate, query, remote::AuctionApiClient, sync};
//!
//! let db = Arc::new(connect_and_migrate("sqlite://carcache.db?mode=rwc").await?);
//!
//! let source = Arc::new(AuctionApiClient::from_config(config)?);
//! let orchestrator = sync::SyncOrchestrator::new(sync::SyncStatusStore::new(Arc::clone(&db)), source);
//! let outcome = orchestrator.run(&sync::SyncOptions::default()).await?;
//!
//! let page = query::page(db.as_ref(), &query::CarFilter::default(), "price_asc".parse()?, None, Some(24)).await?;
//! ```

pub mod db;
pub mod entity;
pub mod http;
pub mod mapping;
pub mod query;
pub mod rate_limit;
pub mod remote;
pub mod repository;
pub mod retry;
pub mod sync;

#[cfg(feature = "server")]
pub mod api;

#[cfg(feature = "migrate")]
pub mod migration;

pub use db::connect;
#[cfg(feature = "migrate")]
pub use db::connect_and_migrate;
pub use entity::prelude::*;
pub use rate_limit::ApiRateLimiter;
pub use remote::{FetchError, ListingPage, ListingSource, PageMeta};
pub use repository::RepositoryError;
