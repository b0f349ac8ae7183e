//! Persistence operations for staged and cached listings.
//!
//! - [`staging`] lands fetched records per run.
//! - [`merge`] reconciles a run's staging rows into the served cache.
//! - [`listing`] reads single listings and cache statistics.

mod errors;
pub mod listing;
pub mod merge;
pub mod staging;

pub use errors::{RepositoryError, Result, is_retryable_db_error};
pub use listing::{CacheStats, cache_stats, find_by_id};
pub use merge::{MergeGuard, MergeLocks, MergeOptions, MergeReport, merge_run};
pub use staging::{
    DEFAULT_STAGE_BACKOFF_MS, DEFAULT_STAGE_RETRIES, count_staged, count_staged_before,
    purge_older_than, purge_run, stage_listings, stage_listings_with_retry,
};
