//! Sync orchestration for the remote listing feed.
//!
//! # Module Structure
//!
//! - [`types`] - `SyncOptions`, stop policy, run outcome, constants
//! - [`progress`] - `SyncProgress`, `ProgressCallback`, `emit()`
//! - [`status`] - `SyncStatusStore`, the persisted state machine
//! - [`orchestrator`] - `SyncOrchestrator`, the page loop
//! - [`watchdog`] - stuck-run detection
//! - [`snapshot`] - percent and ETA derived from a status row
//!
//! # Example
//!
//! ```ignore
//! use carcache::sync::{SyncOptions, SyncOrchestrator, SyncStatusStore};
//!
//! let orchestrator = SyncOrchestrator::new(SyncStatusStore::new(db), Arc::new(client));
//! let outcome = orchestrator.run(&SyncOptions::default()).await?;
//! println!("Run {} processed {} records", outcome.run_id, outcome.records_processed);
//! ```

mod errors;
pub mod orchestrator;
mod progress;
pub mod snapshot;
pub mod status;
mod types;
pub mod watchdog;

// Re-export types
pub use errors::{Result, SyncError};
pub use types::{StartPage, StopPolicy, StopReason, SyncOptions, SyncOutcome};

// Re-export constants
pub use types::{
    COMPLETENESS_THRESHOLD, DEFAULT_CONCURRENCY, DEFAULT_EMPTY_PAGE_THRESHOLD,
    DEFAULT_FETCH_TIMEOUT, DEFAULT_LAST_PAGE_BUFFER, DEFAULT_MAX_RETRIES, DEFAULT_STREAM,
    INITIAL_BACKOFF_MS, MAX_BACKOFF_MS,
};

// Re-export progress types
pub use progress::{ProgressCallback, SyncProgress, emit};

pub use orchestrator::SyncOrchestrator;
pub use snapshot::SyncSnapshot;
pub use status::{ProgressUpdate, RunClaim, SyncStatusStore};
pub use watchdog::{DEFAULT_WATCHDOG_INTERVAL, StuckPolicy, StuckReason, Watchdog, detect_stuck};
