//! Sync options, constants and run results.

use std::time::Duration;

use uuid::Uuid;

use crate::entity::sync_run_status::{SyncRunStatus, SyncType};
use crate::repository::MergeReport;

/// Default sync stream name.
pub const DEFAULT_STREAM: &str = "main";

/// Default number of page workers.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Consecutive empty (or failed) pages that end a run.
pub const DEFAULT_EMPTY_PAGE_THRESHOLD: u32 = 25;

/// Pages fetched past a discovered `last_page` before the run ends.
pub const DEFAULT_LAST_PAGE_BUFFER: u32 = 5;

/// Maximum retries for a single page fetch.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Maximum backoff delay in milliseconds.
pub const MAX_BACKOFF_MS: u64 = 60_000;

/// Initial backoff delay in milliseconds.
pub const INITIAL_BACKOFF_MS: u64 = 1_000;

/// Per-attempt page fetch timeout.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Runs completing below this share of a discovered total are flagged incomplete.
pub const COMPLETENESS_THRESHOLD: f64 = 0.95;

/// Where a run starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPage {
    /// A specific page (1-based).
    Page(u32),
    /// Continue the stream's last run from its `resume_page`.
    Resume,
}

impl Default for StartPage {
    fn default() -> Self {
        Self::Page(1)
    }
}

/// Options for one sync run.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Sync status row to drive.
    pub stream: String,
    pub sync_type: SyncType,
    pub start: StartPage,
    /// Page workers, clamped to [1, 64].
    pub concurrency: usize,
    /// Outbound rate, clamped to [1, 1000].
    pub requests_per_second: u32,
    pub empty_page_threshold: u32,
    pub last_page_buffer: u32,
    /// Safety cap on pages fetched in one run.
    pub max_pages: Option<u32>,
    pub max_retries: u32,
    pub fetch_timeout: Duration,
    /// Used for progress until the remote discloses its size.
    pub estimated_total_records: Option<u64>,
    pub completeness_threshold: f64,
    /// Run the merge step after a completed run.
    pub merge_on_complete: bool,
    /// Delete the run's staging rows after a successful merge.
    pub purge_staging: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            stream: DEFAULT_STREAM.to_string(),
            sync_type: SyncType::Full,
            start: StartPage::default(),
            concurrency: DEFAULT_CONCURRENCY,
            requests_per_second: crate::rate_limit::limits::DEFAULT_RPS,
            empty_page_threshold: DEFAULT_EMPTY_PAGE_THRESHOLD,
            last_page_buffer: DEFAULT_LAST_PAGE_BUFFER,
            max_pages: None,
            max_retries: DEFAULT_MAX_RETRIES,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            estimated_total_records: None,
            completeness_threshold: COMPLETENESS_THRESHOLD,
            merge_on_complete: true,
            purge_staging: true,
        }
    }
}

impl SyncOptions {
    /// Stop policy derived from these options.
    pub fn stop_policy(&self, start_page: u32) -> StopPolicy {
        StopPolicy {
            start_page,
            empty_page_threshold: self.empty_page_threshold.max(1),
            last_page_buffer: self.last_page_buffer,
            max_pages: self.max_pages,
            last_page: None,
        }
    }
}

/// Why a run stopped fetching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// An empty page said `has_more = false`.
    EndOfData { page: u32 },
    /// Too many empty or failed pages in a row.
    EmptyPageThreshold { page: u32, consecutive: u32 },
    /// Walked past the discovered last page plus the buffer.
    PastLastPage { page: u32, last_page: u32 },
    /// Hit the configured page cap.
    MaxPages { page: u32 },
    /// Shutdown requested.
    Cancelled,
    /// A fatal fetch error.
    Fatal,
}

impl StopReason {
    /// Whether the run ends `completed` (as opposed to `failed`).
    #[inline]
    pub fn is_completion(self) -> bool {
        !matches!(self, StopReason::Cancelled | StopReason::Fatal)
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::EndOfData { page } => write!(f, "end of data at page {page}"),
            StopReason::EmptyPageThreshold { page, consecutive } => {
                write!(f, "{consecutive} consecutive empty pages ending at page {page}")
            }
            StopReason::PastLastPage { page, last_page } => {
                write!(f, "page {page} is past last page {last_page}")
            }
            StopReason::MaxPages { page } => write!(f, "page cap reached at page {page}"),
            StopReason::Cancelled => write!(f, "cancelled"),
            StopReason::Fatal => write!(f, "fatal error"),
        }
    }
}

/// Stop conditions, evaluated for each page in page order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopPolicy {
    pub start_page: u32,
    pub empty_page_threshold: u32,
    pub last_page_buffer: u32,
    pub max_pages: Option<u32>,
    /// Set once real metadata is discovered.
    pub last_page: Option<u32>,
}

impl StopPolicy {
    /// Evaluate the stop conditions after `page` completed.
    ///
    /// `consecutive_empty` already includes `page` if it was empty or failed.
    pub fn check(&self, page: u32, consecutive_empty: u32, terminal: bool) -> Option<StopReason> {
        if terminal {
            return Some(StopReason::EndOfData { page });
        }
        if consecutive_empty >= self.empty_page_threshold {
            return Some(StopReason::EmptyPageThreshold {
                page,
                consecutive: consecutive_empty,
            });
        }
        if let Some(last_page) = self.last_page
            && page > last_page.saturating_add(self.last_page_buffer)
        {
            return Some(StopReason::PastLastPage { page, last_page });
        }
        if let Some(max) = self.max_pages
            && page.saturating_sub(self.start_page) + 1 >= max
        {
            return Some(StopReason::MaxPages { page });
        }
        None
    }

    /// Highest page worth dispensing to a worker.
    pub fn last_dispensable_page(&self) -> Option<u32> {
        let by_meta = self
            .last_page
            .map(|last| last.saturating_add(self.last_page_buffer).saturating_add(1));
        let by_cap = self
            .max_pages
            .map(|max| self.start_page.saturating_add(max.max(1) - 1));
        match (by_meta, by_cap) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

/// Result of a finished run.
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub run_id: Uuid,
    pub status: SyncRunStatus,
    pub stop_reason: Option<StopReason>,
    /// Pages fetched and staged (including empty ones).
    pub pages_completed: u32,
    pub failed_pages: Vec<u32>,
    pub records_processed: u64,
    pub total_records: Option<u64>,
    pub incomplete: bool,
    pub merge: Option<MergeReport>,
}
