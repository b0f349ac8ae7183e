//! Progress reporting types for sync runs.

use uuid::Uuid;

use crate::entity::error_category::ErrorCategory;
use crate::entity::sync_run_status::{SyncRunStatus, SyncType};
use crate::repository::MergeReport;

use super::types::StopReason;

/// Progress events emitted during a sync run.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum SyncProgress {
    /// The run claimed the stream.
    RunStarted {
        stream: String,
        run_id: Uuid,
        sync_type: SyncType,
        start_page: u32,
        /// True when continuing an interrupted run.
        resumed: bool,
    },

    /// The dataset size is known (or estimated).
    TotalDiscovered {
        total_records: Option<u64>,
        total_pages: Option<u32>,
        /// True when the numbers come from configuration, not the remote.
        estimated: bool,
    },

    /// A page was fetched and staged.
    PageFetched {
        page: u32,
        /// Records staged from this page.
        count: usize,
        /// Records that could not be mapped and were skipped.
        skipped: usize,
        /// Running total for the run.
        records_so_far: u64,
        expected_pages: Option<u32>,
    },

    /// A page came back empty.
    EmptyPage { page: u32, consecutive: u32 },

    /// A page failed after retries; the run continues.
    PageFailed {
        page: u32,
        category: ErrorCategory,
        error: String,
    },

    /// Page fetch failed transiently, retrying.
    PageFetchRetry {
        page: u32,
        /// Time to wait before retry (ms).
        retry_after_ms: u64,
        /// Attempt that just failed (1-based).
        attempt: u32,
    },

    /// The page loop stopped.
    Stopping { reason: StopReason },

    /// Merging the run's staging rows into the cache.
    MergeStarted { run_id: Uuid },

    /// Merge finished.
    MergeComplete { report: MergeReport },

    /// The run reached a terminal state.
    RunFinished {
        run_id: Uuid,
        status: SyncRunStatus,
        records_processed: u64,
        incomplete: bool,
    },

    /// Warning message (non-fatal).
    Warning { message: String },
}

/// Callback for progress updates during sync operations.
pub type ProgressCallback = Box<dyn Fn(SyncProgress) + Send + Sync>;

/// Emit a progress event if a callback is provided.
#[inline]
pub fn emit(on_progress: Option<&ProgressCallback>, event: SyncProgress) {
    if let Some(cb) = on_progress {
        cb(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_emit_with_callback() {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);

        let callback: ProgressCallback = Box::new(move |_event| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        emit(Some(&callback), SyncProgress::EmptyPage { page: 3, consecutive: 1 });
        emit(
            Some(&callback),
            SyncProgress::Stopping {
                reason: StopReason::EndOfData { page: 3 },
            },
        );

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_emit_without_callback() {
        emit(
            None,
            SyncProgress::Warning {
                message: "ignored".to_string(),
            },
        );
    }

    #[test]
    fn test_sync_progress_debug() {
        let event = SyncProgress::PageFailed {
            page: 17,
            category: ErrorCategory::PartialData,
            error: "Undecodable page body".to_string(),
        };

        let debug_str = format!("{:?}", event);
        assert!(debug_str.contains("PageFailed"));
        assert!(debug_str.contains("17"));
        assert!(debug_str.contains("PartialData"));
    }
}
