use carcache::sync::SyncProgress;

/// Logging reporter using tracing for structured output.
pub struct LoggingReporter;

impl LoggingReporter {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, event: SyncProgress) {
        match event {
            SyncProgress::RunStarted {
                stream,
                run_id,
                sync_type,
                start_page,
                resumed,
            } => {
                tracing::info!(%stream, %run_id, %sync_type, start_page, resumed, "Sync started");
            }

            SyncProgress::TotalDiscovered {
                total_records,
                total_pages,
                estimated,
            } => {
                tracing::info!(total_records = ?total_records, total_pages = ?total_pages, estimated, "Dataset size");
            }

            SyncProgress::PageFetched {
                page,
                count,
                skipped,
                records_so_far,
                expected_pages,
            } => {
                tracing::debug!(page, count, skipped, records_so_far, expected_pages = ?expected_pages, "Fetched page");
                if page % 100 == 0 {
                    tracing::info!(page, records_so_far, expected_pages = ?expected_pages, "Sync progress");
                }
            }

            SyncProgress::EmptyPage { page, consecutive } => {
                tracing::debug!(page, consecutive, "Empty page");
            }

            SyncProgress::PageFailed {
                page,
                category,
                error,
            } => {
                tracing::warn!(page, %category, error = %error, "Page failed");
            }

            SyncProgress::PageFetchRetry {
                page,
                retry_after_ms,
                attempt,
            } => {
                tracing::warn!(page, retry_after_ms, attempt, "Page fetch failed, backing off");
            }

            SyncProgress::Stopping { reason } => {
                tracing::info!(%reason, "Stopping page loop");
            }

            SyncProgress::MergeStarted { run_id } => {
                tracing::info!(%run_id, "Merging staged listings");
            }

            SyncProgress::MergeComplete { report } => {
                tracing::info!(
                    inserted = report.inserted,
                    updated = report.updated,
                    unchanged = report.unchanged,
                    archived = report.archived,
                    "Merge complete"
                );
            }

            SyncProgress::RunFinished {
                run_id,
                status,
                records_processed,
                incomplete,
            } => {
                if incomplete {
                    tracing::warn!(%run_id, %status, records_processed, "Sync finished incomplete");
                } else {
                    tracing::info!(%run_id, %status, records_processed, "Sync finished");
                }
            }

            SyncProgress::Warning { message } => {
                tracing::warn!(message = %message, "Warning");
            }

            _ => {}
        }
    }
}

impl Default for LoggingReporter {
    fn default() -> Self {
        Self::new()
    }
}
