//! Sync orchestrator: drives one run of a stream to a terminal state.
//!
//! The coordinator fetches the start page itself to discover the dataset size,
//! then hands the remaining pages to a bounded pool of workers pulling page
//! numbers from a shared counter. Workers fetch, map and stage; the
//! coordinator applies their outcomes strictly in page order, so stop
//! conditions and `resume_page` never depend on completion order, and it is
//! the only writer of progress fields.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use sea_orm::DatabaseConnection;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::Instant;
use uuid::Uuid;

use crate::entity::error_category::ErrorCategory;
use crate::entity::sync_run_status::{SyncRunStatus, SyncType};
use crate::mapping::map_page;
use crate::rate_limit::{ApiRateLimiter, clamp_concurrency};
use crate::remote::{FetchError, ListingSource, PageMeta, short_error_message};
use crate::repository::{
    DEFAULT_STAGE_BACKOFF_MS, DEFAULT_STAGE_RETRIES, MergeLocks, MergeOptions, MergeReport,
    RepositoryError, count_staged, merge_run, purge_run, stage_listings_with_retry,
};
use crate::retry::{RetryConfig, fetch_page_with_retry};

use super::errors::{Result, SyncError};
use super::progress::{ProgressCallback, SyncProgress, emit};
use super::status::{ProgressUpdate, RunClaim, SyncStatusStore};
use super::types::{
    INITIAL_BACKOFF_MS, MAX_BACKOFF_MS, StopPolicy, StopReason, SyncOptions, SyncOutcome,
};

/// How often the coordinator polls the shutdown flag.
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// How often the coordinator confirms it still owns the status row.
const OWNERSHIP_CHECK_INTERVAL: Duration = Duration::from_secs(5);

enum PageResult {
    Staged {
        /// Records in the response.
        received: usize,
        staged: u64,
        skipped: usize,
        terminal: bool,
        meta: PageMeta,
    },
    FetchFailed(FetchError),
    StageFailed(RepositoryError),
}

struct PageOutcome {
    page: u32,
    result: PageResult,
}

/// Why the page loop ended.
enum Halt {
    Stop(StopReason),
    Abort {
        category: ErrorCategory,
        message: String,
    },
    Shutdown,
    Superseded,
    Error(SyncError),
}

/// Fetch, map and stage one page.
#[derive(Clone)]
struct PageWorker {
    source: Arc<dyn ListingSource>,
    limiter: ApiRateLimiter,
    db: Arc<DatabaseConnection>,
    retry: RetryConfig,
    run_id: Uuid,
    source_site: String,
    on_progress: Option<Arc<ProgressCallback>>,
}

impl PageWorker {
    async fn process(&self, page: u32) -> PageOutcome {
        let fetched = match fetch_page_with_retry(
            self.source.as_ref(),
            page,
            &self.retry,
            Some(&self.limiter),
            self.on_progress.as_deref(),
        )
        .await
        {
            Ok(fetched) => fetched,
            Err(e) => {
                return PageOutcome {
                    page,
                    result: PageResult::FetchFailed(e),
                };
            }
        };

        let (listings, skipped) = map_page(&self.source_site, &fetched.records);
        if skipped > 0 {
            tracing::debug!(page, skipped, "Skipped unmappable records");
        }

        let result = match stage_listings_with_retry(
            self.db.as_ref(),
            self.run_id,
            page,
            &listings,
            DEFAULT_STAGE_RETRIES,
            DEFAULT_STAGE_BACKOFF_MS,
        )
        .await
        {
            Ok(_) => PageResult::Staged {
                received: fetched.records.len(),
                staged: listings.len() as u64,
                skipped,
                terminal: fetched.is_terminal(),
                meta: fetched.meta,
            },
            Err(e) => PageResult::StageFailed(e),
        };
        PageOutcome { page, result }
    }

    async fn run(
        self,
        next_page: Arc<AtomicU32>,
        ceiling: Option<u32>,
        mut cancel: watch::Receiver<bool>,
        tx: mpsc::Sender<PageOutcome>,
    ) {
        loop {
            if *cancel.borrow() {
                break;
            }
            let page = next_page.fetch_add(1, Ordering::SeqCst);
            if ceiling.is_some_and(|last| page > last) {
                break;
            }
            let outcome = tokio::select! {
                biased;
                _ = cancel.changed() => break,
                outcome = self.process(page) => outcome,
            };
            if tx.send(outcome).await.is_err() {
                break;
            }
        }
    }
}

/// Coordinator-owned run counters.
#[derive(Debug, Default)]
struct RunState {
    records_processed: u64,
    pages_completed: u32,
    /// Highest page applied; pages are applied in order.
    current_page: u32,
    /// Pages that failed after retries, ascending.
    failed: Vec<u32>,
    consecutive_empty: u32,
}

impl RunState {
    /// Lowest page not known to be complete.
    fn resume_page(&self) -> u32 {
        let next = self.current_page.saturating_add(1);
        self.failed.first().map_or(next, |first| (*first).min(next))
    }

    fn progress(&self) -> ProgressUpdate {
        ProgressUpdate {
            current_page: self.current_page,
            resume_page: self.resume_page(),
            records_processed: self.records_processed,
            failed_pages: u32::try_from(self.failed.len()).unwrap_or(u32::MAX),
            consecutive_empty_pages: self.consecutive_empty,
        }
    }
}

/// Total pages implied by page metadata.
fn implied_total_pages(meta: &PageMeta, received: usize) -> Option<u32> {
    meta.last_page.or_else(|| {
        let per_page = meta
            .per_page
            .or_else(|| u32::try_from(received).ok())
            .filter(|n| *n > 0)?;
        let pages = meta.total?.div_ceil(u64::from(per_page));
        u32::try_from(pages).ok()
    })
}

/// Drives sync runs against one listing source.
///
/// # Example
///
/// ```ignore
/// let orchestrator = SyncOrchestrator::new(SyncStatusStore::new(db), Arc::new(client))
///     .with_shutdown(shutdown_flag);
/// let outcome = orchestrator.run(&SyncOptions::default()).await?;
/// println!("{} records, stopped: {:?}", outcome.records_processed, outcome.stop_reason);
/// ```
#[derive(Clone)]
pub struct SyncOrchestrator {
    store: SyncStatusStore,
    source: Arc<dyn ListingSource>,
    merge_locks: MergeLocks,
    shutdown: Option<Arc<AtomicBool>>,
    on_progress: Option<Arc<ProgressCallback>>,
}

impl SyncOrchestrator {
    pub fn new(store: SyncStatusStore, source: Arc<dyn ListingSource>) -> Self {
        Self {
            store,
            source,
            merge_locks: MergeLocks::new(),
            shutdown: None,
            on_progress: None,
        }
    }

    /// Share merge locks with other orchestrators (e.g. the API's).
    #[must_use]
    pub fn with_merge_locks(mut self, locks: MergeLocks) -> Self {
        self.merge_locks = locks;
        self
    }

    /// Stop dispatching pages once `flag` is set.
    #[must_use]
    pub fn with_shutdown(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown = Some(flag);
        self
    }

    #[must_use]
    pub fn with_progress(mut self, on_progress: ProgressCallback) -> Self {
        self.on_progress = Some(Arc::new(on_progress));
        self
    }

    pub fn store(&self) -> &SyncStatusStore {
        &self.store
    }

    fn emit(&self, event: SyncProgress) {
        emit(self.on_progress.as_deref(), event);
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    /// Claim the stream. Pair with [`drive`](Self::drive).
    ///
    /// # Errors
    /// `SyncError::AlreadyRunning` if the stream has a live run.
    pub async fn start(&self, options: &SyncOptions) -> Result<RunClaim> {
        let claim = self
            .store
            .begin_run(
                &options.stream,
                options.sync_type,
                options.start,
                options.estimated_total_records,
            )
            .await?;
        self.emit(SyncProgress::RunStarted {
            stream: claim.stream.clone(),
            run_id: claim.run_id,
            sync_type: claim.sync_type,
            start_page: claim.start_page,
            resumed: claim.resumed,
        });
        Ok(claim)
    }

    /// Claim the stream and drive the run to a terminal state.
    pub async fn run(&self, options: &SyncOptions) -> Result<SyncOutcome> {
        let claim = self.start(options).await?;
        self.drive(claim, options).await
    }

    /// Drive a claimed run to a terminal state.
    ///
    /// # Errors
    /// - `Fatal` when a page fails with a non-retryable error (the run is failed)
    /// - `Cancelled` on shutdown (the run is failed with category `cancelled`)
    /// - `Superseded` when the status row was taken from this run
    /// - `Repository` when the merge step fails after a completed run
    #[tracing::instrument(skip_all, fields(stream = %claim.stream, run_id = %claim.run_id))]
    pub async fn drive(&self, claim: RunClaim, options: &SyncOptions) -> Result<SyncOutcome> {
        let worker = PageWorker {
            source: Arc::clone(&self.source),
            limiter: ApiRateLimiter::new(options.concurrency, options.requests_per_second),
            db: self.store.shared_db(),
            retry: RetryConfig::new(
                Duration::from_millis(INITIAL_BACKOFF_MS),
                Duration::from_millis(MAX_BACKOFF_MS),
                options.max_retries as usize,
            )
            .with_attempt_timeout(options.fetch_timeout),
            run_id: claim.run_id,
            source_site: self.source.source_site().to_string(),
            on_progress: self.on_progress.clone(),
        };
        let mut policy = options.stop_policy(claim.start_page);
        let mut state = RunState {
            records_processed: claim.records_processed,
            current_page: claim.start_page.saturating_sub(1),
            ..RunState::default()
        };

        let first = worker.process(claim.start_page).await;
        self.discover(&claim, &first, &mut policy).await?;

        let halt = match self.apply(first, &mut state, &policy) {
            Some(halt) => halt,
            None => match self.store.record_progress(&claim.stream, claim.run_id, &state.progress()).await {
                Err(SyncError::Superseded { .. }) => Halt::Superseded,
                Err(e) => return Err(e),
                Ok(()) if self.shutdown_requested() => Halt::Shutdown,
                Ok(()) => self.fetch_remaining(&claim, &worker, &mut state, &policy, options).await,
            },
        };

        match halt {
            Halt::Stop(reason) => self.finish(&claim, &state, reason, options).await,
            Halt::Abort { category, message } => {
                self.emit(SyncProgress::Stopping {
                    reason: StopReason::Fatal,
                });
                self.fail(&claim, &state, category, &message).await?;
                Err(SyncError::Fatal { category, message })
            }
            Halt::Shutdown => {
                self.emit(SyncProgress::Stopping {
                    reason: StopReason::Cancelled,
                });
                let resume_page = state.resume_page();
                let message = format!("Interrupted by shutdown; resume from page {resume_page}");
                self.fail(&claim, &state, ErrorCategory::Cancelled, &message)
                    .await?;
                Err(SyncError::Cancelled {
                    run_id: claim.run_id,
                    resume_page,
                })
            }
            Halt::Superseded => {
                tracing::warn!("Run lost ownership of its status row, stopping");
                Err(SyncError::Superseded {
                    stream: claim.stream.clone(),
                    run_id: claim.run_id,
                })
            }
            Halt::Error(e) => Err(e),
        }
    }

    /// Record the dataset size from the start page, or keep the estimate.
    async fn discover(
        &self,
        claim: &RunClaim,
        first: &PageOutcome,
        policy: &mut StopPolicy,
    ) -> Result<()> {
        let discovered = match &first.result {
            PageResult::Staged { meta, received, .. } if meta.has_size() => {
                Some((meta.total, implied_total_pages(meta, *received)))
            }
            _ => None,
        };

        let (total_records, total_pages, estimated) = match discovered {
            Some((total, pages)) => (total.or(claim.total_records), pages, total.is_none()),
            // A resumed run keeps what its earlier attempt discovered.
            None => (claim.total_records, claim.total_pages, claim.total_is_estimate),
        };
        policy.last_page = total_pages;

        if discovered.is_none() {
            tracing::info!(
                estimate = ?total_records,
                "Remote did not disclose its size; progress is advisory"
            );
        } else {
            tracing::info!(?total_records, ?total_pages, "Discovered dataset size");
        }
        self.emit(SyncProgress::TotalDiscovered {
            total_records,
            total_pages,
            estimated,
        });
        self.store
            .record_discovery(&claim.stream, claim.run_id, total_records, total_pages, estimated)
            .await
    }

    /// Apply one page outcome. Pages must arrive in order.
    fn apply(&self, outcome: PageOutcome, state: &mut RunState, policy: &StopPolicy) -> Option<Halt> {
        let page = outcome.page;

        // Aborting pages leave the frontier where it was so the run resumes at them.
        let terminal = match outcome.result {
            PageResult::Staged {
                received,
                staged,
                skipped,
                terminal,
                ..
            } => {
                state.current_page = page;
                state.pages_completed += 1;
                state.records_processed += staged;
                if received == 0 {
                    state.consecutive_empty += 1;
                    self.emit(SyncProgress::EmptyPage {
                        page,
                        consecutive: state.consecutive_empty,
                    });
                } else {
                    state.consecutive_empty = 0;
                }
                self.emit(SyncProgress::PageFetched {
                    page,
                    count: usize::try_from(staged).unwrap_or(usize::MAX),
                    skipped,
                    records_so_far: state.records_processed,
                    expected_pages: policy.last_page,
                });
                terminal
            }
            PageResult::FetchFailed(err) if err.is_fatal() => {
                return Some(Halt::Abort {
                    category: ErrorCategory::Fatal,
                    message: format!("Page {page}: {err}"),
                });
            }
            PageResult::FetchFailed(err) => {
                state.current_page = page;
                state.failed.push(page);
                state.consecutive_empty += 1;
                tracing::warn!(page, category = %err.category(), error = %err, "Page failed, continuing");
                self.emit(SyncProgress::PageFailed {
                    page,
                    category: err.category(),
                    error: short_error_message(&err),
                });
                false
            }
            PageResult::StageFailed(err) => {
                return Some(Halt::Abort {
                    category: ErrorCategory::Transient,
                    message: format!("Staging page {page} failed: {err}"),
                });
            }
        };

        policy
            .check(page, state.consecutive_empty, terminal)
            .map(Halt::Stop)
    }

    /// Apply buffered outcomes that continue the in-order frontier.
    fn drain_in_order(
        &self,
        pending: &mut BTreeMap<u32, PageOutcome>,
        state: &mut RunState,
        policy: &StopPolicy,
    ) -> Option<Halt> {
        while let Some(outcome) = pending.remove(&state.current_page.saturating_add(1)) {
            if let Some(halt) = self.apply(outcome, state, policy) {
                return Some(halt);
            }
        }
        None
    }

    /// Worker pool for every page after the start page.
    async fn fetch_remaining(
        &self,
        claim: &RunClaim,
        worker: &PageWorker,
        state: &mut RunState,
        policy: &StopPolicy,
        options: &SyncOptions,
    ) -> Halt {
        let concurrency = clamp_concurrency(options.concurrency);
        let ceiling = policy.last_dispensable_page();
        let next_page = Arc::new(AtomicU32::new(claim.start_page.saturating_add(1)));
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (tx, mut rx) = mpsc::channel::<PageOutcome>(concurrency * 2);

        let mut workers = JoinSet::new();
        for _ in 0..concurrency {
            workers.spawn(worker.clone().run(
                Arc::clone(&next_page),
                ceiling,
                cancel_rx.clone(),
                tx.clone(),
            ));
        }
        drop(tx);
        tracing::debug!(concurrency, ?ceiling, "Dispatching pages");

        let mut pending: BTreeMap<u32, PageOutcome> = BTreeMap::new();
        let mut ticker = tokio::time::interval(SHUTDOWN_POLL_INTERVAL);
        let mut last_ownership_check = Instant::now();

        let halt = loop {
            tokio::select! {
                received = rx.recv() => {
                    let Some(outcome) = received else {
                        // Every worker ran past the dispatch ceiling.
                        break Halt::Stop(StopReason::EndOfData { page: state.current_page });
                    };
                    pending.insert(outcome.page, outcome);
                    if let Some(halt) = self.drain_in_order(&mut pending, state, policy) {
                        break halt;
                    }
                    match self.store.record_progress(&claim.stream, claim.run_id, &state.progress()).await {
                        Ok(()) => {}
                        Err(SyncError::Superseded { .. }) => break Halt::Superseded,
                        Err(e) => break Halt::Error(e),
                    }
                }
                _ = ticker.tick() => {
                    if self.shutdown_requested() {
                        break Halt::Shutdown;
                    }
                    if last_ownership_check.elapsed() >= OWNERSHIP_CHECK_INTERVAL {
                        last_ownership_check = Instant::now();
                        match self.store.owns(&claim.stream, claim.run_id).await {
                            Ok(true) => {}
                            Ok(false) => break Halt::Superseded,
                            Err(e) => tracing::warn!(error = %e, "Ownership check failed"),
                        }
                    }
                }
            }
        };

        // Cancel in-flight fetches; dropping the receiver unblocks senders.
        let _ = cancel_tx.send(true);
        drop(rx);
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined
                && e.is_panic()
            {
                tracing::error!(error = %e, "Page worker panicked");
            }
        }
        halt
    }

    /// Mark the run failed, tolerating a lost race with a reset or the watchdog.
    async fn fail(
        &self,
        claim: &RunClaim,
        state: &RunState,
        category: ErrorCategory,
        message: &str,
    ) -> Result<()> {
        let store = &self.store;
        let progress = store
            .record_progress(&claim.stream, claim.run_id, &state.progress())
            .await;
        let failed = match progress {
            Ok(()) => {
                store
                    .fail_run(&claim.stream, claim.run_id, category, message)
                    .await
            }
            Err(e) => Err(e),
        };
        match failed {
            Ok(()) | Err(SyncError::Superseded { .. }) => {}
            Err(e) => return Err(e),
        }
        self.emit(SyncProgress::RunFinished {
            run_id: claim.run_id,
            status: SyncRunStatus::Failed,
            records_processed: state.records_processed,
            incomplete: false,
        });
        Ok(())
    }

    /// Complete the run, then merge and purge its staging rows.
    async fn finish(
        &self,
        claim: &RunClaim,
        state: &RunState,
        reason: StopReason,
        options: &SyncOptions,
    ) -> Result<SyncOutcome> {
        tracing::info!(%reason, pages = state.pages_completed, records = state.records_processed, "Stopping");
        self.emit(SyncProgress::Stopping { reason });

        self.store
            .record_progress(&claim.stream, claim.run_id, &state.progress())
            .await?;
        let done = self
            .store
            .complete_run(&claim.stream, claim.run_id, options.completeness_threshold)
            .await?;
        self.emit(SyncProgress::RunFinished {
            run_id: claim.run_id,
            status: done.status,
            records_processed: state.records_processed,
            incomplete: done.incomplete,
        });

        let merge = if options.merge_on_complete {
            Some(self.merge(claim, state, done.incomplete, options).await?)
        } else {
            None
        };

        Ok(SyncOutcome {
            run_id: claim.run_id,
            status: done.status,
            stop_reason: Some(reason),
            pages_completed: state.pages_completed,
            failed_pages: state.failed.clone(),
            records_processed: state.records_processed,
            total_records: done.total_records.and_then(|t| u64::try_from(t).ok()),
            incomplete: done.incomplete,
            merge,
        })
    }

    async fn merge(
        &self,
        claim: &RunClaim,
        state: &RunState,
        incomplete: bool,
        options: &SyncOptions,
    ) -> Result<MergeReport> {
        let mut merge_options = MergeOptions::new(self.source.source_site(), claim.sync_type);
        // Archiving needs proof the run saw every page.
        let full_coverage = !incomplete
            && state.failed.is_empty()
            && (claim.resumed || claim.start_page == 1);
        if claim.sync_type == SyncType::Full && !full_coverage {
            self.emit(SyncProgress::Warning {
                message: "Run did not cover every page; skipping archive step".to_string(),
            });
            merge_options = merge_options.without_archive();
        }

        self.merge_and_purge(claim.run_id, &merge_options, options.purge_staging)
            .await
    }

    async fn merge_and_purge(
        &self,
        run_id: Uuid,
        merge_options: &MergeOptions,
        purge_staging: bool,
    ) -> Result<MergeReport> {
        self.emit(SyncProgress::MergeStarted { run_id });
        let db = self.store.db();
        let report = merge_run(db, &self.merge_locks, run_id, merge_options).await?;
        self.emit(SyncProgress::MergeComplete {
            report: report.clone(),
        });

        if purge_staging {
            let purged = purge_run(db, run_id).await?;
            tracing::debug!(purged, "Purged staging rows");
        }
        Ok(report)
    }

    /// Merge the staged rows of a finished run again.
    ///
    /// Targets `run_id`, or the stream's last run when `None`; that run must
    /// have completed. Refused while the stream is running. Archiving only
    /// happens for the stream's last run when its row shows a complete full
    /// pass with an exact total; any other target is merged as an upsert.
    ///
    /// # Errors
    /// - `AlreadyRunning` while a run owns the stream
    /// - `NothingToMerge` when no completed run is targeted or it has no staged rows
    /// - `Repository` when the merge itself fails (it can be replayed again)
    #[tracing::instrument(skip(self))]
    pub async fn replay_merge(
        &self,
        stream: &str,
        run_id: Option<Uuid>,
        purge_staging: bool,
    ) -> Result<MergeReport> {
        let nothing = |reason: String| SyncError::NothingToMerge {
            stream: stream.to_string(),
            reason,
        };
        let row = self.store.get(stream).await?;
        if row.as_ref().is_some_and(|r| r.status == SyncRunStatus::Running) {
            return Err(SyncError::AlreadyRunning {
                stream: stream.to_string(),
            });
        }

        let last = row.filter(|r| r.run_id.is_some());
        let target = match (run_id, &last) {
            (Some(id), _) => id,
            (None, Some(r)) => match (r.status, r.run_id) {
                (SyncRunStatus::Completed, Some(id)) => id,
                (status, _) => return Err(nothing(format!("last run ended {status}"))),
            },
            (None, None) => return Err(nothing("stream has never run".to_string())),
        };

        let staged = count_staged(self.store.db(), target).await?;
        if staged == 0 {
            return Err(nothing(format!("run {target} has no staged rows")));
        }

        let site = self.source.source_site();
        let merge_options = match last.filter(|r| r.run_id == Some(target)) {
            Some(r) => {
                let full_pass = r.status == SyncRunStatus::Completed
                    && !r.incomplete
                    && r.failed_pages == 0
                    && r.total_records.is_some()
                    && !r.total_is_estimate;
                let merge_options = MergeOptions::new(site, r.sync_type);
                if full_pass {
                    merge_options
                } else {
                    merge_options.without_archive()
                }
            }
            None => MergeOptions::new(site, SyncType::Incremental),
        };

        tracing::info!(%target, staged, archive = merge_options.archive_missing, "Replaying merge");
        self.merge_and_purge(target, &merge_options, purge_staging)
            .await
    }
}
