//! Retry policy for remote page fetches.
//!
//! Transient failures back off exponentially with jitter. A 429 waits at least
//! as long as its `Retry-After` hint. Anything else is returned immediately so
//! the caller can branch on [`FetchError::category`].

use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};

use crate::rate_limit::ApiRateLimiter;
use crate::remote::{FetchError, ListingPage, ListingSource, short_error_message};
use crate::sync::{
    DEFAULT_MAX_RETRIES, INITIAL_BACKOFF_MS, MAX_BACKOFF_MS, ProgressCallback, SyncProgress, emit,
};

/// Configuration for retry operations.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Minimum delay between retries.
    pub min_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Maximum number of retries after the first attempt.
    pub max_retries: usize,
    /// Whether to add jitter to delays.
    pub with_jitter: bool,
    /// Time budget for a single attempt.
    pub attempt_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_millis(INITIAL_BACKOFF_MS),
            max_delay: Duration::from_millis(MAX_BACKOFF_MS),
            max_retries: DEFAULT_MAX_RETRIES as usize,
            with_jitter: true,
            attempt_timeout: crate::sync::DEFAULT_FETCH_TIMEOUT,
        }
    }
}

impl RetryConfig {
    /// Create a new retry configuration with custom values.
    #[must_use]
    pub fn new(min_delay: Duration, max_delay: Duration, max_retries: usize) -> Self {
        Self {
            min_delay,
            max_delay,
            max_retries,
            ..Self::default()
        }
    }

    /// Set whether to use jitter.
    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.with_jitter = jitter;
        self
    }

    /// Set the per-attempt timeout.
    #[must_use]
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Build an exponential backoff strategy from this configuration.
    #[must_use]
    pub fn into_backoff(self) -> ExponentialBuilder {
        let mut builder = ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_retries);

        if self.with_jitter {
            builder = builder.with_jitter();
        }

        builder
    }
}

/// Build the default exponential backoff strategy: 1 s initial delay, 60 s
/// ceiling, 5 retries, jitter.
#[must_use]
pub fn default_backoff() -> ExponentialBuilder {
    RetryConfig::default().into_backoff()
}

/// Fetch one page, retrying transient failures.
///
/// Each attempt first takes a permit from `limiter`, then runs under
/// `config.attempt_timeout`; time spent queued on the limiter never counts
/// against the attempt. The permit is released before any backoff sleep.
/// Fatal and partial-data errors are returned on first occurrence; transient
/// errors are returned once retries are exhausted.
pub async fn fetch_page_with_retry(
    source: &dyn ListingSource,
    page: u32,
    config: &RetryConfig,
    limiter: Option<&ApiRateLimiter>,
    on_progress: Option<&ProgressCallback>,
) -> Result<ListingPage, FetchError> {
    let mut delays = config.clone().into_backoff().build();
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        let result = {
            let _permit = match limiter {
                Some(limiter) => Some(limiter.acquire().await),
                None => None,
            };
            match tokio::time::timeout(config.attempt_timeout, source.fetch_page(page)).await {
                Ok(result) => result,
                Err(_) => Err(FetchError::Timeout {
                    after: config.attempt_timeout,
                }),
            }
        };

        let err = match result {
            Ok(listing_page) => return Ok(listing_page),
            Err(err) => err,
        };

        if !err.is_retryable() {
            return Err(err);
        }

        let Some(backoff) = delays.next() else {
            tracing::warn!(page, attempts = attempt, error = %err, "Page fetch retries exhausted");
            return Err(err);
        };
        let delay = match err.retry_after() {
            Some(hint) => backoff.max(hint),
            None => backoff,
        };

        emit(
            on_progress,
            SyncProgress::PageFetchRetry {
                page,
                retry_after_ms: delay.as_millis() as u64,
                attempt,
            },
        );
        tracing::debug!(
            page,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Retrying page fetch: {}",
            short_error_message(&err)
        );
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use crate::entity::error_category::ErrorCategory;

    /// Replays scripted results, then succeeds with an empty page.
    struct ScriptedSource {
        script: Mutex<VecDeque<Result<ListingPage, FetchError>>>,
        calls: AtomicU32,
        hang: bool,
    }

    impl ScriptedSource {
        fn new(script: Vec<Result<ListingPage, FetchError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: AtomicU32::new(0),
                hang: false,
            }
        }
    }

    #[async_trait]
    impl ListingSource for ScriptedSource {
        fn source_site(&self) -> &str {
            "test"
        }

        async fn fetch_page(&self, page: u32) -> Result<ListingPage, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.hang {
                std::future::pending::<()>().await;
            }
            self.script
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .pop_front()
                .unwrap_or_else(|| Ok(ListingPage::empty(page)))
        }
    }

    fn collecting_callback() -> (ProgressCallback, Arc<Mutex<Vec<SyncProgress>>>) {
        let events: Arc<Mutex<Vec<SyncProgress>>> = Arc::new(Mutex::new(Vec::new()));
        let capture = Arc::clone(&events);
        let callback: ProgressCallback = Box::new(move |event| {
            capture.lock().unwrap_or_else(|e| e.into_inner()).push(event);
        });
        (callback, events)
    }

    #[test]
    fn test_retry_config_default() {
        let config = RetryConfig::default();

        assert_eq!(config.min_delay, Duration::from_millis(INITIAL_BACKOFF_MS));
        assert_eq!(config.max_delay, Duration::from_millis(MAX_BACKOFF_MS));
        assert_eq!(config.max_retries, DEFAULT_MAX_RETRIES as usize);
        assert!(config.with_jitter);
    }

    #[test]
    fn test_backoff_yields_max_retries_delays_within_bounds() {
        let config = RetryConfig::new(Duration::from_secs(1), Duration::from_secs(60), 5)
            .with_jitter(false);
        let delays: Vec<Duration> = config.into_backoff().build().collect();
        assert_eq!(delays.len(), 5);
        assert_eq!(delays[0], Duration::from_secs(1));
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert!(delays.iter().all(|d| *d <= Duration::from_secs(60)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_are_retried_until_success() {
        let source = ScriptedSource::new(vec![
            Err(FetchError::Server { status: 503 }),
            Err(FetchError::network("reset")),
        ]);
        let (callback, events) = collecting_callback();

        let page = fetch_page_with_retry(&source, 4, &RetryConfig::default(), None, Some(&callback))
            .await
            .expect("third attempt succeeds");

        assert_eq!(page.page, 4);
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
        let events = events.lock().unwrap_or_else(|e| e.into_inner());
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, SyncProgress::PageFetchRetry { page: 4, .. }))
                .count(),
            2
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_hint_is_a_floor() {
        let source = ScriptedSource::new(vec![Err(FetchError::RateLimited {
            retry_after: Some(Duration::from_secs(120)),
        })]);
        let (callback, events) = collecting_callback();

        let started = tokio::time::Instant::now();
        fetch_page_with_retry(&source, 1, &RetryConfig::default(), None, Some(&callback))
            .await
            .expect("succeeds after waiting");

        assert!(started.elapsed() >= Duration::from_secs(120));
        let events = events.lock().unwrap_or_else(|e| e.into_inner());
        assert!(events.iter().any(|e| matches!(
            e,
            SyncProgress::PageFetchRetry { retry_after_ms, .. } if *retry_after_ms >= 120_000
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_return_last_error() {
        let script = (0..10).map(|_| Err(FetchError::Server { status: 500 })).collect();
        let source = ScriptedSource::new(script);
        let config = RetryConfig::new(Duration::from_millis(10), Duration::from_millis(100), 2);

        let err = fetch_page_with_retry(&source, 9, &config, None, None)
            .await
            .expect_err("retries exhausted");

        assert!(matches!(err, FetchError::Server { status: 500 }));
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fatal_errors_are_not_retried() {
        let source = ScriptedSource::new(vec![Err(FetchError::Auth { status: 401 })]);

        let err = fetch_page_with_retry(&source, 1, &RetryConfig::default(), None, None)
            .await
            .expect_err("fatal");

        assert_eq!(err.category(), ErrorCategory::Fatal);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_decode_errors_are_not_retried() {
        let source = ScriptedSource::new(vec![Err(FetchError::decode("bad json"))]);

        let err = fetch_page_with_retry(&source, 1, &RetryConfig::default(), None, None)
            .await
            .expect_err("partial data");

        assert_eq!(err.category(), ErrorCategory::PartialData);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_attempts_time_out_and_count_as_transient() {
        let mut source = ScriptedSource::new(Vec::new());
        source.hang = true;
        let config = RetryConfig::new(Duration::from_millis(10), Duration::from_millis(10), 1)
            .with_attempt_timeout(Duration::from_secs(30));

        let err = fetch_page_with_retry(&source, 2, &config, None, None)
            .await
            .expect_err("times out");

        assert!(matches!(err, FetchError::Timeout { after } if after == Duration::from_secs(30)));
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_limiter_queue_time_does_not_count_against_attempt_timeout() {
        // One token per second: the fourth request queues about three seconds,
        // twice the per-attempt budget, yet each fetch itself is instant.
        let source = Arc::new(ScriptedSource::new(Vec::new()));
        let limiter = ApiRateLimiter::new(4, 1);
        let config = RetryConfig::new(Duration::from_millis(10), Duration::from_millis(10), 0)
            .with_attempt_timeout(Duration::from_millis(1_500));

        let mut tasks = tokio::task::JoinSet::new();
        for page in 1..=4 {
            let source = Arc::clone(&source);
            let limiter = limiter.clone();
            let config = config.clone();
            tasks.spawn(async move {
                fetch_page_with_retry(source.as_ref(), page, &config, Some(&limiter), None).await
            });
        }

        let mut fetched = 0;
        while let Some(joined) = tasks.join_next().await {
            joined.expect("task").expect("no attempt should time out while queued");
            fetched += 1;
        }
        assert_eq!(fetched, 4);
        assert_eq!(source.calls.load(Ordering::SeqCst), 4);
        assert_eq!(limiter.available_slots(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permit_is_released_during_backoff() {
        let source = ScriptedSource::new(vec![Err(FetchError::Server { status: 503 })]);
        let limiter = ApiRateLimiter::new(1, 1_000);
        let config = RetryConfig::new(Duration::from_secs(5), Duration::from_secs(5), 1)
            .with_jitter(false);

        let fetch = fetch_page_with_retry(&source, 3, &config, Some(&limiter), None);
        tokio::pin!(fetch);
        // Drive the first attempt into its backoff sleep.
        tokio::select! {
            _ = &mut fetch => panic!("should be backing off"),
            _ = tokio::time::sleep(Duration::from_secs(1)) => {}
        }
        assert_eq!(limiter.available_slots(), 1);

        fetch.await.expect("second attempt succeeds");
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }
}
