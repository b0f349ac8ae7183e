//! Outbound request limiting for the auction API.
//!
//! Two limits apply to every page fetch: a token bucket bounding requests per
//! second, and a semaphore bounding requests in flight. A worker holds a
//! [`RequestPermit`] for the duration of one fetch attempt; see
//! [`crate::retry::fetch_page_with_retry`].

use std::num::NonZeroU32;
use std::sync::Arc;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Type alias for the governor rate limiter.
type GovernorRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Bounds applied to user-supplied limits.
pub mod limits {
    pub const MIN_CONCURRENCY: usize = 1;
    pub const MAX_CONCURRENCY: usize = 64;
    pub const MIN_RPS: u32 = 1;
    pub const MAX_RPS: u32 = 1_000;
    /// Auction feeds tolerate a handful of requests per second.
    pub const DEFAULT_RPS: u32 = 5;
}

/// Clamp a requested worker count into the supported range.
#[inline]
pub fn clamp_concurrency(concurrency: usize) -> usize {
    concurrency.clamp(limits::MIN_CONCURRENCY, limits::MAX_CONCURRENCY)
}

/// Clamp a requested rate into the supported range.
#[inline]
pub fn clamp_rps(requests_per_second: u32) -> u32 {
    requests_per_second.clamp(limits::MIN_RPS, limits::MAX_RPS)
}

/// Shared request limiter: requests per second plus in-flight cap.
///
/// Cloning shares the same bucket and semaphore.
///
/// # Example
///
/// ```ignore
/// use carcache::rate_limit::ApiRateLimiter;
///
/// let limiter = ApiRateLimiter::new(8, 5);
/// let _permit = limiter.acquire().await;
/// source.fetch_page(page).await?;
/// ```
#[derive(Clone)]
pub struct ApiRateLimiter {
    bucket: Arc<GovernorRateLimiter>,
    in_flight: Arc<Semaphore>,
    concurrency: usize,
    requests_per_second: u32,
}

/// Held while a request is in flight; dropping it frees the slot.
#[derive(Debug)]
pub struct RequestPermit {
    _slot: Option<OwnedSemaphorePermit>,
}

impl ApiRateLimiter {
    /// Create a limiter. Both arguments are clamped into their supported ranges.
    pub fn new(concurrency: usize, requests_per_second: u32) -> Self {
        let concurrency = clamp_concurrency(concurrency);
        let requests_per_second = clamp_rps(requests_per_second);
        let rps = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);

        Self {
            bucket: Arc::new(RateLimiter::direct(Quota::per_second(rps))),
            in_flight: Arc::new(Semaphore::new(concurrency)),
            concurrency,
            requests_per_second,
        }
    }

    /// Wait for an in-flight slot, then for a token from the bucket.
    ///
    /// The slot is taken first so that queued workers do not drain tokens they
    /// cannot use yet.
    pub async fn acquire(&self) -> RequestPermit {
        // The semaphore is never closed, so acquisition cannot fail.
        let slot = Arc::clone(&self.in_flight).acquire_owned().await.ok();
        self.bucket.until_ready().await;
        RequestPermit { _slot: slot }
    }

    /// Effective (clamped) concurrency.
    #[inline]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Effective (clamped) requests per second.
    #[inline]
    pub fn requests_per_second(&self) -> u32 {
        self.requests_per_second
    }

    /// Slots currently free.
    pub fn available_slots(&self) -> usize {
        self.in_flight.available_permits()
    }
}

impl std::fmt::Debug for ApiRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiRateLimiter")
            .field("concurrency", &self.concurrency)
            .field("requests_per_second", &self.requests_per_second)
            .finish()
    }
}
