//! Stuck-run detection.
//!
//! [`detect_stuck`] is a pure policy over a status row. [`Watchdog`] applies it
//! periodically and force-fails stuck runs with category `stalled`, leaving
//! `resume_page` intact so the next run can resume.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;

use crate::entity::error_category::ErrorCategory;
use crate::entity::sync_status::Model;

use super::errors::{Result, SyncError};
use super::status::SyncStatusStore;

/// Default interval between watchdog checks.
pub const DEFAULT_WATCHDOG_INTERVAL: Duration = Duration::from_secs(60);

/// Thresholds for declaring a run stuck.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StuckPolicy {
    /// No heartbeat for this long.
    pub activity_timeout: Duration,
    /// Running for longer than this at all.
    pub max_run_duration: Duration,
    /// Low-progress stall: below this share of the total...
    pub low_progress_ratio: f64,
    /// ...after running at least this long...
    pub min_runtime: Duration,
    /// ...with no heartbeat for this long.
    pub short_stall_window: Duration,
}

impl Default for StuckPolicy {
    fn default() -> Self {
        Self {
            activity_timeout: Duration::from_secs(10 * 60),
            max_run_duration: Duration::from_secs(2 * 60 * 60),
            low_progress_ratio: 0.05,
            min_runtime: Duration::from_secs(10 * 60),
            short_stall_window: Duration::from_secs(3 * 60),
        }
    }
}

/// Why a run was judged stuck.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StuckReason {
    NoActivity { idle: Duration },
    RunTooLong { elapsed: Duration },
    LowProgress {
        ratio: f64,
        elapsed: Duration,
        idle: Duration,
    },
}

impl std::fmt::Display for StuckReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StuckReason::NoActivity { idle } => {
                write!(f, "no activity for {}s", idle.as_secs())
            }
            StuckReason::RunTooLong { elapsed } => {
                write!(f, "running for {}s, over the maximum run duration", elapsed.as_secs())
            }
            StuckReason::LowProgress {
                ratio,
                elapsed,
                idle,
            } => write!(
                f,
                "only {:.1}% processed after {}s, idle for {}s",
                ratio * 100.0,
                elapsed.as_secs(),
                idle.as_secs()
            ),
        }
    }
}

fn since(then: Option<DateTime<chrono::FixedOffset>>, now: DateTime<Utc>) -> Option<Duration> {
    then.map(|t| (now.fixed_offset() - t).to_std().unwrap_or(Duration::ZERO))
}

/// Decide whether a status row describes a stuck run.
///
/// Only `running` rows can be stuck. A row without a heartbeat is measured
/// from its start time.
pub fn detect_stuck(status: &Model, now: DateTime<Utc>, policy: &StuckPolicy) -> Option<StuckReason> {
    if !status.is_running() {
        return None;
    }
    let elapsed = since(status.started_at, now)?;
    let idle = since(status.last_activity_at, now).unwrap_or(elapsed);

    if idle > policy.activity_timeout {
        return Some(StuckReason::NoActivity { idle });
    }
    if elapsed > policy.max_run_duration {
        return Some(StuckReason::RunTooLong { elapsed });
    }
    if let Some(ratio) = status.progress_ratio()
        && ratio < policy.low_progress_ratio
        && elapsed > policy.min_runtime
        && idle > policy.short_stall_window
    {
        return Some(StuckReason::LowProgress {
            ratio,
            elapsed,
            idle,
        });
    }
    None
}

/// Periodic stuck-run checker for one stream.
#[derive(Debug, Clone)]
pub struct Watchdog {
    store: SyncStatusStore,
    stream: String,
    policy: StuckPolicy,
    interval: Duration,
}

impl Watchdog {
    pub fn new(store: SyncStatusStore, stream: impl Into<String>) -> Self {
        Self {
            store,
            stream: stream.into(),
            policy: StuckPolicy::default(),
            interval: DEFAULT_WATCHDOG_INTERVAL,
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: StuckPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(Duration::from_secs(1));
        self
    }

    pub fn policy(&self) -> &StuckPolicy {
        &self.policy
    }

    /// Check the stream once, failing the run if it is stuck.
    ///
    /// Returns the reason when a run was failed.
    pub async fn check_once(&self) -> Result<Option<StuckReason>> {
        self.check_at(Utc::now()).await
    }

    /// [`check_once`](Self::check_once) against an explicit clock.
    pub async fn check_at(&self, now: DateTime<Utc>) -> Result<Option<StuckReason>> {
        let Some(status) = self.store.get(&self.stream).await? else {
            return Ok(None);
        };
        let (Some(reason), Some(run_id)) = (detect_stuck(&status, now, &self.policy), status.run_id)
        else {
            return Ok(None);
        };

        let message = format!("Watchdog: run stalled ({reason}); resume from page {}", status.resume_page);
        match self
            .store
            .fail_run(&self.stream, run_id, ErrorCategory::Stalled, &message)
            .await
        {
            Ok(()) => {
                tracing::warn!(stream = %self.stream, %run_id, %reason, "Failed stuck sync run");
                Ok(Some(reason))
            }
            // The run finished (or was reset) since we read it.
            Err(SyncError::Superseded { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Run checks every interval until `shutdown` is set.
    pub fn spawn(self, shutdown: Arc<AtomicBool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            tracing::debug!(stream = %self.stream, interval_secs = self.interval.as_secs(), "Watchdog started");
            loop {
                ticker.tick().await;
                if shutdown.load(Ordering::SeqCst) {
                    break;
                }
                if let Err(e) = self.check_once().await {
                    tracing::warn!(stream = %self.stream, error = %e, "Watchdog check failed");
                }
            }
            tracing::debug!(stream = %self.stream, "Watchdog stopped");
        })
    }
}
