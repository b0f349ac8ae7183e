//! Derived progress view of a sync status row.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::entity::sync_status::Model;

/// A status row plus percent complete and ETA.
#[derive(Debug, Clone, Serialize)]
pub struct SyncSnapshot {
    #[serde(flatten)]
    pub status: Model,
    /// Percent of the (discovered or estimated) total, clamped to [0, 100].
    pub percent: Option<f64>,
    /// Records per second since the run started.
    pub records_per_second: Option<f64>,
    /// Seconds until the remaining records are processed at the measured rate.
    pub eta_seconds: Option<u64>,
}

/// Percent of `total` covered by `processed`, clamped to [0, 100].
pub fn progress_percent(processed: i64, total: Option<i64>) -> Option<f64> {
    match total {
        Some(total) if total > 0 => Some((processed as f64 / total as f64 * 100.0).clamp(0.0, 100.0)),
        _ => None,
    }
}

/// Measured throughput: records over the time between start and last heartbeat.
pub fn throughput(status: &Model) -> Option<f64> {
    let started = status.started_at?;
    let last = status.last_activity_at?;
    let elapsed = (last - started).num_milliseconds();
    if elapsed <= 0 || status.records_processed <= 0 {
        return None;
    }
    Some(status.records_processed as f64 / (elapsed as f64 / 1000.0))
}

impl SyncSnapshot {
    /// Derive the snapshot. ETA is only given for running rows with a known
    /// total and measurable throughput.
    pub fn from_status(status: Model, now: DateTime<Utc>) -> Self {
        let percent = progress_percent(status.records_processed, status.total_records);
        let records_per_second = throughput(&status);
        let eta_seconds = match (status.is_running(), records_per_second, status.total_records) {
            (true, Some(rate), Some(total)) => {
                let remaining = (total - status.records_processed).max(0) as f64;
                let since_heartbeat = status
                    .last_activity_at
                    .map(|last| (now.fixed_offset() - last).num_seconds().max(0))
                    .unwrap_or(0) as f64;
                // Time already spent since the last heartbeat counts toward the remainder.
                Some((remaining / rate - since_heartbeat).max(0.0).round() as u64)
            }
            _ => None,
        };

        Self {
            status,
            percent,
            records_per_second,
            eta_seconds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    use crate::entity::sync_run_status::{SyncRunStatus, SyncType};

    fn running(processed: i64, total: Option<i64>, elapsed_secs: i64) -> (Model, DateTime<Utc>) {
        let now = Utc::now();
        let started = (now - Duration::seconds(elapsed_secs)).fixed_offset();
        let model = Model {
            stream: "main".to_string(),
            status: SyncRunStatus::Running,
            run_id: None,
            sync_type: SyncType::Full,
            started_at: Some(started),
            last_activity_at: Some(now.fixed_offset()),
            finished_at: None,
            current_page: 0,
            resume_page: 1,
            total_pages: None,
            records_processed: processed,
            total_records: total,
            total_is_estimate: false,
            failed_pages: 0,
            consecutive_empty_pages: 0,
            error_message: None,
            error_category: None,
            incomplete: false,
            updated_at: now.fixed_offset(),
        };
        (model, now)
    }

    #[test]
    fn test_percent_is_clamped() {
        assert_eq!(progress_percent(50, Some(200)), Some(25.0));
        assert_eq!(progress_percent(300, Some(200)), Some(100.0));
        assert_eq!(progress_percent(-5, Some(200)), Some(0.0));
        assert_eq!(progress_percent(5, Some(0)), None);
        assert_eq!(progress_percent(5, None), None);
    }

    #[test]
    fn test_eta_from_throughput() {
        // 1000 records in 100 s -> 10/s; 4000 remaining -> 400 s.
        let (model, now) = running(1_000, Some(5_000), 100);
        let snapshot = SyncSnapshot::from_status(model, now);
        assert_eq!(snapshot.percent, Some(20.0));
        let eta = snapshot.eta_seconds.expect("eta");
        assert!((399..=401).contains(&eta));
    }

    #[test]
    fn test_eta_never_negative() {
        let (model, now) = running(6_000, Some(5_000), 100);
        let snapshot = SyncSnapshot::from_status(model, now);
        assert_eq!(snapshot.eta_seconds, Some(0));
    }

    #[test]
    fn test_eta_unknown_without_throughput_or_total() {
        let (model, now) = running(0, Some(5_000), 100);
        assert_eq!(SyncSnapshot::from_status(model, now).eta_seconds, None);

        let (model, now) = running(1_000, None, 100);
        let snapshot = SyncSnapshot::from_status(model, now);
        assert_eq!(snapshot.eta_seconds, None);
        assert_eq!(snapshot.percent, None);
    }

    #[test]
    fn test_no_eta_for_finished_runs() {
        let (mut model, now) = running(1_000, Some(5_000), 100);
        model.status = SyncRunStatus::Failed;
        assert_eq!(SyncSnapshot::from_status(model, now).eta_seconds, None);
    }
}
