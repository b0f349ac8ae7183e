use std::sync::Mutex;

use carcache::sync::SyncProgress;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

#[derive(Default)]
struct ProgressState {
    /// Page bar; a spinner until the page count is known.
    fetch_bar: Option<ProgressBar>,
    merge_bar: Option<ProgressBar>,
    failed_pages: u32,
}

/// Interactive progress reporter using indicatif.
pub struct InteractiveReporter {
    multi: MultiProgress,
    state: Mutex<ProgressState>,
}

impl InteractiveReporter {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            state: Mutex::new(ProgressState::default()),
        }
    }

    fn fetch_bar(&self, state: &mut ProgressState) -> ProgressBar {
        state
            .fetch_bar
            .get_or_insert_with(|| {
                let bar = self.multi.add(ProgressBar::new_spinner());
                bar.set_style(Self::spinner_style());
                bar.set_prefix(format!("{:10}", "Fetching"));
                bar.enable_steady_tick(std::time::Duration::from_millis(100));
                bar
            })
            .clone()
    }

    pub fn handle(&self, event: SyncProgress) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        match event {
            SyncProgress::RunStarted {
                start_page,
                resumed,
                sync_type,
                ..
            } => {
                let pb = self.fetch_bar(&mut state);
                pb.set_message(if resumed {
                    format!("Resuming {sync_type} sync at page {start_page}...")
                } else {
                    format!("Starting {sync_type} sync at page {start_page}...")
                });
            }

            SyncProgress::TotalDiscovered {
                total_records,
                total_pages,
                estimated,
            } => {
                let pb = self.fetch_bar(&mut state);
                if let Some(pages) = total_pages {
                    pb.disable_steady_tick();
                    pb.set_length(u64::from(pages));
                    pb.set_style(Self::bar_style());
                }
                if let Some(total) = total_records {
                    let kind = if estimated { "~" } else { "" };
                    pb.set_message(format!("{kind}{total} listings"));
                }
            }

            SyncProgress::PageFetched {
                page,
                records_so_far,
                ..
            } => {
                let pb = self.fetch_bar(&mut state);
                // Runs continue a few pages past the advertised last page.
                if let Some(len) = pb.length()
                    && u64::from(page) > len
                {
                    pb.set_length(u64::from(page));
                }
                pb.set_position(u64::from(page));
                let failed = match state.failed_pages {
                    0 => String::new(),
                    n => format!(", {n} failed"),
                };
                pb.set_message(format!("{records_so_far} listings{failed}"));
            }

            SyncProgress::PageFailed { page, error, .. } => {
                state.failed_pages += 1;
                self.multi
                    .println(format!("  page {page} failed: {error}"))
                    .ok();
            }

            SyncProgress::PageFetchRetry {
                page,
                retry_after_ms,
                attempt,
            } => {
                let pb = self.fetch_bar(&mut state);
                pb.set_message(format!(
                    "page {page} retry {attempt} in {:.1}s",
                    retry_after_ms as f64 / 1000.0
                ));
            }

            SyncProgress::Stopping { reason } => {
                if let Some(pb) = &state.fetch_bar {
                    pb.finish_with_message(format!("Stopped: {reason}"));
                }
            }

            SyncProgress::MergeStarted { .. } => {
                let pb = self.multi.add(ProgressBar::new_spinner());
                pb.set_style(Self::spinner_style());
                pb.set_prefix(format!("{:10}", "Merging"));
                pb.set_message("Merging staged listings...");
                pb.enable_steady_tick(std::time::Duration::from_millis(100));
                state.merge_bar = Some(pb);
            }

            SyncProgress::MergeComplete { report } => {
                if let Some(pb) = state.merge_bar.take() {
                    pb.finish_with_message(format!(
                        "{} new, {} updated, {} unchanged, {} archived",
                        report.inserted, report.updated, report.unchanged, report.archived
                    ));
                }
            }

            SyncProgress::Warning { message } => {
                self.multi.println(format!("  warning: {message}")).ok();
            }

            _ => {}
        }
    }

    pub fn finish(&self) {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        for pb in [&state.fetch_bar, &state.merge_bar].into_iter().flatten() {
            if !pb.is_finished() {
                pb.finish();
            }
        }
    }

    fn spinner_style() -> ProgressStyle {
        ProgressStyle::default_spinner()
            .template("{prefix:.bold.cyan} {spinner:.green} {msg}")
            .expect("Invalid template")
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
    }

    fn bar_style() -> ProgressStyle {
        ProgressStyle::default_bar()
            .template("{prefix:.bold.cyan} [{bar:40.cyan/blue}] {pos:>5}/{len:5} {msg}")
            .expect("Invalid template")
            .progress_chars("█▓░")
    }
}

impl Default for InteractiveReporter {
    fn default() -> Self {
        Self::new()
    }
}
