use std::sync::Arc;

use carcache::entity::sync_run_status::SyncType;
use carcache::remote::AuctionApiClient;
use carcache::sync::{
    StartPage, SyncError, SyncOptions, SyncOrchestrator, SyncOutcome, SyncStatusStore,
};
use carcache::{ListingSource, db};
use console::Term;
use sea_orm::DatabaseConnection;

use crate::SyncArgs;
use crate::config::Config;
use crate::progress::ProgressReporter;
use crate::shutdown::Shutdown;

/// Build the remote client from the `[api]` section.
pub(crate) fn build_source(
    config: &Config,
) -> Result<Arc<dyn ListingSource>, Box<dyn std::error::Error>> {
    let api = config.api_client_config().ok_or(
        "No API base URL configured. Set [api] base_url in carcache.toml or CARCACHE_API_BASE_URL.",
    )?;
    Ok(Arc::new(AuctionApiClient::from_config(api)?))
}

/// Orchestrator over the configured remote, stopping on `shutdown`.
pub(crate) fn build_orchestrator(
    config: &Config,
    db: DatabaseConnection,
    shutdown: &Shutdown,
) -> Result<SyncOrchestrator, Box<dyn std::error::Error>> {
    let source = build_source(config)?;
    Ok(SyncOrchestrator::new(SyncStatusStore::new(db), source).with_shutdown(shutdown.flag()))
}

/// Merge CLI flags over the configured sync options.
pub(crate) fn sync_options(args: &SyncArgs, config: &Config) -> SyncOptions {
    let mut options = config.sync_options();
    if args.incremental {
        options.sync_type = SyncType::Incremental;
    }
    options.start = if args.resume {
        StartPage::Resume
    } else {
        StartPage::Page(args.from_page.unwrap_or(1).max(1))
    };
    if let Some(concurrency) = args.concurrency {
        options.concurrency = concurrency;
    }
    if let Some(rps) = args.rps {
        options.requests_per_second = rps;
    }
    if args.no_merge {
        options.merge_on_complete = false;
    }
    options
}

pub(crate) async fn handle_sync(
    args: SyncArgs,
    config: &Config,
    database_url: &str,
    shutdown: &Shutdown,
) -> Result<(), Box<dyn std::error::Error>> {
    let db = db::connect_and_migrate(database_url).await?;
    let options = sync_options(&args, config);

    let reporter = Arc::new(ProgressReporter::new());
    let orchestrator =
        build_orchestrator(config, db, shutdown)?.with_progress(reporter.as_callback());

    let result = orchestrator.run(&options).await;
    reporter.finish();

    match result {
        Ok(outcome) => {
            print_outcome(&outcome);
            Ok(())
        }
        Err(SyncError::Cancelled {
            run_id,
            resume_page,
        }) => {
            if Term::stdout().is_term() {
                println!(
                    "Sync interrupted. Run `carcache sync --resume` to continue at page {resume_page}."
                );
            } else {
                tracing::warn!(%run_id, resume_page, "Sync interrupted");
            }
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn print_outcome(outcome: &SyncOutcome) {
    if !Term::stdout().is_term() {
        // LoggingReporter already logged the run.
        return;
    }

    println!();
    println!("Run {} {}", outcome.run_id, outcome.status);
    if let Some(reason) = outcome.stop_reason {
        println!("  Stopped:   {reason}");
    }
    match outcome.total_records {
        Some(total) => println!("  Records:   {} of {total}", outcome.records_processed),
        None => println!("  Records:   {}", outcome.records_processed),
    }
    println!("  Pages:     {}", outcome.pages_completed);
    if !outcome.failed_pages.is_empty() {
        println!(
            "  Failed:    {} page(s): {}",
            outcome.failed_pages.len(),
            format_pages(&outcome.failed_pages)
        );
    }
    if outcome.incomplete {
        println!("  Warning:   fewer records than the remote reported; listings were not archived");
    }
    if let Some(report) = &outcome.merge {
        println!(
            "  Merged:    {} new, {} updated, {} unchanged, {} archived",
            report.inserted, report.updated, report.unchanged, report.archived
        );
    }
}

/// Comma-separated page list, truncated after ten entries.
fn format_pages(pages: &[u32]) -> String {
    const SHOWN: usize = 10;
    let mut shown: Vec<String> = pages.iter().take(SHOWN).map(u32::to_string).collect();
    if pages.len() > SHOWN {
        shown.push(format!("... (+{})", pages.len() - SHOWN));
    }
    shown.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> SyncArgs {
        SyncArgs {
            incremental: false,
            from_page: None,
            resume: false,
            concurrency: None,
            rps: None,
            no_merge: false,
        }
    }

    #[test]
    fn test_flags_override_config() {
        let config = Config::default();
        let options = sync_options(
            &SyncArgs {
                incremental: true,
                from_page: Some(40),
                concurrency: Some(12),
                rps: Some(30),
                no_merge: true,
                ..args()
            },
            &config,
        );
        assert_eq!(options.sync_type, SyncType::Incremental);
        assert_eq!(options.start, StartPage::Page(40));
        assert_eq!(options.concurrency, 12);
        assert_eq!(options.requests_per_second, 30);
        assert!(!options.merge_on_complete);
    }

    #[test]
    fn test_defaults_and_resume() {
        let config = Config::default();
        let options = sync_options(&args(), &config);
        assert_eq!(options.sync_type, SyncType::Full);
        assert_eq!(options.start, StartPage::Page(1));
        assert!(options.merge_on_complete);

        let options = sync_options(
            &SyncArgs {
                resume: true,
                ..args()
            },
            &config,
        );
        assert_eq!(options.start, StartPage::Resume);

        let options = sync_options(
            &SyncArgs {
                from_page: Some(0),
                ..args()
            },
            &config,
        );
        assert_eq!(options.start, StartPage::Page(1));
    }

    #[test]
    fn test_missing_base_url_is_an_error() {
        let err = build_source(&Config::default()).err().expect("no base url");
        assert!(err.to_string().contains("CARCACHE_API_BASE_URL"));
    }

    #[test]
    fn test_format_pages_truncates() {
        assert_eq!(format_pages(&[3, 7]), "3, 7");
        let pages: Vec<u32> = (1..=12).collect();
        assert_eq!(format_pages(&pages), "1, 2, 3, 4, 5, 6, 7, 8, 9, 10, ... (+2)");
    }
}
