use std::sync::Arc;

use carcache::db;
use carcache::repository::{CacheStats, cache_stats};
use carcache::sync::{SyncSnapshot, SyncStatusStore};
use chrono::{DateTime, FixedOffset, Utc};
use console::Term;
use serde::Serialize;

use crate::config::Config;

#[derive(Serialize)]
struct StatusReport {
    stream: String,
    sync: Option<SyncSnapshot>,
    cache: CacheStats,
}

pub(crate) async fn handle_status(
    json: bool,
    config: &Config,
    database_url: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let db = Arc::new(db::connect_and_migrate(database_url).await?);
    let store = SyncStatusStore::new(Arc::clone(&db));
    let stream = config.sync.stream.clone();

    let sync = store
        .get(&stream)
        .await?
        .map(|row| SyncSnapshot::from_status(row, Utc::now()));
    let cache = cache_stats(db.as_ref()).await?;
    let report = StatusReport {
        stream,
        sync,
        cache,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn print_report(report: &StatusReport) {
    println!("Stream '{}'", report.stream);
    match &report.sync {
        None => println!("  No sync has run yet."),
        Some(snapshot) => {
            let row = &snapshot.status;
            println!("  Status:    {} ({})", row.status, row.sync_type);
            if let Some(run_id) = row.run_id {
                println!("  Run:       {run_id}");
            }
            println!("  Started:   {}", format_time(row.started_at));
            println!("  Activity:  {}", format_time(row.last_activity_at));
            if row.finished_at.is_some() {
                println!("  Finished:  {}", format_time(row.finished_at));
            }

            let total = match row.total_records {
                Some(total) if row.total_is_estimate => format!(" of ~{total}"),
                Some(total) => format!(" of {total}"),
                None => String::new(),
            };
            let percent = snapshot
                .percent
                .map(|p| format!(" ({p:.1}%)"))
                .unwrap_or_default();
            println!("  Records:   {}{total}{percent}", row.records_processed);
            match row.total_pages {
                Some(pages) => println!("  Page:      {} of {pages}", row.current_page),
                None => println!("  Page:      {}", row.current_page),
            }
            println!("  Resume at: page {}", row.resume_page);
            if row.failed_pages > 0 {
                println!("  Failed:    {} page(s)", row.failed_pages);
            }
            if let Some(rate) = snapshot.records_per_second {
                println!("  Rate:      {rate:.1} records/s");
            }
            if let Some(eta) = snapshot.eta_seconds {
                println!("  ETA:       {}", format_duration(eta));
            }
            if row.incomplete {
                println!("  Warning:   last run finished incomplete");
            }
            if let Some(message) = &row.error_message {
                let category = row
                    .error_category
                    .map(|c| format!("{c}: "))
                    .unwrap_or_default();
                println!("  Error:     {category}{message}");
            }
        }
    }

    let cache = &report.cache;
    println!();
    println!("Cache: {} listings ({} open)", cache.total, cache.open());
    for (status, count) in &cache.by_status {
        println!("  {status:10} {count}");
    }
    if let Some(last) = cache.last_api_sync {
        println!("  Last sync: {}", last.format("%Y-%m-%d %H:%M:%S %:z"));
    }
}

pub(crate) async fn handle_reset(
    reason: Option<String>,
    config: &Config,
    database_url: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let db = db::connect_and_migrate(database_url).await?;
    let store = SyncStatusStore::new(db);
    let reason = reason.unwrap_or_else(|| "Reset by operator".to_string());

    let row = store.reset(&config.sync.stream, &reason).await?;
    if Term::stdout().is_term() {
        println!(
            "Reset stream '{}'. Run `carcache sync --resume` to continue at page {}.",
            row.stream, row.resume_page
        );
    } else {
        tracing::info!(stream = %row.stream, resume_page = row.resume_page, "Sync reset");
    }
    Ok(())
}

fn format_time(time: Option<DateTime<FixedOffset>>) -> String {
    time.map(|t| t.format("%Y-%m-%d %H:%M:%S %:z").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn format_duration(secs: u64) -> String {
    match secs {
        0..60 => format!("{secs}s"),
        60..3600 => format!("{}m {}s", secs / 60, secs % 60),
        _ => format!("{}h {}m", secs / 3600, (secs % 3600) / 60),
    }
}
