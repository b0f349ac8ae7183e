use std::sync::Arc;

use carcache::db;
use carcache::repository::purge_older_than;
use carcache::sync::SyncStatusStore;
use chrono::{Duration, Utc};

use crate::config::Config;

pub(crate) async fn handle_purge_staging(
    older_than_days: u32,
    config: &Config,
    database_url: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let db = Arc::new(db::connect_and_migrate(database_url).await?);

    // Never sweep rows a resumable run still needs.
    let keep_run = SyncStatusStore::new(Arc::clone(&db))
        .get(&config.sync.stream)
        .await?
        .and_then(|row| row.run_id);

    let cutoff = Utc::now() - Duration::days(i64::from(older_than_days));
    let deleted = purge_older_than(db.as_ref(), cutoff, keep_run).await?;

    println!("Deleted {deleted} staged row(s) older than {older_than_days} day(s).");
    Ok(())
}
