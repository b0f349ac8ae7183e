use carcache::db;
use carcache::sync::{SyncStatusStore, Watchdog};

use crate::config::Config;
use crate::shutdown::Shutdown;

/// Watchdog for the configured stream.
pub(crate) fn build_watchdog(store: SyncStatusStore, config: &Config) -> Watchdog {
    Watchdog::new(store, config.sync.stream.clone())
        .with_policy(config.stuck_policy())
        .with_interval(config.watchdog_interval())
}

pub(crate) async fn handle_watchdog(
    once: bool,
    config: &Config,
    database_url: &str,
    shutdown: &Shutdown,
) -> Result<(), Box<dyn std::error::Error>> {
    let db = db::connect_and_migrate(database_url).await?;
    let watchdog = build_watchdog(SyncStatusStore::new(db), config);

    if once {
        match watchdog.check_once().await? {
            Some(reason) => println!("Stream '{}' was stuck ({reason}); marked failed.", config.sync.stream),
            None => println!("Stream '{}' is healthy.", config.sync.stream),
        }
        return Ok(());
    }

    tracing::info!(
        stream = %config.sync.stream,
        interval_secs = config.watchdog_interval().as_secs(),
        "Watching for stuck sync runs"
    );
    watchdog.spawn(shutdown.flag()).await?;
    Ok(())
}
