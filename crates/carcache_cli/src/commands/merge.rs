use carcache::db;
use uuid::Uuid;

use super::sync::build_orchestrator;
use crate::config::Config;
use crate::shutdown::Shutdown;

/// Replay the merge of a finished run, by default the stream's last one.
pub(crate) async fn handle_merge(
    run_id: Option<Uuid>,
    keep_staging: bool,
    config: &Config,
    database_url: &str,
    shutdown: &Shutdown,
) -> Result<(), Box<dyn std::error::Error>> {
    let db = db::connect_and_migrate(database_url).await?;
    let orchestrator = build_orchestrator(config, db, shutdown)?;
    let purge = config.sync_options().purge_staging && !keep_staging;

    let report = orchestrator
        .replay_merge(&config.sync.stream, run_id, purge)
        .await?;

    println!(
        "Merged run {}: {} staged, {} new, {} updated, {} unchanged, {} archived",
        report.run_id,
        report.staged,
        report.inserted,
        report.updated,
        report.unchanged,
        report.archived
    );
    if !purge {
        println!(
            "Staging rows kept; `carcache merge --run-id {}` can replay it again.",
            report.run_id
        );
    }
    Ok(())
}
