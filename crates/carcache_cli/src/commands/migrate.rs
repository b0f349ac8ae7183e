use std::sync::Arc;

use carcache::db;
use carcache::migration::{Migrator, MigratorTrait};
use carcache::sync::SyncStatusStore;

use crate::MigrateAction;
use crate::config::Config;

pub(crate) async fn handle_migrate(
    action: MigrateAction,
    config: &Config,
    database_url: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let db = Arc::new(db::connect(database_url).await?);

    match action {
        MigrateAction::Up => {
            let pending = Migrator::get_pending_migrations(db.as_ref()).await?;
            if pending.is_empty() {
                println!("Schema is up to date.");
                return Ok(());
            }
            println!("Applying {} migration(s)...", pending.len());
            for migration in &pending {
                println!("  {}", migration.name());
            }
            Migrator::up(db.as_ref(), None).await?;
            println!("Migrations applied successfully.");
        }
        MigrateAction::Down => {
            println!("Rolling back last migration...");
            Migrator::down(db.as_ref(), Some(1)).await?;
            println!("Rollback complete.");
        }
        MigrateAction::Status => {
            println!("Migration status:");
            Migrator::status(db.as_ref()).await?;
        }
        MigrateAction::Fresh => {
            // Dropping the tables under a live run would strand its workers.
            if Migrator::get_pending_migrations(db.as_ref()).await?.is_empty()
                && let Some(row) = SyncStatusStore::new(Arc::clone(&db))
                    .get(&config.sync.stream)
                    .await?
                && row.is_running()
            {
                return Err(format!(
                    "Stream '{}' has a running sync; run `carcache reset` first.",
                    row.stream
                )
                .into());
            }
            println!("Dropping all tables and reapplying migrations...");
            Migrator::fresh(db.as_ref()).await?;
            println!("Fresh migration complete.");
        }
    }

    Ok(())
}
