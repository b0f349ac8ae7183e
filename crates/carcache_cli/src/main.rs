//! carcache CLI - sync and serve a local vehicle listing cache.

mod commands;
mod config;
mod progress;
mod shutdown;

use clap::{Args, Parser, Subcommand};
use console::Term;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "carcache")]
#[command(version)]
#[command(about = "A keyset-paginated cache of remote vehicle listings")]
#[command(
    long_about = "carcache mirrors a paginated auction listing API into a local database. \
Sync runs fetch pages concurrently under a rate limit, stage them, and merge them into \
the cache, which is served through a sorted, filterable, cursor-paginated HTTP API."
)]
#[command(after_long_help = r#"EXAMPLES
    Create or upgrade the database:
        $ carcache migrate up

    Run a full sync with 8 workers at 10 requests/second:
        $ carcache sync -c 8 --rps 10

    Continue an interrupted or failed run:
        $ carcache sync --resume

    Stage a run now, merge it into the cache later:
        $ carcache sync --no-merge
        $ carcache merge

    Serve the cache and the sync control API:
        $ carcache serve --bind 0.0.0.0:8080

CONFIGURATION
    carcache reads configuration from:
      1. ~/.config/carcache/config.toml (or $XDG_CONFIG_HOME/carcache/config.toml)
      2. ./carcache.toml
      3. Environment variables (CARCACHE_* prefix, e.g. CARCACHE_SYNC__CONCURRENCY)
      4. .env file in current directory

ENVIRONMENT VARIABLES
    CARCACHE_DATABASE_URL     Database connection string (default: ~/.local/state/carcache/carcache.db)
    CARCACHE_API_BASE_URL     Base URL of the remote listing API
    CARCACHE_API_KEY          API key sent as x-api-key
    RUST_LOG                  Log filter for non-interactive output
"#)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate {
        #[command(subcommand)]
        action: MigrateAction,
    },
    /// Fetch the remote listings and merge them into the cache
    Sync(SyncArgs),
    /// Merge a finished run's staged pages into the cache
    Merge {
        /// Run to merge (default: the stream's last completed run)
        #[arg(long, value_name = "UUID")]
        run_id: Option<Uuid>,
        /// Keep the run's staging rows after merging
        #[arg(long)]
        keep_staging: bool,
    },
    /// Show the sync stream and cache status
    Status {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Mark the running sync failed so a new one can start
    Reset {
        /// Reason recorded on the status row
        #[arg(long)]
        reason: Option<String>,
    },
    /// Detect and fail stuck sync runs
    Watchdog {
        /// Check once and exit
        #[arg(long)]
        once: bool,
    },
    /// Serve the catalog and sync control HTTP API
    Serve {
        /// Address to listen on (overrides [server] bind)
        #[arg(long, value_name = "ADDR")]
        bind: Option<String>,
        /// Do not run the stuck-run watchdog alongside the server
        #[arg(long)]
        no_watchdog: bool,
    },
    /// Delete old staging rows
    PurgeStaging {
        /// Delete rows staged more than this many days ago
        #[arg(long, value_name = "N")]
        older_than_days: u32,
    },
}

#[derive(Subcommand)]
pub(crate) enum MigrateAction {
    /// Apply all pending migrations
    Up,
    /// Rollback the last migration
    Down,
    /// Show migration status
    Status,
    /// Drop all tables and reapply migrations
    Fresh,
}

#[derive(Args, Debug, Clone)]
pub(crate) struct SyncArgs {
    /// Incremental pass: merge without archiving unseen listings
    #[arg(long)]
    incremental: bool,

    /// Start at this page instead of page 1
    #[arg(long, value_name = "N", conflicts_with = "resume")]
    from_page: Option<u32>,

    /// Continue the stream's last run from its resume page
    #[arg(long)]
    resume: bool,

    /// Concurrent page workers (overrides [sync] concurrency)
    #[arg(short = 'c', long, value_name = "N")]
    concurrency: Option<usize>,

    /// Requests per second (overrides [sync] requests_per_second)
    #[arg(long, value_name = "N")]
    rps: Option<u32>,

    /// Stage pages but skip the merge step
    #[arg(long)]
    no_merge: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // Set up graceful shutdown handler (Ctrl+C)
    let shutdown = shutdown::setup_shutdown_handler();

    // Initialize tracing for non-TTY mode (structured logging)
    // Only initialize if not connected to a TTY
    if !Term::stdout().is_term() {
        let env_filter = match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => EnvFilter::new("carcache=info,carcache_cli=info"),
        };

        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }

    // Load configuration (config file -> env vars -> defaults)
    let config = config::Config::load();

    let cli = Cli::parse();

    let database_url = config
        .database_url()
        .ok_or("Could not determine a database URL; set CARCACHE_DATABASE_URL")?;

    // Ensure the database directory exists for SQLite
    if database_url.starts_with("sqlite://") {
        let db_path = database_url.trim_start_matches("sqlite://");
        // Strip query parameters (e.g., ?mode=rwc) before path operations
        let db_path = db_path.split('?').next().unwrap_or(db_path);
        let db_path = std::path::Path::new(db_path);

        // Warn if using a relative path (can cause issues depending on cwd)
        if db_path.is_relative() && !db_path.as_os_str().is_empty() {
            tracing::warn!(
                "Database path '{}' is relative - behavior depends on current directory. \
                 Consider using an absolute path.",
                db_path.display()
            );
        }

        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
    }

    match cli.command {
        Commands::Migrate { action } => {
            commands::migrate::handle_migrate(action, &config, &database_url).await?;
        }
        Commands::Sync(args) => {
            commands::sync::handle_sync(args, &config, &database_url, &shutdown).await?;
        }
        Commands::Merge {
            run_id,
            keep_staging,
        } => {
            commands::merge::handle_merge(run_id, keep_staging, &config, &database_url, &shutdown)
                .await?;
        }
        Commands::Status { json } => {
            commands::status::handle_status(json, &config, &database_url).await?;
        }
        Commands::Reset { reason } => {
            commands::status::handle_reset(reason, &config, &database_url).await?;
        }
        Commands::Watchdog { once } => {
            commands::watchdog::handle_watchdog(once, &config, &database_url, &shutdown).await?;
        }
        Commands::Serve { bind, no_watchdog } => {
            commands::serve::handle_serve(bind, no_watchdog, &config, &database_url, &shutdown)
                .await?;
        }
        Commands::PurgeStaging { older_than_days } => {
            commands::purge::handle_purge_staging(older_than_days, &config, &database_url)
                .await?;
        }
    }

    Ok(())
}
