use carcache::api::{AppState, router};
use carcache::db;
use tokio::net::TcpListener;

use super::sync::build_orchestrator;
use super::watchdog::build_watchdog;
use crate::config::Config;
use crate::shutdown::Shutdown;

pub(crate) async fn handle_serve(
    bind: Option<String>,
    no_watchdog: bool,
    config: &Config,
    database_url: &str,
    shutdown: &Shutdown,
) -> Result<(), Box<dyn std::error::Error>> {
    let db = db::connect_and_migrate(database_url).await?;
    let orchestrator = build_orchestrator(config, db, shutdown)?;

    let watchdog = if no_watchdog {
        None
    } else {
        Some(build_watchdog(orchestrator.store().clone(), config).spawn(shutdown.flag()))
    };

    let state = AppState::new(orchestrator, config.sync_options());
    let bind = bind.unwrap_or_else(|| config.server.bind.clone());
    let listener = TcpListener::bind(&bind).await?;
    tracing::info!(addr = %listener.local_addr()?, "Serving listing cache");
    println!("Listening on http://{}", listener.local_addr()?);

    let signal = shutdown.clone();
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            while !signal.is_requested() {
                tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            }
        })
        .await?;

    if let Some(handle) = watchdog {
        handle.abort();
    }
    Ok(())
}
