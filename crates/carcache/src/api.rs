//! HTTP API: catalog reads and sync control.
//!
//! | Route               | Purpose                                   |
//! |---------------------|-------------------------------------------|
//! | `GET /cars`         | keyset page of listings                   |
//! | `GET /cars/facets`  | value counts per facet field              |
//! | `GET /cars/{id}`    | one listing                               |
//! | `POST /sync/start`  | start a run in the background (202 / 409) |
//! | `GET /sync/status`  | status row plus percent and ETA           |
//! | `POST /sync/reset`  | force-fail the running run (409 if idle)  |
//! | `POST /sync/merge`  | replay the merge of a finished run        |

mod cars;
mod errors;
mod sync;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use sea_orm::DatabaseConnection;

use crate::sync::{SyncOptions, SyncOrchestrator};

pub use cars::{CatalogQuery, get_car, list_cars, list_facets};
pub use errors::ApiError;
pub use sync::{
    MergeRequest, ResetRequest, StartRequest, StartResponse, merge_sync, reset_sync, start_sync,
    sync_status,
};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub orchestrator: SyncOrchestrator,
    /// Options for runs started over HTTP; the request picks type and start page.
    pub sync_defaults: SyncOptions,
}

impl AppState {
    pub fn new(orchestrator: SyncOrchestrator, sync_defaults: SyncOptions) -> Self {
        Self {
            db: orchestrator.store().shared_db(),
            orchestrator,
            sync_defaults,
        }
    }
}

/// Build the router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/cars", get(list_cars))
        .route("/cars/facets", get(list_facets))
        .route("/cars/{id}", get(get_car))
        .route("/sync/start", post(start_sync))
        .route("/sync/status", get(sync_status))
        .route("/sync/reset", post(reset_sync))
        .route("/sync/merge", post(merge_sync))
        .with_state(state)
}
