//! Integration tests for the HTTP handlers.
//!
//! Handlers are called directly with extracted arguments against an
//! in-memory SQLite database.

#![cfg(all(feature = "sqlite", feature = "migrate", feature = "server"))]

use std::sync::Arc;

use async_trait::async_trait;
use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use carcache::api::{
    AppState, CatalogQuery, MergeRequest, ResetRequest, StartRequest, get_car, list_cars,
    list_facets, merge_sync, reset_sync, start_sync, sync_status,
};
use carcache::entity::sync_run_status::SyncRunStatus;
use carcache::mapping::{listing_id, map_page};
use carcache::remote::{FetchError, ListingPage, ListingSource};
use carcache::repository::{MergeLocks, MergeOptions, merge_run, stage_listings};
use carcache::sync::{SyncOptions, SyncOrchestrator, SyncStatusStore};
use carcache::{SyncType, connect_and_migrate};
use serde_json::json;
use uuid::Uuid;

struct EmptySource;

#[async_trait]
impl ListingSource for EmptySource {
    fn source_site(&self) -> &str {
        "copart"
    }

    async fn fetch_page(&self, page: u32) -> Result<ListingPage, FetchError> {
        Ok(ListingPage::empty(page))
    }
}

async fn setup_state() -> AppState {
    let db = connect_and_migrate("sqlite::memory:")
        .await
        .expect("Failed to create test database");

    let records: Vec<_> = (0..30)
        .map(|i| {
            json!({
                "id": format!("lot-{i}"),
                "make": if i % 2 == 0 { "Toyota" } else { "Mazda" },
                "model": "Hatch",
                "price": 4_000 + i * 10,
                "fuel": "Petrol",
            })
        })
        .collect();
    let (listings, _) = map_page("copart", &records);
    let run_id = Uuid::new_v4();
    stage_listings(&db, run_id, 1, &listings).await.unwrap();
    merge_run(&db, &MergeLocks::new(), run_id, &MergeOptions::new("copart", SyncType::Full))
        .await
        .unwrap();

    let orchestrator = SyncOrchestrator::new(SyncStatusStore::new(db), Arc::new(EmptySource));
    AppState::new(orchestrator, SyncOptions::default())
}

#[tokio::test]
async fn test_list_cars_pages_through_catalog() {
    let state = setup_state().await;
    let params = CatalogQuery {
        make: Some("toyota".to_string()),
        sort: Some("price_asc".to_string()),
        limit: Some(10),
        ..CatalogQuery::default()
    };
    let Json(first) = list_cars(State(state.clone()), Query(params.clone()))
        .await
        .unwrap();
    assert_eq!(first.total, 15);
    assert_eq!(first.items.len(), 10);
    assert!(first.has_next);

    let params = CatalogQuery {
        cursor: first.next_cursor.clone(),
        ..params
    };
    let Json(second) = list_cars(State(state), Query(params)).await.unwrap();
    assert_eq!(second.items.len(), 5);
    assert!(!second.has_next);
    assert!(first.items.last().unwrap().price_cents <= second.items[0].price_cents);
}

#[tokio::test]
async fn test_list_cars_rejects_bad_input() {
    let state = setup_state().await;
    let params = CatalogQuery {
        sort: Some("colour_asc".to_string()),
        ..CatalogQuery::default()
    };
    let err = list_cars(State(state.clone()), Query(params)).await.unwrap_err();
    assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    assert_eq!(err.category(), "unknown_sort");

    let params = CatalogQuery {
        cursor: Some("garbage".to_string()),
        ..CatalogQuery::default()
    };
    let err = list_cars(State(state), Query(params)).await.unwrap_err();
    assert_eq!(err.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_facets_and_single_car() {
    let state = setup_state().await;
    let Json(facets) = list_facets(State(state.clone()), Query(CatalogQuery::default()))
        .await
        .unwrap();
    let json = serde_json::to_value(&facets).unwrap();
    assert_eq!(json["make"]["Toyota"], 15);
    assert_eq!(json["fuel"]["petrol"], 30);

    let id = listing_id("copart", "lot-3");
    let Json(car) = get_car(State(state.clone()), Path(id)).await.unwrap();
    assert_eq!(car.make, "Mazda");

    let err = get_car(State(state), Path(Uuid::new_v4())).await.unwrap_err();
    assert_eq!(err.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_sync_control_endpoints() {
    let state = setup_state().await;

    let err = sync_status(State(state.clone())).await.unwrap_err();
    assert_eq!(err.status(), StatusCode::NOT_FOUND);

    let err = reset_sync(State(state.clone()), Json(ResetRequest::default()))
        .await
        .unwrap_err();
    assert_eq!(err.status(), StatusCode::CONFLICT);

    // Hold the stream so the handler sees a live run.
    let claim = state
        .orchestrator
        .start(&state.sync_defaults)
        .await
        .unwrap();
    let err = start_sync(State(state.clone()), Json(StartRequest::default()))
        .await
        .unwrap_err();
    assert_eq!(err.status(), StatusCode::CONFLICT);

    let Json(snapshot) = sync_status(State(state.clone())).await.unwrap();
    assert_eq!(snapshot.status.status, SyncRunStatus::Running);
    assert_eq!(snapshot.status.run_id, Some(claim.run_id));

    let Json(snapshot) = reset_sync(
        State(state.clone()),
        Json(ResetRequest {
            reason: Some("stuck in test".to_string()),
        }),
    )
    .await
    .unwrap();
    assert_eq!(snapshot.status.status, SyncRunStatus::Failed);
    assert_eq!(snapshot.status.error_message.as_deref(), Some("stuck in test"));

    let (status, Json(started)) = start_sync(State(state), Json(StartRequest::default()))
        .await
        .unwrap();
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_ne!(started.run_id, claim.run_id);
    assert_eq!(started.start_page, 1);
}

#[tokio::test]
async fn test_merge_endpoint_replays_completed_run() {
    let state = setup_state().await;
    let err = merge_sync(State(state.clone()), Json(MergeRequest::default()))
        .await
        .unwrap_err();
    assert_eq!(err.status(), StatusCode::CONFLICT);
    assert_eq!(err.category(), "nothing_to_merge");

    let claim = state
        .orchestrator
        .start(&state.sync_defaults)
        .await
        .unwrap();
    let err = merge_sync(State(state.clone()), Json(MergeRequest::default()))
        .await
        .unwrap_err();
    assert_eq!(err.category(), "already_running");

    let records = vec![json!({"id": "lot-new", "make": "Honda", "model": "Civic", "price": 9_000})];
    let (listings, _) = map_page("copart", &records);
    stage_listings(state.db.as_ref(), claim.run_id, 1, &listings)
        .await
        .unwrap();
    state
        .orchestrator
        .store()
        .complete_run(&claim.stream, claim.run_id, 0.95)
        .await
        .unwrap();

    let Json(report) = merge_sync(State(state.clone()), Json(MergeRequest::default()))
        .await
        .unwrap();
    assert_eq!(report.run_id, claim.run_id);
    assert_eq!(report.inserted, 1);
    // No disclosed total, so the replay cannot prove a full pass.
    assert_eq!(report.archived, 0);

    let Json(car) = get_car(State(state), Path(listing_id("copart", "lot-new")))
        .await
        .unwrap();
    assert_eq!(car.make, "Honda");
}
