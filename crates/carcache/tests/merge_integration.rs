//! Integration tests for staging and merging into the listing cache.
//!
//! These tests require the `sqlite` and `migrate` features to be enabled
//! and use an in-memory SQLite database.

#![cfg(all(feature = "sqlite", feature = "migrate"))]

use carcache::connect_and_migrate;
use carcache::entity::car_listing::Model;
use carcache::entity::sale_status::SaleStatus;
use carcache::entity::sync_run_status::SyncType;
use carcache::mapping::{MappedListing, listing_id, map_record};
use carcache::repository::{
    MergeLocks, MergeOptions, cache_stats, count_staged, find_by_id, merge_run, purge_run,
    stage_listings,
};
use carcache::CarListing;
use sea_orm::{DatabaseConnection, EntityTrait, QueryOrder};
use serde_json::json;
use std::time::Duration;
use uuid::Uuid;

const SITE: &str = "copart";

/// Create an in-memory SQLite database with migrations applied.
async fn setup_test_db() -> DatabaseConnection {
    connect_and_migrate("sqlite::memory:")
        .await
        .expect("Failed to create test database")
}

fn listing(lot: &str, price: u32) -> MappedListing {
    map_record(
        SITE,
        &json!({
            "id": lot,
            "make": "Toyota",
            "model": "Corolla",
            "year": 2018,
            "price": price,
            "status": "active",
        }),
    )
    .expect("mappable record")
}

async fn stage_and_merge(
    db: &DatabaseConnection,
    locks: &MergeLocks,
    listings: &[MappedListing],
    sync_type: SyncType,
) -> carcache::repository::MergeReport {
    let run_id = Uuid::new_v4();
    stage_listings(db, run_id, 1, listings).await.expect("stage");
    merge_run(db, locks, run_id, &MergeOptions::new(SITE, sync_type))
        .await
        .expect("merge")
}

/// Listing content without the sync timestamp, which every merge refreshes.
fn content(rows: &[Model]) -> Vec<(Uuid, String, SaleStatus, String)> {
    rows.iter()
        .map(|m| (m.id, m.data_hash.clone(), m.sale_status, m.updated_at.to_rfc3339()))
        .collect()
}

async fn all_listings(db: &DatabaseConnection) -> Vec<Model> {
    CarListing::find()
        .order_by_asc(carcache::CarListingColumn::Id)
        .all(db)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_merge_twice_equals_merge_once() {
    let db = setup_test_db().await;
    let locks = MergeLocks::new();
    let run_id = Uuid::new_v4();
    let listings = vec![listing("a", 1000), listing("b", 2000), listing("c", 3000)];
    stage_listings(&db, run_id, 1, &listings).await.unwrap();

    let options = MergeOptions::new(SITE, SyncType::Full);
    let first = merge_run(&db, &locks, run_id, &options).await.unwrap();
    assert_eq!(first.inserted, 3);
    assert_eq!(first.archived, 0);
    let after_first = all_listings(&db).await;

    let second = merge_run(&db, &locks, run_id, &options).await.unwrap();
    assert_eq!(second.inserted, 0);
    assert_eq!(second.updated, 0);
    assert_eq!(second.unchanged, 3);
    assert_eq!(content(&all_listings(&db).await), content(&after_first));
}

#[tokio::test]
async fn test_unchanged_listings_get_fresh_sync_timestamp() {
    let db = setup_test_db().await;
    let locks = MergeLocks::new();
    stage_and_merge(&db, &locks, &[listing("a", 1000), listing("b", 2000)], SyncType::Full).await;
    let before = find_by_id(&db, listing_id(SITE, "a")).await.unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    let report = stage_and_merge(
        &db,
        &locks,
        &[listing("a", 1000), listing("b", 2500)],
        SyncType::Full,
    )
    .await;
    assert_eq!(report.unchanged, 1);
    assert_eq!(report.updated, 1);

    let after = find_by_id(&db, listing_id(SITE, "a")).await.unwrap();
    assert!(after.last_api_sync > before.last_api_sync);
    assert_eq!(after.updated_at, before.updated_at);
    assert_eq!(after.data_hash, before.data_hash);
}

#[tokio::test]
async fn test_restaging_a_page_does_not_duplicate() {
    let db = setup_test_db().await;
    let run_id = Uuid::new_v4();
    let listings = vec![listing("a", 1000), listing("b", 2000)];
    stage_listings(&db, run_id, 4, &listings).await.unwrap();
    stage_listings(&db, run_id, 4, &listings).await.unwrap();
    assert_eq!(count_staged(&db, run_id).await.unwrap(), 2);

    assert_eq!(purge_run(&db, run_id).await.unwrap(), 2);
    assert_eq!(count_staged(&db, run_id).await.unwrap(), 0);
}

#[tokio::test]
async fn test_changed_listing_is_updated() {
    let db = setup_test_db().await;
    let locks = MergeLocks::new();
    stage_and_merge(&db, &locks, &[listing("a", 1000), listing("b", 2000)], SyncType::Full).await;
    let before = find_by_id(&db, listing_id(SITE, "a")).await.unwrap();

    let report = stage_and_merge(
        &db,
        &locks,
        &[listing("a", 1500), listing("b", 2000)],
        SyncType::Full,
    )
    .await;
    assert_eq!(report.updated, 1);
    assert_eq!(report.unchanged, 1);

    let after = find_by_id(&db, listing_id(SITE, "a")).await.unwrap();
    assert_eq!(after.price_cents, Some(150_000));
    assert_ne!(after.data_hash, before.data_hash);
    assert_eq!(after.created_at, before.created_at);
}

#[tokio::test]
async fn test_full_sync_archives_missing_listings() {
    let db = setup_test_db().await;
    let locks = MergeLocks::new();
    stage_and_merge(
        &db,
        &locks,
        &[listing("a", 1000), listing("b", 2000), listing("c", 3000)],
        SyncType::Full,
    )
    .await;

    // An incremental pass never archives.
    let report = stage_and_merge(&db, &locks, &[listing("a", 1000)], SyncType::Incremental).await;
    assert_eq!(report.archived, 0);

    let report = stage_and_merge(&db, &locks, &[listing("a", 1000), listing("b", 2000)], SyncType::Full).await;
    assert_eq!(report.archived, 1);

    let c = find_by_id(&db, listing_id(SITE, "c")).await.unwrap();
    assert_eq!(c.sale_status, SaleStatus::Archived);
    assert_eq!(all_listings(&db).await.len(), 3, "archived rows are kept");

    let stats = cache_stats(&db).await.unwrap();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.open(), 2);
}

#[tokio::test]
async fn test_archived_listing_revives_when_seen_again() {
    let db = setup_test_db().await;
    let locks = MergeLocks::new();
    stage_and_merge(&db, &locks, &[listing("a", 1000), listing("b", 2000)], SyncType::Full).await;
    stage_and_merge(&db, &locks, &[listing("a", 1000)], SyncType::Full).await;
    assert_eq!(
        find_by_id(&db, listing_id(SITE, "b")).await.unwrap().sale_status,
        SaleStatus::Archived
    );

    let report = stage_and_merge(&db, &locks, &[listing("b", 2000)], SyncType::Incremental).await;
    assert_eq!(report.updated, 1);
    assert_eq!(
        find_by_id(&db, listing_id(SITE, "b")).await.unwrap().sale_status,
        SaleStatus::Active
    );
}

#[tokio::test]
async fn test_empty_full_run_archives_nothing() {
    let db = setup_test_db().await;
    let locks = MergeLocks::new();
    stage_and_merge(&db, &locks, &[listing("a", 1000)], SyncType::Full).await;

    let report = merge_run(&db, &locks, Uuid::new_v4(), &MergeOptions::new(SITE, SyncType::Full))
        .await
        .unwrap();
    assert_eq!(report.staged, 0);
    assert_eq!(report.archived, 0);
    assert_eq!(
        find_by_id(&db, listing_id(SITE, "a")).await.unwrap().sale_status,
        SaleStatus::Active
    );
}

#[tokio::test]
async fn test_cache_stats_reports_latest_sync_time() {
    let db = setup_test_db().await;
    let empty = cache_stats(&db).await.unwrap();
    assert_eq!(empty.total, 0);
    assert_eq!(empty.last_api_sync, None);

    let locks = MergeLocks::new();
    stage_and_merge(&db, &locks, &[listing("a", 1000)], SyncType::Incremental).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    stage_and_merge(&db, &locks, &[listing("b", 2000)], SyncType::Incremental).await;

    let latest = all_listings(&db)
        .await
        .into_iter()
        .map(|m| m.last_api_sync)
        .max();
    let stats = cache_stats(&db).await.unwrap();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.by_status.get("active"), Some(&2));
    assert!(stats.last_api_sync.is_some());
    assert_eq!(stats.last_api_sync, latest);
}
