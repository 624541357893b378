//! End-to-end sync flows against an in-memory platform and SQLite store

mod common;

use chrono::{Duration as ChronoDuration, Utc};
use common::{FakePlatform, app, app_with, test_config};
use reqwest::Method;
use rust_decimal::Decimal;
use shopsync::domain::{NewProduct, OrderStatus};
use shopsync::sync::{HealthStatus, SyncError, SyncEvent, SyncFlow, SyncType};
use std::time::Duration;

fn linked_product(sku: &str, remote_id: &str, stock: i64) -> NewProduct {
    let mut product = NewProduct::new(sku, format!("Local {}", sku), Decimal::new(1250, 2), stock);
    product.remote_id = Some(remote_id.to_string());
    product
}

#[tokio::test]
async fn test_push_links_remote_id_and_updates_in_place() {
    let platform = FakePlatform::new();
    let app = app(platform.clone()).await;
    let product = app
        .repository
        .create_product(NewProduct::new("MUG-1", "Mug", Decimal::new(999, 2), 5))
        .await
        .unwrap();

    let result = app.orchestrator.sync_products_to_remote().await.unwrap();
    assert_eq!(result.success_count, 1);
    assert!(result.is_clean());

    let linked = app.repository.get_product(product.id).await.unwrap().unwrap();
    let remote_id = linked.remote_id.clone().expect("remote id stored after create");
    assert!(linked.last_synced_at.is_some());
    assert_eq!(platform.products().len(), 1);

    app.orchestrator.sync_products_to_remote().await.unwrap();
    assert_eq!(platform.products().len(), 1);
    assert_eq!(platform.requests_to(Method::POST, "products"), 1);
    assert_eq!(platform.requests_to(Method::PUT, &format!("products/{}", remote_id)), 1);
}

#[tokio::test]
async fn test_products_delta_skips_unchanged_and_advances_watermark() {
    let platform = FakePlatform::new();
    let earlier = Utc::now() - ChronoDuration::hours(1);
    platform.add_product("r1", "A-1", Decimal::new(500, 2), 3, earlier);
    platform.add_product("r2", "B-1", Decimal::new(700, 2), 4, earlier);
    let app = app(platform.clone()).await;

    let first = app.orchestrator.sync_products_delta(None).await.unwrap();
    assert_eq!(first.since, None);
    assert_eq!(first.new_count, 2);
    assert_eq!(first.result.success_count, 2);

    let second = app.orchestrator.sync_products_delta(None).await.unwrap();
    assert!(second.since.is_some());
    assert_eq!(second.new_count, 0);
    assert_eq!(second.modified_count, 0);
    assert!(second.watermark >= first.watermark);

    platform.touch_product("r1", "Renamed");
    let third = app.orchestrator.sync_products_delta(None).await.unwrap();
    assert_eq!(third.modified_count, 1);
    assert_eq!(third.new_count, 0);
    assert!(third.watermark >= second.watermark);

    let local = app.repository.find_product_by_remote_id("r1").await.unwrap().unwrap();
    assert_eq!(local.name, "Renamed");
    assert_eq!(local.stock_quantity, 3);

    let filtered = platform
        .requests()
        .into_iter()
        .filter(|r| r.path == "products" && r.query.contains_key("updated_since"))
        .count();
    assert_eq!(filtered, 2);
}

#[tokio::test]
async fn test_delta_without_native_filter_compares_timestamps_locally() {
    let platform = FakePlatform::new();
    platform.add_product("r1", "A-1", Decimal::new(500, 2), 3, Utc::now() - ChronoDuration::hours(1));
    let mut config = test_config();
    config.platform.supports_changed_since = false;
    let app = app_with(platform.clone(), config).await;

    assert_eq!(app.orchestrator.sync_products_delta(None).await.unwrap().new_count, 1);
    let unchanged = app.orchestrator.sync_products_delta(None).await.unwrap();
    assert_eq!(unchanged.new_count + unchanged.modified_count + unchanged.skipped_count, 0);

    platform.touch_product("r1", "Renamed");
    let changed = app.orchestrator.sync_products_delta(None).await.unwrap();
    assert_eq!(changed.modified_count, 1);

    assert!(platform.requests().iter().all(|r| !r.query.contains_key("updated_since")));
}

#[tokio::test]
async fn test_explicit_since_overrides_stored_watermark() {
    let platform = FakePlatform::new();
    platform.add_product("r1", "A-1", Decimal::new(500, 2), 3, Utc::now() - ChronoDuration::hours(1));
    let app = app(platform.clone()).await;
    app.orchestrator.sync_products_delta(None).await.unwrap();

    let since = Utc::now() - ChronoDuration::days(1);
    let replay = app.orchestrator.sync_products_delta(Some(since)).await.unwrap();
    assert_eq!(replay.since, Some(since));
    assert_eq!(replay.skipped_count, 1);
}

#[tokio::test]
async fn test_orders_pull_maps_status_case_insensitively() {
    let platform = FakePlatform::new();
    let now = Utc::now();
    platform.add_order("o1", "SHIPPED", &[("MUG-1", 1)], now);
    platform.add_order("o2", "on-hold", &[], now);
    platform.add_order("o3", "Cancelled", &[], now);
    let app = app(platform.clone()).await;

    let result = app.orchestrator.sync_orders_from_remote().await.unwrap();
    assert_eq!(result.success_count, 3);

    let status = |order: Option<shopsync::domain::Order>| order.unwrap().status;
    let repository = &app.repository;
    assert_eq!(status(repository.find_order_by_remote_id("o1").await.unwrap()), OrderStatus::Shipped);
    assert_eq!(status(repository.find_order_by_remote_id("o2").await.unwrap()), OrderStatus::Pending);
    assert_eq!(status(repository.find_order_by_remote_id("o3").await.unwrap()), OrderStatus::Cancelled);
}

#[tokio::test]
async fn test_failed_stock_batch_is_queued_per_item_and_retried() {
    let platform = FakePlatform::new();
    let earlier = Utc::now() - ChronoDuration::hours(1);
    platform.add_product("r1", "A-1", Decimal::new(500, 2), 0, earlier);
    platform.add_product("r2", "B-1", Decimal::new(500, 2), 0, earlier);
    let app = app(platform.clone()).await;
    app.repository.create_product(linked_product("A-1", "r1", 8)).await.unwrap();
    app.repository.create_product(linked_product("B-1", "r2", 6)).await.unwrap();
    platform.fail_path("inventory", 400);

    let result = app.orchestrator.sync_stock_to_remote().await.unwrap();
    assert_eq!(result.total_processed, 2);
    assert_eq!(result.error_count, 2);
    assert_eq!(result.errors.len(), 1);

    let pending = app.queue.get_pending_retries(Some(SyncType::StockPush)).await.unwrap();
    let mut ids: Vec<_> = pending.iter().map(|item| item.item_id.clone()).collect();
    ids.sort();
    assert_eq!(ids, vec!["r1", "r2"]);

    platform.heal();
    let summary = app
        .queue
        .process_due(&app.items, Utc::now() + ChronoDuration::seconds(1))
        .await
        .unwrap();
    assert_eq!(summary.resolved, 2);
    assert!(app.queue.get_pending_retries(None).await.unwrap().is_empty());
    assert_eq!(platform.product("r1").unwrap().stock_quantity, 8);
    assert_eq!(platform.product("r2").unwrap().stock_quantity, 6);
}

#[tokio::test]
async fn test_rejected_stock_entry_is_the_only_failure() {
    let platform = FakePlatform::new();
    let earlier = Utc::now() - ChronoDuration::hours(1);
    platform.add_product("r1", "A-1", Decimal::new(500, 2), 0, earlier);
    platform.add_product("r2", "B-1", Decimal::new(500, 2), 0, earlier);
    let app = app(platform.clone()).await;
    app.repository.create_product(linked_product("A-1", "r1", 8)).await.unwrap();
    app.repository.create_product(linked_product("B-1", "r2", 6)).await.unwrap();
    platform.reject_stock_for("r2");

    let result = app.orchestrator.sync_stock_to_remote().await.unwrap();
    assert_eq!(result.success_count, 1);
    assert_eq!(result.error_count, 1);
    assert_eq!(result.errors[0].item_id, "r2");

    let pending = app.queue.get_pending_retries(None).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].item_id, "r2");
}

#[tokio::test]
async fn test_second_start_is_rejected_while_running() {
    let platform = FakePlatform::new();
    platform.add_product("r1", "A-1", Decimal::new(500, 2), 3, Utc::now());
    platform.set_latency(Duration::from_millis(100));
    let app = app(platform.clone()).await;

    let orchestrator = app.orchestrator.clone();
    let full = tokio::spawn(async move { orchestrator.full_sync().await });

    for _ in 0..100 {
        if app.orchestrator.is_sync_running() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(app.orchestrator.is_sync_running());

    let rejected = app.orchestrator.sync_products_from_remote().await;
    assert!(matches!(rejected, Err(SyncError::AlreadyRunning)));

    full.await.unwrap().unwrap();
    assert!(!app.orchestrator.is_sync_running());
    assert!(app.orchestrator.last_sync_date().is_some());
}

#[tokio::test]
async fn test_auto_sync_interval_has_a_floor() {
    let app = app(FakePlatform::new()).await;

    assert_eq!(app.orchestrator.start_auto_sync(Duration::from_secs(1)), Duration::from_secs(10));
    assert!(app.orchestrator.is_auto_sync_active());
    assert_eq!(app.orchestrator.start_auto_sync(Duration::from_secs(30)), Duration::from_secs(30));

    app.orchestrator.stop_auto_sync().await;
    assert!(!app.orchestrator.is_auto_sync_active());
}

#[tokio::test]
async fn test_failed_listing_aborts_flow_and_keeps_watermark() {
    let platform = FakePlatform::new();
    platform.fail_path("products", 500);
    let app = app(platform.clone()).await;
    let mut events = app.orchestrator.subscribe();

    let err = app.orchestrator.sync_products_from_remote().await.unwrap_err();
    assert!(matches!(err, SyncError::Api(_)));

    assert_eq!(app.store.get_sync_state(SyncType::ProductsPull).await.unwrap(), None);
    let health = app.orchestrator.health().snapshot();
    assert_eq!(health.status, HealthStatus::Degraded);
    assert_eq!(health.consecutive_failures, 1);

    let started = events.recv().await.unwrap();
    let failed = events.recv().await.unwrap();
    match (started, failed) {
        (
            SyncEvent::Started { flow, correlation_id },
            SyncEvent::Error {
                correlation_id: error_id,
                ..
            },
        ) => {
            assert_eq!(flow, SyncFlow::ProductsFromRemote);
            assert_eq!(correlation_id, error_id);
        }
        other => panic!("unexpected events: {:?}", other),
    }
    assert_eq!(app.metrics.snapshot().global.failed_sync_passes, 1);
}

#[tokio::test]
async fn test_one_flow_shares_one_correlation_id() {
    let platform = FakePlatform::new();
    let app = app(platform.clone()).await;
    for sku in ["A-1", "B-1"] {
        app.repository
            .create_product(NewProduct::new(sku, sku, Decimal::new(100, 2), 1))
            .await
            .unwrap();
    }
    let mut events = app.orchestrator.subscribe();

    app.orchestrator.run(SyncFlow::ProductsToRemote).await.unwrap();

    let ids: Vec<_> = platform
        .requests()
        .into_iter()
        .map(|r| r.correlation_id.expect("correlation header"))
        .collect();
    assert_eq!(ids.len(), 4);
    assert!(ids.iter().all(|id| id == &ids[0]));

    let _started = events.recv().await.unwrap();
    match events.recv().await.unwrap() {
        SyncEvent::Completed { correlation_id, result, .. } => {
            assert_eq!(correlation_id.as_str(), ids[0]);
            assert_eq!(result.success_count, 2);
        }
        other => panic!("unexpected event: {:?}", other),
    }
}

#[tokio::test]
async fn test_confirmed_order_reserves_stock_and_pushes_status() {
    let platform = FakePlatform::new();
    let earlier = Utc::now() - ChronoDuration::hours(1);
    platform.add_product("r1", "MUG-1", Decimal::new(1000, 2), 5, earlier);
    platform.add_order("o1", "pending", &[("MUG-1", 2)], earlier);
    let app = app(platform.clone()).await;
    app.repository.create_product(linked_product("MUG-1", "r1", 5)).await.unwrap();

    app.orchestrator.sync_orders_from_remote().await.unwrap();
    let mut order = app.repository.find_order_by_remote_id("o1").await.unwrap().unwrap();
    let outcome = app
        .orders
        .transition_to(&mut order, OrderStatus::Confirmed, Some("paid"), "test")
        .await
        .unwrap();
    assert!(outcome.warnings.is_empty());

    let product = app.repository.find_product_by_remote_id("r1").await.unwrap().unwrap();
    assert_eq!(product.reserved_quantity, 2);
    assert_eq!(product.available(), 3);

    let pushed = app.orchestrator.sync_order_status_to_remote().await.unwrap();
    assert_eq!(pushed.success_count, 1);
    assert_eq!(platform.order("o1").unwrap().status, "confirmed");

    app.orchestrator.sync_stock_to_remote().await.unwrap();
    assert_eq!(platform.product("r1").unwrap().stock_quantity, 3);
}

#[tokio::test]
async fn test_full_sync_merges_every_flow() {
    let platform = FakePlatform::new();
    let earlier = Utc::now() - ChronoDuration::hours(1);
    platform.add_product("r1", "A-1", Decimal::new(500, 2), 3, earlier);
    platform.add_order("o1", "pending", &[("A-1", 1)], earlier);
    let app = app(platform.clone()).await;

    let result = app.orchestrator.full_sync().await.unwrap();
    assert_eq!(result.sync_type, None);
    assert!(result.is_clean());
    // pull 1 product, push it back, push its stock, pull 1 order, push its status
    assert_eq!(result.success_count, 5);

    for sync_type in SyncType::ALL {
        assert!(app.store.get_sync_state(sync_type).await.unwrap().is_some(), "{}", sync_type);
    }
    assert_eq!(app.orchestrator.health().snapshot().status, HealthStatus::Healthy);
}
