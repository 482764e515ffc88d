//! Full runs of the batch driver over a temporary tier directory and the
//! in-memory store.

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use expiry_sync::config::SyncConfig;
use expiry_sync::errors::FailureKind;
use expiry_sync::jobs::ExpirySync;
use expiry_sync::store::MemoryStore;
use serde_json::{json, Value};
use tempfile::TempDir;

fn config_for(dir: &TempDir) -> SyncConfig {
    let mut config = SyncConfig::default();
    config.products.dir = dir.path().to_path_buf();
    config.logging.file = String::new();
    config
}

fn write_tier(dir: &TempDir, tier: &str, doc: Value) {
    fs::write(
        dir.path().join(format!("{tier}.json")),
        serde_json::to_string_pretty(&doc).unwrap(),
    )
    .unwrap();
}

fn read_tier(dir: &TempDir, tier: &str) -> Value {
    let text = fs::read_to_string(dir.path().join(format!("{tier}.json"))).unwrap();
    serde_json::from_str(&text).unwrap()
}

fn seed_all_tiers(dir: &TempDir) {
    write_tier(
        dir,
        "trial",
        json!({"t1": {"status": "sold", "soldAt": "2025-08-14 15:42:05"}}),
    );
    write_tier(
        dir,
        "medium",
        json!({
            "m1": {"status": "sold", "soldAt": "2025-08-14 15:42:05"},
            "m2": {"status": "unsold", "soldAt": null}
        }),
    );
    write_tier(
        dir,
        "high",
        json!({"h1": {"status": "sold", "soldAt": "2025-08-01 08:00:00"}}),
    );
    write_tier(dir, "supreme", json!({}));
}

#[tokio::test]
async fn run_updates_files_cache_and_client_keys() {
    let dir = TempDir::new().unwrap();
    seed_all_tiers(&dir);

    let store = Arc::new(MemoryStore::new());
    store.insert_hash(
        "medium_products:m1",
        vec![("status", "sold"), ("soldAt", "2025-08-14 15:42:05")],
    );
    store.insert_hash("client_keys:t1", vec![("owner", "alice")]);
    store.insert_hash("client_keys:unknown", vec![("owner", "bob")]);

    let sync = ExpirySync::new(config_for(&dir), store.clone()).unwrap();
    let report = sync.run_once().await;

    assert!(report.is_clean(), "failures: {:?}", report.failures());
    assert_eq!(report.total_products(), 3);
    assert_eq!(report.total_cache_products(), 1);
    assert_eq!(report.total_client_keys(), 1);
    assert_eq!(report.tiers.len(), 4);
    assert_eq!(report.tier("medium").unwrap().file.updated, 1);
    assert!(!report.run_id.is_empty());
    assert!(report.finished_at >= report.started_at);

    assert_eq!(
        read_tier(&dir, "trial")["t1"]["expiresDate"],
        json!("2025-08-15 15:42:05")
    );
    assert_eq!(
        read_tier(&dir, "high")["h1"]["expiresDate"],
        json!("2025-08-31 08:00:00")
    );
    assert_eq!(
        store.get("medium_products:m1").unwrap()["expiresAt"],
        "1757749325000"
    );
    assert_eq!(
        store.get("client_keys:t1").unwrap()["expires_date"],
        "2025-08-15 15:42:05"
    );
    assert_eq!(store.get("client_keys:unknown").unwrap().len(), 1);
}

#[tokio::test]
async fn missing_tier_document_does_not_stop_the_run() {
    let dir = TempDir::new().unwrap();
    write_tier(
        &dir,
        "medium",
        json!({"m1": {"status": "sold", "soldAt": "2025-08-14 15:42:05"}}),
    );

    let store = Arc::new(MemoryStore::new());
    store.insert_hash(
        "high_products:h1",
        vec![("status", "sold"), ("soldAt", "2025-08-14 15:42:05")],
    );

    let sync = ExpirySync::new(config_for(&dir), store.clone()).unwrap();
    let report = sync.run_once().await;

    assert_eq!(report.total_products(), 1);
    let failures = report.failures();
    assert_eq!(failures.len(), 3);
    assert!(failures.iter().all(|f| f.kind == FailureKind::Io));
    assert!(failures.iter().any(|f| f.scope == "trial.json"));

    // The cache pass of a tier without a document still runs.
    assert_eq!(report.tier("high").unwrap().cache.updated, 1);
    assert!(report.client_keys.is_ok());
    assert!(!dir.path().join("high.json").exists());
}

#[tokio::test]
async fn unavailable_cache_still_updates_files() {
    let dir = TempDir::new().unwrap();
    seed_all_tiers(&dir);

    let store = Arc::new(MemoryStore::new());
    store.set_unavailable(true);

    let sync = ExpirySync::new(config_for(&dir), store).unwrap();
    let report = sync.run_once().await;

    assert_eq!(report.total_products(), 3);
    assert_eq!(report.total_cache_products(), 0);
    assert_eq!(report.total_client_keys(), 0);

    let failures = report.failures();
    assert_eq!(failures.len(), 5);
    assert!(failures.iter().all(|f| f.kind == FailureKind::Cache));
    assert_eq!(
        report.client_keys.failure.as_ref().unwrap().scope,
        "client_keys:*"
    );
}

#[tokio::test]
async fn second_run_rewrites_identical_documents() {
    let dir = TempDir::new().unwrap();
    seed_all_tiers(&dir);
    let store = Arc::new(MemoryStore::new());
    let sync = ExpirySync::new(config_for(&dir), store).unwrap();

    sync.run_once().await;
    let first = fs::read_to_string(dir.path().join("medium.json")).unwrap();
    let report = sync.run_once().await;
    let second = fs::read_to_string(dir.path().join("medium.json")).unwrap();

    assert_eq!(first, second);
    assert_eq!(report.total_products(), 3);
}

#[tokio::test]
async fn configured_tier_order_limits_the_run() {
    let dir = TempDir::new().unwrap();
    seed_all_tiers(&dir);
    let mut config = config_for(&dir);
    config.tiers.order = vec!["high".to_string()];

    let sync = ExpirySync::new(config, Arc::new(MemoryStore::new())).unwrap();
    let report = sync.run_once().await;

    assert_eq!(report.tiers.len(), 1);
    assert_eq!(report.total_products(), 1);
    assert!(read_tier(&dir, "trial")["t1"].get("expiresAt").is_none());
}

#[tokio::test]
async fn run_deadline_keeps_partial_counts() {
    let dir = TempDir::new().unwrap();
    seed_all_tiers(&dir);
    let mut config = config_for(&dir);
    config.tiers.order = vec!["medium".to_string()];
    config.job.run_timeout_secs = 1;

    let store = Arc::new(MemoryStore::new());
    for key in ["medium_products:a", "medium_products:b"] {
        store.insert_hash(key, vec![("status", "sold"), ("soldAt", "2025-08-14 15:42:05")]);
    }
    store.delay_key("medium_products:b", Duration::from_secs(10));

    let sync = ExpirySync::new(config, store.clone()).unwrap();
    let report = sync.run_once().await;

    let medium = report.tier("medium").unwrap();
    assert_eq!(medium.file.updated, 1);
    assert!(medium.file.is_ok());
    assert_eq!(medium.cache.updated, 1);
    assert_eq!(
        medium.cache.failure.as_ref().unwrap().kind,
        FailureKind::Timeout
    );
    assert_eq!(report.total_cache_products(), 1);
    assert_eq!(
        report.client_keys.failure.as_ref().unwrap().kind,
        FailureKind::Timeout
    );
}

#[tokio::test]
async fn oversized_retention_window_does_not_abort_the_run() {
    let dir = TempDir::new().unwrap();
    seed_all_tiers(&dir);
    let mut config = config_for(&dir);
    config
        .tiers
        .retention_days
        .insert("medium".to_string(), 200_000_000);

    let sync = ExpirySync::new(config, Arc::new(MemoryStore::new())).unwrap();
    let report = sync.run_once().await;

    let medium = report.tier("medium").unwrap();
    assert_eq!(medium.file.updated, 0);
    assert_eq!(medium.file.parse_errors, 1);
    assert_eq!(report.total_products(), 2);
}
