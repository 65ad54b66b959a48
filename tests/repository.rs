//! Repository laws across the tiers: idempotent saves, the timestamp
//! invariant, durable fallback, and write-through to SQLite.

use std::sync::Arc;

use gatelink::model::{DeviceOwnership, StoredDeviceInformation};
use gatelink::persistence::{ExistingDevicesRepository, JsonFileExistingDevicesRepository};
use gatelink::repository::{DeviceRepository, InMemoryDeviceRepository, SqliteDeviceRepository};

mod common;

fn platform_device(key: &str, timestamp: i64) -> StoredDeviceInformation {
    StoredDeviceInformation::new(key, DeviceOwnership::Platform, timestamp)
}

fn gateway_device(key: &str, timestamp: i64) -> StoredDeviceInformation {
    StoredDeviceInformation::new(key, DeviceOwnership::Gateway, timestamp)
}

async fn check_basic_laws(repository: &dyn DeviceRepository) {
    // Save makes every key visible and advances the platform timestamp.
    assert!(
        repository
            .save(vec![platform_device("D1", 100), platform_device("D2", 250)])
            .await
    );
    assert!(repository.contains_device("D1").await);
    assert!(repository.contains_device("D2").await);
    assert!(!repository.contains_device("D3").await);
    assert!(repository.latest_platform_timestamp().await >= 250);

    // Idempotent save: one entry per key, updated in place.
    assert!(repository.save(vec![gateway_device("D1", 300)]).await);
    let d1 = repository.get("D1").await.expect("D1 must exist");
    assert_eq!(d1.owned_by, DeviceOwnership::Gateway);
    assert_eq!(d1.timestamp_ms, 300);

    let gateway_owned = repository.gateway_devices().await;
    assert_eq!(gateway_owned.len(), 1);
    assert_eq!(gateway_owned[0].device_key, "D1");

    // Removal is silent about absent keys.
    assert!(repository.remove(vec!["D2".into(), "ABSENT".into()]).await);
    assert!(!repository.contains_device("D2").await);

    assert!(repository.remove_all().await);
    assert!(!repository.contains_device("D1").await);
}

#[tokio::test]
async fn in_memory_repository_laws() {
    common::init_logging();
    let repository = InMemoryDeviceRepository::new();
    check_basic_laws(&repository).await;
}

#[tokio::test]
async fn sqlite_repository_laws() {
    common::init_logging();
    let repository = SqliteDeviceRepository::open_in_memory()
        .await
        .expect("in-memory database must open");
    check_basic_laws(&repository).await;
}

#[tokio::test]
async fn sqlite_repository_persists_to_a_file() {
    common::init_logging();
    let directory = tempfile::tempdir().unwrap();
    let path = directory.path().join("devices.db");

    {
        let repository = SqliteDeviceRepository::open(&path).await.unwrap();
        assert!(repository.save(vec![platform_device("D1", 123)]).await);
    }

    let reopened = SqliteDeviceRepository::open(&path).await.unwrap();
    assert!(reopened.contains_device("D1").await);
    assert_eq!(reopened.latest_platform_timestamp().await, 123);
}

#[tokio::test]
async fn full_policy_writes_through_to_the_durable_tier() {
    common::init_logging();
    let durable: Arc<dyn DeviceRepository> =
        Arc::new(SqliteDeviceRepository::open_in_memory().await.unwrap());
    let cache = InMemoryDeviceRepository::with_persistent(durable.clone());

    assert!(cache.save(vec![platform_device("D1", 500)]).await);
    // The caller sees the write immediately; durability follows.
    assert!(cache.contains_device("D1").await);
    let mut durable_has_it = false;
    for _ in 0..200 {
        if durable.contains_device("D1").await {
            durable_has_it = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert!(durable_has_it, "write-through never reached the durable tier");
}

#[tokio::test]
async fn cache_falls_back_to_the_durable_tier() {
    common::init_logging();
    let durable: Arc<dyn DeviceRepository> =
        Arc::new(SqliteDeviceRepository::open_in_memory().await.unwrap());
    durable.save(vec![gateway_device("COLD", 42)]).await;

    let cache = InMemoryDeviceRepository::with_persistent(durable);
    // The cache starts empty; the lookup consults the durable tier and
    // populates the index.
    assert!(cache.contains_device("COLD").await);
    assert_eq!(cache.get("COLD").await.unwrap().timestamp_ms, 42);
}

#[test]
fn existing_devices_log_persists_and_deduplicates() {
    common::init_logging();
    let directory = tempfile::tempdir().unwrap();
    let path = directory.path().join("existing-devices.json");

    {
        let log = JsonFileExistingDevicesRepository::open(&path);
        assert!(log.device_keys().is_empty());
        log.add_device_key("D1");
        log.add_device_key("D2");
        log.add_device_key("D1");
    }

    let reopened = JsonFileExistingDevicesRepository::open(&path);
    assert_eq!(reopened.device_keys(), vec!["D1".to_owned(), "D2".to_owned()]);
}

#[test]
fn corrupt_existing_devices_file_starts_empty() {
    common::init_logging();
    let directory = tempfile::tempdir().unwrap();
    let path = directory.path().join("existing-devices.json");
    std::fs::write(&path, b"{ not json ]").unwrap();

    let log = JsonFileExistingDevicesRepository::open(&path);
    assert!(log.device_keys().is_empty());
}

#[tokio::test]
async fn load_from_persistent_restores_timestamp_and_gateway_devices() {
    common::init_logging();
    let durable: Arc<dyn DeviceRepository> =
        Arc::new(SqliteDeviceRepository::open_in_memory().await.unwrap());
    durable
        .save(vec![platform_device("P1", 900), gateway_device("G1", 10)])
        .await;

    let cache = InMemoryDeviceRepository::with_persistent(durable);
    cache.load_from_persistent().await;
    assert_eq!(cache.latest_platform_timestamp().await, 900);
    assert_eq!(cache.gateway_devices().await.len(), 1);
}
