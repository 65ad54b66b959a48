//! Storage of the known-subdevice set. Two tiers exist: a durable SQLite
//! store and an in-memory index that caches it; the storage policy decides
//! which tiers a gateway carries.

use async_trait::async_trait;
use serde::Deserialize;

use crate::model::StoredDeviceInformation;

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryDeviceRepository;
pub use sqlite::SqliteDeviceRepository;

/// Which repository tiers the gateway keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceStoragePolicy {
    /// No device bookkeeping at all.
    None,
    /// In-memory index only; forgotten on restart.
    Cached,
    /// Durable store only; every lookup hits the database.
    Persistent,
    /// In-memory index written through to the durable store.
    #[default]
    Full,
}

/// The repository contract. Failures are logged by the implementation and
/// reported as `false`; a failed durable write never stalls the caller.
#[async_trait]
pub trait DeviceRepository: Send + Sync {
    /// Merges a batch by device key: existing entries get the new ownership
    /// and timestamp, new entries are inserted.
    async fn save(&self, devices: Vec<StoredDeviceInformation>) -> bool;

    /// Deletes the listed keys. Absent keys are ignored.
    async fn remove(&self, device_keys: Vec<String>) -> bool;

    async fn remove_all(&self) -> bool;

    async fn contains_device(&self, device_key: &str) -> bool;

    async fn get(&self, device_key: &str) -> Option<StoredDeviceInformation>;

    /// All devices the gateway created on its owner's behalf.
    async fn gateway_devices(&self) -> Vec<StoredDeviceInformation>;

    /// The newest timestamp among platform-owned entries; `0` when none
    /// exist. Used as the `from` bound of the next registered-devices query.
    async fn latest_platform_timestamp(&self) -> i64;
}
