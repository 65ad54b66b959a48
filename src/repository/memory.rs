//! The in-memory repository tier. Hot lookups are served from a mutex-guarded
//! index; every mutation is forwarded to the durable tier (when one exists)
//! through a private command queue, so durability never blocks the caller and
//! the durable store has a single writer.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use log::debug;

use crate::model::{DeviceOwnership, StoredDeviceInformation};
use crate::repository::DeviceRepository;
use crate::util::CommandQueue;

#[derive(Debug, Default)]
struct Index {
    devices: HashMap<String, StoredDeviceInformation>,
    latest_platform_timestamp: i64,
}

pub struct InMemoryDeviceRepository {
    index: Mutex<Index>,
    persistent: Option<Arc<dyn DeviceRepository>>,
    write_through: Option<CommandQueue>,
}

impl InMemoryDeviceRepository {
    /// A standalone cache with no durable tier (the CACHED policy).
    pub fn new() -> Self {
        InMemoryDeviceRepository {
            index: Mutex::new(Index::default()),
            persistent: None,
            write_through: None,
        }
    }

    /// A cache written through to `persistent` (the FULL policy).
    pub fn with_persistent(persistent: Arc<dyn DeviceRepository>) -> Self {
        InMemoryDeviceRepository {
            index: Mutex::new(Index::default()),
            persistent: Some(persistent),
            write_through: Some(CommandQueue::new("device-repository-write-through")),
        }
    }

    /// Pulls the durable tier's state into the index. Called when the
    /// platform connection is (re-)established; after a restart the durable
    /// state is canonical.
    pub async fn load_from_persistent(&self) {
        let Some(persistent) = &self.persistent else {
            return;
        };
        let timestamp = persistent.latest_platform_timestamp().await;
        let gateway_devices = persistent.gateway_devices().await;
        let mut index = self.index.lock().expect("repository lock poisoned");
        if timestamp > index.latest_platform_timestamp {
            index.latest_platform_timestamp = timestamp;
        }
        for device in gateway_devices {
            index.devices.insert(device.device_key.clone(), device);
        }
        debug!(
            "Loaded device repository from durable store; latest platform timestamp is {}.",
            index.latest_platform_timestamp
        );
    }

    fn forward(&self, work: impl std::future::Future<Output = ()> + Send + 'static) {
        if let Some(queue) = &self.write_through {
            queue.push(work);
        }
    }
}

impl Default for InMemoryDeviceRepository {
    fn default() -> Self {
        InMemoryDeviceRepository::new()
    }
}

#[async_trait]
impl DeviceRepository for InMemoryDeviceRepository {
    async fn save(&self, devices: Vec<StoredDeviceInformation>) -> bool {
        {
            let mut index = self.index.lock().expect("repository lock poisoned");
            for device in &devices {
                if device.owned_by == DeviceOwnership::Platform
                    && device.timestamp_ms > index.latest_platform_timestamp
                {
                    index.latest_platform_timestamp = device.timestamp_ms;
                }
                index
                    .devices
                    .insert(device.device_key.clone(), device.clone());
            }
        }
        if let Some(persistent) = self.persistent.clone() {
            self.forward(async move {
                persistent.save(devices).await;
            });
        }
        true
    }

    async fn remove(&self, device_keys: Vec<String>) -> bool {
        {
            let mut index = self.index.lock().expect("repository lock poisoned");
            for key in &device_keys {
                index.devices.remove(key);
            }
        }
        if let Some(persistent) = self.persistent.clone() {
            self.forward(async move {
                persistent.remove(device_keys).await;
            });
        }
        true
    }

    async fn remove_all(&self) -> bool {
        self.index
            .lock()
            .expect("repository lock poisoned")
            .devices
            .clear();
        if let Some(persistent) = self.persistent.clone() {
            self.forward(async move {
                persistent.remove_all().await;
            });
        }
        true
    }

    async fn contains_device(&self, device_key: &str) -> bool {
        if self
            .index
            .lock()
            .expect("repository lock poisoned")
            .devices
            .contains_key(device_key)
        {
            return true;
        }
        // Fall back to the durable tier and populate the index on a hit.
        let Some(persistent) = &self.persistent else {
            return false;
        };
        match persistent.get(device_key).await {
            Some(device) => {
                self.index
                    .lock()
                    .expect("repository lock poisoned")
                    .devices
                    .insert(device.device_key.clone(), device);
                true
            }
            None => false,
        }
    }

    async fn get(&self, device_key: &str) -> Option<StoredDeviceInformation> {
        if let Some(device) = self
            .index
            .lock()
            .expect("repository lock poisoned")
            .devices
            .get(device_key)
        {
            return Some(device.clone());
        }
        let persistent = self.persistent.as_ref()?;
        let device = persistent.get(device_key).await?;
        self.index
            .lock()
            .expect("repository lock poisoned")
            .devices
            .insert(device.device_key.clone(), device.clone());
        Some(device)
    }

    async fn gateway_devices(&self) -> Vec<StoredDeviceInformation> {
        self.index
            .lock()
            .expect("repository lock poisoned")
            .devices
            .values()
            .filter(|device| device.owned_by == DeviceOwnership::Gateway)
            .cloned()
            .collect()
    }

    async fn latest_platform_timestamp(&self) -> i64 {
        self.index
            .lock()
            .expect("repository lock poisoned")
            .latest_platform_timestamp
    }
}
