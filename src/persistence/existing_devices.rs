//! The existing-devices log: every device key the gateway has ever seen on
//! the local bus, persisted as a JSON array of strings. The devices service
//! compares this list against the platform's children set to detect devices
//! that disappeared from the platform.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::{error, warn};

pub trait ExistingDevicesRepository: Send + Sync {
    /// Records a key. Duplicate keys are ignored.
    fn add_device_key(&self, device_key: &str);

    fn device_keys(&self) -> Vec<String>;
}

/// File-backed implementation. The whole list is rewritten on every add; the
/// list stays small (one entry per device ever attached).
#[derive(Debug)]
pub struct JsonFileExistingDevicesRepository {
    path: PathBuf,
    keys: Mutex<Vec<String>>,
}

impl JsonFileExistingDevicesRepository {
    /// Opens the log, reading any existing content. A missing file is an
    /// empty list; a corrupt file is logged and treated as empty.
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let keys = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<Vec<String>>(&bytes) {
                Ok(keys) => keys,
                Err(e) => {
                    warn!(
                        "Existing-devices file '{}' is not a JSON array of strings, starting empty: {e}",
                        path.display()
                    );
                    Vec::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                warn!(
                    "Unable to read existing-devices file '{}', starting empty: {e}",
                    path.display()
                );
                Vec::new()
            }
        };
        JsonFileExistingDevicesRepository {
            path,
            keys: Mutex::new(keys),
        }
    }

    fn store(&self, keys: &[String]) {
        match serde_json::to_vec(keys) {
            Ok(bytes) => {
                if let Err(e) = std::fs::write(&self.path, bytes) {
                    error!(
                        "Unable to write existing-devices file '{}': {e}",
                        self.path.display()
                    );
                }
            }
            Err(e) => error!("Unable to serialize existing-devices list: {e}"),
        }
    }
}

impl ExistingDevicesRepository for JsonFileExistingDevicesRepository {
    fn add_device_key(&self, device_key: &str) {
        let mut keys = self.keys.lock().expect("existing-devices lock poisoned");
        if keys.iter().any(|key| key == device_key) {
            return;
        }
        keys.push(device_key.to_owned());
        self.store(&keys);
    }

    fn device_keys(&self) -> Vec<String> {
        self.keys
            .lock()
            .expect("existing-devices lock poisoned")
            .clone()
    }
}
