//! Gateway configuration. Parsing a file into this struct is the caller's
//! business (it derives `Deserialize`); the crate only consumes the values.

use std::path::PathBuf;

use serde::Deserialize;

use crate::repository::DeviceStoragePolicy;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// The key the gateway authenticates with. Also the device key used in
    /// every envelope.
    pub gateway_key: String,
    pub gateway_password: String,
    /// Platform broker URI, e.g. `ssl://platform.example.com:8883`.
    pub platform_uri: String,
    /// PEM bundle used to validate the platform's certificate. System roots
    /// apply when unset.
    #[serde(default)]
    pub platform_ca_bundle_path: Option<PathBuf>,
    /// Local broker URI, e.g. `tcp://localhost:1883`. Without it the gateway
    /// runs with the embedded data API only.
    #[serde(default)]
    pub local_bus_uri: Option<String>,
    #[serde(default = "default_keep_alive_seconds")]
    pub keep_alive_seconds: u64,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_retry_count")]
    pub retry_count: u16,
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
    #[serde(default)]
    pub device_storage_policy: DeviceStoragePolicy,
    /// Where routed file-transfer content may be staged by a file-management
    /// extension. The core only carries the option.
    #[serde(default)]
    pub files_directory: Option<PathBuf>,
    /// Working directory for a firmware-update extension. The core only
    /// carries the option.
    #[serde(default)]
    pub firmware_working_directory: Option<PathBuf>,
    #[serde(default)]
    pub max_packet_size: Option<usize>,
    /// How long error messages stay retained for late local subscribers.
    #[serde(default = "default_error_retain_ms")]
    pub error_retain_ms: u64,
}

impl GatewayConfig {
    pub fn new(
        gateway_key: impl Into<String>,
        gateway_password: impl Into<String>,
        platform_uri: impl Into<String>,
    ) -> Self {
        GatewayConfig {
            gateway_key: gateway_key.into(),
            gateway_password: gateway_password.into(),
            platform_uri: platform_uri.into(),
            platform_ca_bundle_path: None,
            local_bus_uri: None,
            keep_alive_seconds: default_keep_alive_seconds(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            retry_count: default_retry_count(),
            retry_interval_ms: default_retry_interval_ms(),
            device_storage_policy: DeviceStoragePolicy::default(),
            files_directory: None,
            firmware_working_directory: None,
            max_packet_size: None,
            error_retain_ms: default_error_retain_ms(),
        }
    }
}

fn default_keep_alive_seconds() -> u64 {
    60
}

fn default_reconnect_delay_ms() -> u64 {
    2000
}

fn default_retry_count() -> u16 {
    3
}

fn default_retry_interval_ms() -> u64 {
    5000
}

fn default_error_retain_ms() -> u64 {
    1000
}
