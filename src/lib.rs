//! Gateway SDK that bridges a fleet of subdevices on a local message bus to
//! a remote IoT platform through a single authenticated MQTT session.
//!
//! The gateway routes traffic in both directions, rewriting topics to add or
//! strip the gateway envelope; manages subdevice lifecycle (registration,
//! removal, synchronization of the registered set, durable caching of that
//! set); forwards telemetry, parameter, time-sync, file-transfer and
//! firmware-update traffic transparently; broadcasts platform connectivity
//! onto the local bus; and delivers at-least-once with retry and reconnect
//! supervision on both links.
//!
//! Entry point: [`Gateway::builder`] with a [`GatewayConfig`].

pub mod config;
pub mod connectivity;
pub mod gateway;
pub mod model;
pub mod persistence;
pub mod protocol;
pub mod repository;
pub mod service;

pub mod util;

pub use config::GatewayConfig;
pub use gateway::{Gateway, GatewayBuilder};
pub use model::{
    DeviceIdentity, DeviceOwnership, GatewaySubdeviceMessage, Message, MessageType,
    StoredDeviceInformation,
};
pub use repository::DeviceStoragePolicy;
pub use service::{DataProvider, DevicesService, ExternalDataService};
