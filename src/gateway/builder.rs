//! Wires the object graph: protocols, repositories per storage policy,
//! publishers, retry layer, routers, services, and the supervisor.

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};

use crate::config::GatewayConfig;
use crate::connectivity::mqtt::{MqttConnection, MqttSettings};
use crate::connectivity::{
    Connection, GatewayMessageRouter, LocalMessageRouter, OutboundPublisher, OutboundRetryHandler,
};
use crate::gateway::{install_lost_callbacks, Gateway, GatewayInner};
use crate::persistence::{
    ExistingDevicesRepository, InMemoryMessagePersistence, JsonFileExistingDevicesRepository,
    MessagePersistence,
};
use crate::protocol::json::{self, JsonProtocol};
use crate::protocol::{
    DataProtocol, GatewayRegistrationProtocol, GatewaySubdeviceProtocol, PlatformStatusProtocol,
    RegistrationProtocol,
};
use crate::repository::{
    DeviceRepository, DeviceStoragePolicy, InMemoryDeviceRepository, SqliteDeviceRepository,
};
use crate::service::{
    DataProvider, DevicesService, ExternalDataService, InternalDataService, KeepAliveService,
    PlatformStatusService,
};
use crate::util::CommandQueue;
use tokio_util::sync::CancellationToken;

const DEFAULT_DEVICE_REPOSITORY_FILE: &str = "gateway-devices.db";
const DEFAULT_EXISTING_DEVICES_FILE: &str = "existing-devices.json";

pub struct GatewayBuilder {
    config: GatewayConfig,
    platform_connection: Option<Arc<dyn Connection>>,
    local_connection: Option<Arc<dyn Connection>>,
    data_provider: Option<Arc<dyn DataProvider>>,
    platform_persistence: Option<Arc<dyn MessagePersistence>>,
    local_persistence: Option<Arc<dyn MessagePersistence>>,
    device_repository: Option<Arc<dyn DeviceRepository>>,
    device_repository_path: Option<PathBuf>,
    existing_devices: Option<Arc<dyn ExistingDevicesRepository>>,
    existing_devices_path: Option<PathBuf>,
    subdevice_protocol: Option<Arc<dyn GatewaySubdeviceProtocol>>,
    registration_protocol: Option<Arc<dyn RegistrationProtocol>>,
    local_registration_protocol: Option<Arc<dyn GatewayRegistrationProtocol>>,
    data_protocol: Option<Arc<dyn DataProtocol>>,
    status_protocol: Option<Arc<dyn PlatformStatusProtocol>>,
    local_data_channels: Option<Vec<String>>,
}

impl GatewayBuilder {
    pub fn new(config: GatewayConfig) -> Self {
        GatewayBuilder {
            config,
            platform_connection: None,
            local_connection: None,
            data_provider: None,
            platform_persistence: None,
            local_persistence: None,
            device_repository: None,
            device_repository_path: None,
            existing_devices: None,
            existing_devices_path: None,
            subdevice_protocol: None,
            registration_protocol: None,
            local_registration_protocol: None,
            data_protocol: None,
            status_protocol: None,
            local_data_channels: None,
        }
    }

    /// Replaces the platform connection; without this an MQTT connection is
    /// built from the configuration.
    pub fn with_platform_connection(mut self, connection: Arc<dyn Connection>) -> Self {
        self.platform_connection = Some(connection);
        self
    }

    /// Replaces the local-bus connection; without this one is built from
    /// `local_bus_uri` when that is configured.
    pub fn with_local_connection(mut self, connection: Arc<dyn Connection>) -> Self {
        self.local_connection = Some(connection);
        self
    }

    /// Enables the embedded data API backed by `provider`.
    pub fn with_data_provider(mut self, provider: Arc<dyn DataProvider>) -> Self {
        self.data_provider = Some(provider);
        self
    }

    pub fn with_platform_persistence(mut self, persistence: Arc<dyn MessagePersistence>) -> Self {
        self.platform_persistence = Some(persistence);
        self
    }

    pub fn with_local_persistence(mut self, persistence: Arc<dyn MessagePersistence>) -> Self {
        self.local_persistence = Some(persistence);
        self
    }

    /// Replaces the device repository regardless of the storage policy.
    pub fn with_device_repository(mut self, repository: Arc<dyn DeviceRepository>) -> Self {
        self.device_repository = Some(repository);
        self
    }

    pub fn with_device_repository_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.device_repository_path = Some(path.into());
        self
    }

    pub fn with_existing_devices_repository(
        mut self,
        repository: Arc<dyn ExistingDevicesRepository>,
    ) -> Self {
        self.existing_devices = Some(repository);
        self
    }

    pub fn with_existing_devices_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.existing_devices_path = Some(path.into());
        self
    }

    pub fn with_subdevice_protocol(mut self, protocol: Arc<dyn GatewaySubdeviceProtocol>) -> Self {
        self.subdevice_protocol = Some(protocol);
        self
    }

    pub fn with_registration_protocol(mut self, protocol: Arc<dyn RegistrationProtocol>) -> Self {
        self.registration_protocol = Some(protocol);
        self
    }

    pub fn with_local_registration_protocol(
        mut self,
        protocol: Arc<dyn GatewayRegistrationProtocol>,
    ) -> Self {
        self.local_registration_protocol = Some(protocol);
        self
    }

    pub fn with_data_protocol(mut self, protocol: Arc<dyn DataProtocol>) -> Self {
        self.data_protocol = Some(protocol);
        self
    }

    pub fn with_status_protocol(mut self, protocol: Arc<dyn PlatformStatusProtocol>) -> Self {
        self.status_protocol = Some(protocol);
        self
    }

    /// Channel filters for local subdevice traffic relayed to the platform.
    /// Defaults to the JSON protocol's data channels.
    pub fn with_local_data_channels(mut self, channels: Vec<String>) -> Self {
        self.local_data_channels = Some(channels);
        self
    }

    /// Builds the gateway. Must run inside a tokio runtime; workers are
    /// spawned here. The gateway stays disconnected until
    /// [`Gateway::connect`].
    pub async fn build(self) -> Result<Gateway> {
        let config = self.config;
        if config.gateway_key.is_empty() {
            bail!("The gateway key must not be empty.");
        }

        let json = Arc::new(JsonProtocol);
        let subdevice_protocol: Arc<dyn GatewaySubdeviceProtocol> =
            self.subdevice_protocol.unwrap_or_else(|| json.clone());
        let registration_protocol: Arc<dyn RegistrationProtocol> =
            self.registration_protocol.unwrap_or_else(|| json.clone());
        let status_protocol: Arc<dyn PlatformStatusProtocol> =
            self.status_protocol.unwrap_or_else(|| json.clone());
        let data_protocol: Arc<dyn DataProtocol> =
            self.data_protocol.unwrap_or_else(|| json.clone());

        // Platform connection.
        let platform_connection: Arc<dyn Connection> = match self.platform_connection {
            Some(connection) => connection,
            None => {
                let mut settings =
                    MqttSettings::new(config.gateway_key.clone(), config.platform_uri.clone());
                settings.username = Some(config.gateway_key.clone());
                settings.password = Some(config.gateway_password.clone());
                settings.keep_alive = Duration::from_secs(config.keep_alive_seconds);
                settings.clean_session = false;
                settings.ca_bundle_path = config.platform_ca_bundle_path.clone();
                settings.max_packet_size = config.max_packet_size;
                let connection = MqttConnection::new(settings);
                connection.set_subscription_filters(
                    subdevice_protocol.inbound_channels(&config.gateway_key),
                );
                Arc::new(connection)
            }
        };

        // Local connection, when local communication is wanted at all.
        let local_mqtt: Option<Arc<MqttConnection>> = match (&self.local_connection, &config.local_bus_uri) {
            (Some(_), _) => None,
            (None, Some(uri)) => {
                let mut settings = MqttSettings::new(config.gateway_key.clone(), uri.clone());
                settings.keep_alive = Duration::from_secs(config.keep_alive_seconds);
                Some(Arc::new(MqttConnection::new(settings)))
            }
            (None, None) => None,
        };
        let local_connection: Option<Arc<dyn Connection>> = self
            .local_connection
            .or_else(|| local_mqtt.clone().map(|c| c as Arc<dyn Connection>));

        let local_registration_protocol: Option<Arc<dyn GatewayRegistrationProtocol>> =
            local_connection
                .as_ref()
                .map(|_| {
                    self.local_registration_protocol
                        .unwrap_or_else(|| json.clone() as Arc<dyn GatewayRegistrationProtocol>)
                });

        // Publishers and the retry layer on top of the platform one.
        let platform_publisher = OutboundPublisher::new(
            "platform",
            platform_connection.clone(),
            self.platform_persistence
                .unwrap_or_else(|| Arc::new(InMemoryMessagePersistence::new())),
        );
        let local_publisher = local_connection.as_ref().map(|connection| {
            OutboundPublisher::new(
                "local",
                connection.clone(),
                self.local_persistence
                    .unwrap_or_else(|| Arc::new(InMemoryMessagePersistence::new())),
            )
        });
        let platform_retry = Arc::new(OutboundRetryHandler::new(platform_publisher.clone()));

        // Repositories per storage policy; an explicit repository wins.
        let mut cache_repository: Option<Arc<InMemoryDeviceRepository>> = None;
        let device_repository: Option<Arc<dyn DeviceRepository>> = match self.device_repository {
            Some(repository) => Some(repository),
            None => match config.device_storage_policy {
                DeviceStoragePolicy::None => None,
                DeviceStoragePolicy::Cached => {
                    let cache = Arc::new(InMemoryDeviceRepository::new());
                    cache_repository = Some(cache.clone());
                    Some(cache)
                }
                DeviceStoragePolicy::Persistent => {
                    let path = self
                        .device_repository_path
                        .unwrap_or_else(|| PathBuf::from(DEFAULT_DEVICE_REPOSITORY_FILE));
                    Some(Arc::new(SqliteDeviceRepository::open(&path).await?))
                }
                DeviceStoragePolicy::Full => {
                    let path = self
                        .device_repository_path
                        .unwrap_or_else(|| PathBuf::from(DEFAULT_DEVICE_REPOSITORY_FILE));
                    let persistent: Arc<dyn DeviceRepository> =
                        Arc::new(SqliteDeviceRepository::open(&path).await?);
                    let cache = Arc::new(InMemoryDeviceRepository::with_persistent(persistent));
                    cache_repository = Some(cache.clone());
                    Some(cache)
                }
            },
        };

        let existing_devices: Arc<dyn ExistingDevicesRepository> =
            self.existing_devices.unwrap_or_else(|| {
                let path = self
                    .existing_devices_path
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_EXISTING_DEVICES_FILE));
                Arc::new(JsonFileExistingDevicesRepository::open(path))
            });

        // Services.
        let devices_service = Arc::new(DevicesService::new(
            config.gateway_key.clone(),
            registration_protocol,
            platform_publisher.clone(),
            platform_retry.clone(),
            local_registration_protocol,
            local_publisher.clone(),
            device_repository,
            Some(existing_devices),
            config.retry_count,
            Duration::from_millis(config.retry_interval_ms),
        ));

        let internal_data_service = match (&local_publisher, &local_connection) {
            (Some(local_publisher), Some(_)) => Some(Arc::new(InternalDataService::new(
                config.gateway_key.clone(),
                platform_publisher.clone(),
                local_publisher.clone(),
                subdevice_protocol.clone(),
                self.local_data_channels
                    .unwrap_or_else(json::local_data_channels),
            ))),
            _ => None,
        };

        let external_data_service = self.data_provider.map(|provider| {
            Arc::new(ExternalDataService::new(
                config.gateway_key.clone(),
                subdevice_protocol.clone(),
                data_protocol.clone(),
                platform_publisher.clone(),
                provider,
            ))
        });

        let keep_alive_service = Arc::new(KeepAliveService::new(
            config.gateway_key.clone(),
            data_protocol,
            platform_publisher.clone(),
            Duration::from_secs(config.keep_alive_seconds),
        ));

        let platform_status_service = local_connection.as_ref().map(|connection| {
            Arc::new(PlatformStatusService::new(
                connection.clone(),
                status_protocol,
                config.gateway_key.clone(),
            ))
        });

        // Platform inbound routing.
        let gateway_router = Arc::new(GatewayMessageRouter::new(subdevice_protocol));
        gateway_router.add_listener("DevicesService", devices_service.clone());
        if let Some(internal) = &internal_data_service {
            gateway_router.add_listener("InternalDataService", internal.clone());
        }
        if let Some(external) = &external_data_service {
            gateway_router.add_listener("ExternalDataService", external.clone());
        }
        platform_connection.set_listener(gateway_router.clone());

        // Local inbound routing.
        let local_router = local_connection.as_ref().map(|connection| {
            let router = Arc::new(LocalMessageRouter::new());
            router.add_listener("DevicesService", devices_service.clone());
            if let Some(internal) = &internal_data_service {
                router.add_listener("InternalDataService", internal.clone());
            }
            connection.set_listener(router.clone());
            if let Some(mqtt) = &local_mqtt {
                mqtt.set_subscription_filters(router.subscription_channels());
            }
            router
        });

        let inner = Arc::new(GatewayInner {
            reconnect_delay: Duration::from_millis(config.reconnect_delay_ms),
            platform_connection,
            local_connection,
            platform_publisher,
            local_publisher,
            platform_retry,
            gateway_router,
            local_router,
            devices_service,
            internal_data_service,
            external_data_service,
            platform_status_service,
            keep_alive_service,
            cache_repository,
            platform_connected: AtomicBool::new(false),
            local_connected: AtomicBool::new(false),
            queue: CommandQueue::new("gateway-supervisor"),
            cancellation: CancellationToken::new(),
            connection_listeners: Mutex::new(Vec::new()),
        });
        install_lost_callbacks(&inner);

        Ok(Gateway::from_inner(inner))
    }
}
