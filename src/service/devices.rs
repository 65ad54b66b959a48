//! Subdevice lifecycle. This service bridges registration, removal and
//! catalog queries between the local bus and the platform, keeps the device
//! repository in step with what the platform reports, and correlates the two
//! request/response exchanges the platform offers: children synchronization
//! and the registered-devices query.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error, info, warn};

use crate::connectivity::{
    GatewayMessageListener, MessageListener, OutboundPublisher, OutboundRetryHandler, RetryMessage,
};
use crate::model::messages::{
    ChildrenSynchronizationRequestMessage, ChildrenSynchronizationResponseMessage,
    DeviceRegistrationData, DeviceRegistrationMessage, DeviceRegistrationResponseMessage,
    DeviceRemovalMessage, RegisteredDevicesRequestMessage, RegisteredDevicesResponseMessage,
};
use crate::model::{
    DeviceOwnership, GatewaySubdeviceMessage, Message, MessageType, StoredDeviceInformation,
};
use crate::persistence::ExistingDevicesRepository;
use crate::protocol::{GatewayRegistrationProtocol, RegistrationProtocol};
use crate::repository::DeviceRepository;
use crate::util::{unix_millis, CommandQueue};

/// Identifies an in-flight registered-devices query; the platform echoes all
/// three fields in the response, which is how the response finds its
/// callback.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegisteredDevicesRequestParameters {
    pub timestamp_from: i64,
    pub device_type: String,
    pub external_id: String,
}

impl RegisteredDevicesRequestParameters {
    pub fn new(timestamp_from: i64) -> Self {
        RegisteredDevicesRequestParameters {
            timestamp_from,
            device_type: String::new(),
            external_id: String::new(),
        }
    }
}

type RegisteredDevicesResult = Option<RegisteredDevicesResponseMessage>;
type ChildrenSyncResult = Option<ChildrenSynchronizationResponseMessage>;

/// What to do when a registered-devices response (or its retry exhaustion,
/// signalled with `None`) arrives.
pub struct RegisteredDevicesRequestCallback {
    sent_at: i64,
    callback: Option<Box<dyn FnOnce(RegisteredDevicesResult) + Send>>,
}

impl RegisteredDevicesRequestCallback {
    pub fn new(callback: impl FnOnce(RegisteredDevicesResult) + Send + 'static) -> Self {
        RegisteredDevicesRequestCallback {
            sent_at: unix_millis(),
            callback: Some(Box::new(callback)),
        }
    }

    fn empty() -> Self {
        RegisteredDevicesRequestCallback {
            sent_at: unix_millis(),
            callback: None,
        }
    }

    fn fire(mut self, response: RegisteredDevicesResult) {
        if let Some(callback) = self.callback.take() {
            callback(response);
        }
    }
}

/// A queued consumer of the next children-synchronization response. The
/// response consumes the front of the FIFO; retry exhaustion fires the same
/// callback with `None`.
pub struct ChildrenSynchronizationRequestCallback {
    registering_devices: Vec<String>,
    callback: Mutex<Option<Box<dyn FnOnce(ChildrenSyncResult) + Send>>>,
}

impl ChildrenSynchronizationRequestCallback {
    pub fn new(
        registering_devices: Vec<String>,
        callback: impl FnOnce(ChildrenSyncResult) + Send + 'static,
    ) -> Arc<Self> {
        Arc::new(ChildrenSynchronizationRequestCallback {
            registering_devices,
            callback: Mutex::new(Some(Box::new(callback))),
        })
    }

    pub fn registering_devices(&self) -> &[String] {
        &self.registering_devices
    }

    fn fire(&self, response: ChildrenSyncResult) {
        let callback = self
            .callback
            .lock()
            .expect("child-sync callback lock poisoned")
            .take();
        if let Some(callback) = callback {
            callback(response);
        }
    }
}

/// Reports which of the requested keys the platform accepted.
pub type RegistrationResultCallback = Box<dyn FnOnce(Vec<String>, Vec<String>) + Send>;

struct Registries {
    child_sync: Mutex<VecDeque<Arc<ChildrenSynchronizationRequestCallback>>>,
    registered_devices:
        Mutex<HashMap<RegisteredDevicesRequestParameters, RegisteredDevicesRequestCallback>>,
}

pub struct DevicesService {
    gateway_key: String,
    platform_protocol: Arc<dyn RegistrationProtocol>,
    platform_outbound: Arc<OutboundPublisher>,
    platform_retry: Arc<OutboundRetryHandler>,
    local_protocol: Option<Arc<dyn GatewayRegistrationProtocol>>,
    local_outbound: Option<Arc<OutboundPublisher>>,
    device_repository: Option<Arc<dyn DeviceRepository>>,
    existing_devices: Option<Arc<dyn ExistingDevicesRepository>>,
    registries: Arc<Registries>,
    queue: Arc<CommandQueue>,
    retry_count: u16,
    retry_interval: Duration,
}

impl DevicesService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        gateway_key: impl Into<String>,
        platform_protocol: Arc<dyn RegistrationProtocol>,
        platform_outbound: Arc<OutboundPublisher>,
        platform_retry: Arc<OutboundRetryHandler>,
        local_protocol: Option<Arc<dyn GatewayRegistrationProtocol>>,
        local_outbound: Option<Arc<OutboundPublisher>>,
        device_repository: Option<Arc<dyn DeviceRepository>>,
        existing_devices: Option<Arc<dyn ExistingDevicesRepository>>,
        retry_count: u16,
        retry_interval: Duration,
    ) -> Self {
        DevicesService {
            gateway_key: gateway_key.into(),
            platform_protocol,
            platform_outbound,
            platform_retry,
            local_protocol,
            local_outbound,
            device_repository,
            existing_devices,
            registries: Arc::new(Registries {
                child_sync: Mutex::new(VecDeque::new()),
                registered_devices: Mutex::new(HashMap::new()),
            }),
            queue: Arc::new(CommandQueue::new("devices-service")),
            retry_count,
            retry_interval,
        }
    }

    /// The local-bus registration protocol. Calling this on a service built
    /// without local communication is a programming error.
    pub fn local_protocol(&self) -> &Arc<dyn GatewayRegistrationProtocol> {
        self.local_protocol
            .as_ref()
            .expect("requested the local protocol but local communication is disabled")
    }

    pub async fn device_exists(&self, device_key: &str) -> bool {
        match &self.device_repository {
            Some(repository) => repository.contains_device(device_key).await,
            None => false,
        }
    }

    /// Sends a registration request for `devices` and follows it with a
    /// children-synchronization request. Once the platform's children list
    /// arrives, `callback` learns which of the requested keys made it
    /// (accepted, rejected).
    ///
    /// Returns `false` without publishing anything when the list is empty,
    /// a device is missing its name or key, or the protocol refuses the
    /// message.
    pub fn register_child_devices(
        &self,
        devices: Vec<DeviceRegistrationData>,
        callback: Option<RegistrationResultCallback>,
    ) -> bool {
        let error_prefix = "Failed to send out a 'DeviceRegistration' message";
        if devices.is_empty() {
            warn!("{error_prefix}: the device list is empty.");
            return false;
        }
        if devices
            .iter()
            .any(|device| device.name.is_empty() || device.key.is_empty())
        {
            warn!("{error_prefix}: a device is missing a name or a key.");
            return false;
        }

        let keys: Vec<String> = devices.iter().map(|device| device.key.clone()).collect();
        let message = DeviceRegistrationMessage { devices };
        let Some(request) = self
            .platform_protocol
            .make_registration_message(&self.gateway_key, &message)
        else {
            error!("{error_prefix}: failed to build the outbound message.");
            return false;
        };
        self.platform_outbound.enqueue(request);

        // The platform does not answer the registration directly; the
        // children list tells us which keys were accepted.
        let sync_callback = ChildrenSynchronizationRequestCallback::new(
            keys.clone(),
            move |response: ChildrenSyncResult| {
                let Some(callback) = callback else {
                    return;
                };
                match response {
                    Some(response) => {
                        let children: HashSet<&String> = response.children.iter().collect();
                        let (success, failed) =
                            keys.into_iter().partition(|key| children.contains(key));
                        callback(success, failed);
                    }
                    None => callback(Vec::new(), keys),
                }
            },
        );
        self.send_out_children_synchronization_request(Some(sync_callback))
    }

    /// Sends a removal request for `device_keys`. Returns `false` without
    /// publishing when the list is empty, contains an empty key, or the
    /// protocol refuses the message.
    pub fn remove_child_devices(&self, device_keys: Vec<String>) -> bool {
        let error_prefix = "Failed to send out a 'DeviceRemoval' message";
        if device_keys.is_empty() {
            warn!("{error_prefix}: the key list is empty.");
            return false;
        }
        if device_keys.iter().any(|key| key.is_empty()) {
            warn!("{error_prefix}: the key list contains an empty key.");
            return false;
        }

        let message = DeviceRemovalMessage { keys: device_keys };
        let Some(request) = self
            .platform_protocol
            .make_removal_message(&self.gateway_key, &message)
        else {
            error!("{error_prefix}: failed to build the outbound message.");
            return false;
        };
        self.platform_outbound.enqueue(request);
        true
    }

    /// Asks the platform which devices it currently considers children of
    /// this gateway. The callback joins the FIFO of response consumers; on
    /// retry exhaustion it fires with `None` and leaves the FIFO.
    pub fn send_out_children_synchronization_request(
        &self,
        callback: Option<Arc<ChildrenSynchronizationRequestCallback>>,
    ) -> bool {
        let error_prefix = "Failed to send out a 'ChildrenSynchronizationRequest' message";
        let Some(request) = self.platform_protocol.make_children_synchronization_request(
            &self.gateway_key,
            &ChildrenSynchronizationRequestMessage,
        ) else {
            error!("{error_prefix}: failed to build the outbound message.");
            return false;
        };

        let response_channel = self
            .platform_protocol
            .response_channel(MessageType::ChildrenSynchronizationRequest, &self.gateway_key);

        let registries = self.registries.clone();
        let failed_callback = callback.clone();
        self.platform_retry.add(RetryMessage {
            message: request,
            response_channel,
            on_fail: Box::new(move |_| {
                error!(
                    "Failed to receive response for 'ChildrenSynchronizationRequest' - \
                     no response from platform."
                );
                if let Some(callback) = failed_callback {
                    registries
                        .child_sync
                        .lock()
                        .expect("child-sync registry lock poisoned")
                        .retain(|queued| !Arc::ptr_eq(queued, &callback));
                    callback.fire(None);
                }
            }),
            retry_count: self.retry_count,
            retry_interval: self.retry_interval,
        });

        if let Some(callback) = callback {
            self.registries
                .child_sync
                .lock()
                .expect("child-sync registry lock poisoned")
                .push_back(callback);
        }
        true
    }

    /// Queries the platform's device catalog. The callback is keyed by the
    /// request parameters and fires once the response with matching
    /// parameters arrives, or with `None` on retry exhaustion.
    pub fn send_out_registered_devices_request(
        &self,
        parameters: RegisteredDevicesRequestParameters,
        callback: Option<RegisteredDevicesRequestCallback>,
    ) -> bool {
        let error_prefix = "Failed to send out a 'RegisteredDevicesRequest' message";
        let message = RegisteredDevicesRequestMessage {
            timestamp_from: parameters.timestamp_from,
            device_type: parameters.device_type.clone(),
            external_id: parameters.external_id.clone(),
        };
        let Some(request) = self
            .platform_protocol
            .make_registered_devices_request(&self.gateway_key, &message)
        else {
            error!("{error_prefix}: failed to build the outbound message.");
            return false;
        };

        let response_channel = self
            .platform_protocol
            .response_channel(MessageType::RegisteredDevicesRequest, &self.gateway_key);

        let registries = self.registries.clone();
        let fail_parameters = parameters.clone();
        self.platform_retry.add(RetryMessage {
            message: request,
            response_channel,
            on_fail: Box::new(move |_| {
                error!(
                    "Failed to receive response for 'RegisteredDevicesRequest' - \
                     no response from platform."
                );
                let entry = registries
                    .registered_devices
                    .lock()
                    .expect("registered-devices registry lock poisoned")
                    .remove(&fail_parameters);
                if let Some(entry) = entry {
                    entry.fire(None);
                }
            }),
            retry_count: self.retry_count,
            retry_interval: self.retry_interval,
        });

        self.registries
            .registered_devices
            .lock()
            .expect("registered-devices registry lock poisoned")
            .insert(
                parameters,
                callback.unwrap_or_else(RegisteredDevicesRequestCallback::empty),
            );
        true
    }

    /// Brings the repository in step with the platform: asks for every
    /// device registered since the newest known timestamp, and separately
    /// for the current children list. Devices the gateway has seen locally
    /// but the platform no longer lists get a removal request.
    pub async fn update_device_cache(&self) {
        let Some(repository) = self.device_repository.clone() else {
            warn!("Skipping the device cache update - no device repository exists.");
            return;
        };

        let last_timestamp = repository.latest_platform_timestamp().await;
        debug!("Requesting devices registered after timestamp {last_timestamp}.");
        self.send_out_registered_devices_request(
            RegisteredDevicesRequestParameters::new(last_timestamp),
            None,
        );

        let Some(existing_devices) = self.existing_devices.clone() else {
            return;
        };
        let gateway_key = self.gateway_key.clone();
        let platform_protocol = self.platform_protocol.clone();
        let platform_outbound = self.platform_outbound.clone();
        let queue = self.queue.clone();
        let callback = ChildrenSynchronizationRequestCallback::new(
            Vec::new(),
            move |response: ChildrenSyncResult| {
                let Some(response) = response else {
                    return;
                };
                let children: HashSet<String> = response.children.into_iter().collect();
                let missing: Vec<String> = existing_devices
                    .device_keys()
                    .into_iter()
                    .filter(|key| !children.contains(key))
                    .collect();
                if missing.is_empty() {
                    return;
                }

                info!(
                    "The platform no longer lists {} previously seen device(s); removing them.",
                    missing.len()
                );
                let removal = DeviceRemovalMessage {
                    keys: missing.clone(),
                };
                match platform_protocol.make_removal_message(&gateway_key, &removal) {
                    Some(request) => {
                        platform_outbound.enqueue(request);
                        queue.push(async move {
                            repository.remove(missing).await;
                        });
                    }
                    None => error!("Failed to build the 'DeviceRemoval' message."),
                }
            },
        );
        self.send_out_children_synchronization_request(Some(callback));
    }

    async fn handle_children_synchronization_response(
        &self,
        response: ChildrenSynchronizationResponseMessage,
    ) {
        info!(
            "The platform lists {} child device(s).",
            response.children.len()
        );

        if let Some(repository) = &self.device_repository {
            let now = unix_millis();
            let devices = response
                .children
                .iter()
                .map(|key| StoredDeviceInformation::new(key.clone(), DeviceOwnership::Gateway, now))
                .collect::<Vec<_>>();
            if !devices.is_empty() {
                repository.save(devices).await;
            }
        }
        if let Some(existing_devices) = &self.existing_devices {
            let known: HashSet<String> = existing_devices.device_keys().into_iter().collect();
            for child in &response.children {
                if !known.contains(child) {
                    existing_devices.add_device_key(child);
                }
            }
        }

        let callback = self
            .registries
            .child_sync
            .lock()
            .expect("child-sync registry lock poisoned")
            .pop_front();
        match callback {
            Some(callback) => callback.fire(Some(response)),
            None => debug!("No callback is waiting for a children-synchronization response."),
        }
    }

    async fn handle_registered_devices_response(
        &self,
        response: RegisteredDevicesResponseMessage,
    ) {
        let parameters = RegisteredDevicesRequestParameters {
            timestamp_from: response.timestamp_from,
            device_type: response.device_type.clone(),
            external_id: response.external_id.clone(),
        };
        let entry = self
            .registries
            .registered_devices
            .lock()
            .expect("registered-devices registry lock poisoned")
            .remove(&parameters);

        info!(
            "Received info about {} device(s).",
            response.matching_devices.len()
        );

        if let Some(repository) = &self.device_repository {
            let timestamp = entry
                .as_ref()
                .map(|entry| entry.sent_at)
                .unwrap_or_else(unix_millis);
            let devices = response
                .matching_devices
                .iter()
                .map(|device| {
                    StoredDeviceInformation::new(
                        device.device_key.clone(),
                        DeviceOwnership::Platform,
                        timestamp,
                    )
                })
                .collect::<Vec<_>>();
            if !devices.is_empty() {
                repository.save(devices).await;
            }
        }

        if let Some(entry) = entry {
            entry.fire(Some(response));
        }
    }
}

#[async_trait]
impl GatewayMessageListener for DevicesService {
    fn message_types(&self) -> Vec<MessageType> {
        vec![
            MessageType::ChildrenSynchronizationResponse,
            MessageType::RegisteredDevicesResponse,
        ]
    }

    async fn receive_messages(&self, messages: Vec<GatewaySubdeviceMessage>) {
        for message in messages {
            let inner = message.message();
            // Clears any retry record waiting for this response.
            self.platform_retry.message_received(inner);

            match self.platform_protocol.message_type(inner) {
                MessageType::ChildrenSynchronizationResponse => {
                    let Some(response) = self
                        .platform_protocol
                        .parse_children_synchronization_response(inner)
                    else {
                        error!(
                            "Failed to parse an incoming 'ChildrenSynchronizationResponse' message."
                        );
                        continue;
                    };
                    self.handle_children_synchronization_response(response).await;
                }
                MessageType::RegisteredDevicesResponse => {
                    let Some(response) = self
                        .platform_protocol
                        .parse_registered_devices_response(inner)
                    else {
                        error!("Failed to parse an incoming 'RegisteredDevicesResponse' message.");
                        continue;
                    };
                    self.handle_registered_devices_response(response).await;
                }
                other => {
                    warn!("Received a message of unexpected type {other:?}. Ignoring.");
                }
            }
        }
    }
}

#[async_trait]
impl MessageListener for DevicesService {
    fn subscription_channels(&self) -> Vec<String> {
        match &self.local_protocol {
            Some(protocol) => protocol.inbound_channels(),
            None => Vec::new(),
        }
    }

    async fn message_received(&self, message: Message) {
        let Some(local_protocol) = self.local_protocol.clone() else {
            error!("Received an incoming local message but the local protocol is missing.");
            return;
        };

        let message_type = local_protocol.message_type(&message);
        let device_key = local_protocol.device_key(&message).unwrap_or_default();
        match message_type {
            MessageType::DeviceRegistration => {
                let Some(parsed) = local_protocol.parse_registration_message(&message) else {
                    error!(
                        "Failed to handle an incoming local 'DeviceRegistration' message - \
                         failed to parse the message."
                    );
                    return;
                };

                // Tell the requesting subdevice how its registration went.
                let local_outbound = self.local_outbound.clone();
                let callback: RegistrationResultCallback =
                    Box::new(move |success: Vec<String>, failed: Vec<String>| {
                        let Some(local_outbound) = local_outbound else {
                            return;
                        };
                        let response = DeviceRegistrationResponseMessage { success, failed };
                        match local_protocol.make_registration_response(&device_key, &response) {
                            Some(message) => local_outbound.enqueue(message),
                            None => error!(
                                "Failed to build the outgoing response for a local \
                                 'DeviceRegistration' message."
                            ),
                        }
                    });
                if !self.register_child_devices(parsed.devices, Some(callback)) {
                    error!("Failed to forward a local 'DeviceRegistration' message.");
                }
            }
            MessageType::DeviceRemoval => {
                let Some(parsed) = local_protocol.parse_removal_message(&message) else {
                    error!(
                        "Failed to handle an incoming local 'DeviceRemoval' message - \
                         failed to parse the message."
                    );
                    return;
                };
                if !self.remove_child_devices(parsed.keys) {
                    error!("Failed to forward a local 'DeviceRemoval' message.");
                }
            }
            MessageType::RegisteredDevicesRequest => {
                let Some(parsed) = local_protocol.parse_registered_devices_request(&message)
                else {
                    error!(
                        "Failed to handle an incoming local 'RegisteredDevicesRequest' message - \
                         failed to parse the message."
                    );
                    return;
                };
                let parameters = RegisteredDevicesRequestParameters {
                    timestamp_from: parsed.timestamp_from,
                    device_type: parsed.device_type,
                    external_id: parsed.external_id,
                };

                // Route the response back onto the local bus.
                let local_outbound = self.local_outbound.clone();
                let callback = RegisteredDevicesRequestCallback::new(
                    move |response: RegisteredDevicesResult| {
                        let (Some(local_outbound), Some(response)) = (local_outbound, response)
                        else {
                            return;
                        };
                        match local_protocol
                            .make_registered_devices_response(&device_key, &response)
                        {
                            Some(message) => local_outbound.enqueue(message),
                            None => error!(
                                "Failed to build the outgoing response for a local \
                                 'RegisteredDevicesRequest' message."
                            ),
                        }
                    },
                );
                self.send_out_registered_devices_request(parameters, Some(callback));
            }
            _ => {
                warn!("Received a local message of invalid type {message_type:?}.");
            }
        }
    }
}
