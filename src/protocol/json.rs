//! Default JSON wire protocol.
//!
//! Topic grammar is `<prefix>/<deviceKey>/<action>` with prefixes `d2p`
//! (device to platform), `p2d` (platform to device) and the envelope
//! prefixes `g2p` / `p2g` for subdevice traffic carried through the gateway.
//! Payload bodies are camelCase JSON. The envelope payload is an array of
//! `{"device": "<key>", "payload": <inner body>}` elements, one per
//! subdevice, so a single platform message can fan out to many children.

use log::{debug, error};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::messages::{
    AttributeRegistrationMessage, ChildrenSynchronizationRequestMessage,
    ChildrenSynchronizationResponseMessage, DeviceRegistrationMessage,
    DeviceRegistrationResponseMessage, DeviceRemovalMessage, FeedRegistrationMessage,
    FeedRemovalMessage, FeedValuesMessage, ParametersPullMessage, ParametersUpdateMessage,
    PullFeedValuesMessage, RegisteredDevicesRequestMessage, RegisteredDevicesResponseMessage,
};
use crate::model::{GatewaySubdeviceMessage, Message, MessageType};
use crate::protocol::{
    DataProtocol, GatewayRegistrationProtocol, GatewaySubdeviceProtocol, PlatformStatusProtocol,
    RegistrationProtocol,
};

const DEVICE_TO_PLATFORM: &str = "d2p";
const PLATFORM_TO_DEVICE: &str = "p2d";
const GATEWAY_TO_PLATFORM: &str = "g2p";
const PLATFORM_TO_GATEWAY: &str = "p2g";

/// The stateless default codec. One instance implements every protocol
/// trait, so a builder can share a single `Arc` across the services.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonProtocol;

#[derive(Debug, Serialize, Deserialize)]
struct EnvelopeElement {
    device: String,
    payload: Value,
}

fn action_for_type(message_type: MessageType) -> Option<&'static str> {
    let action = match message_type {
        MessageType::FeedValues => "feed_values",
        MessageType::ParameterSync => "parameters",
        MessageType::TimeSync => "time",
        MessageType::FileUploadInit => "file_upload_initiate",
        MessageType::FileUploadAbort => "file_upload_abort",
        MessageType::FileBinaryResponse => "file_binary_response",
        MessageType::FileUrlDownloadInit => "file_url_download_initiate",
        MessageType::FileUrlDownloadAbort => "file_url_download_abort",
        MessageType::FileListRequest => "file_list",
        MessageType::FileDelete => "file_delete",
        MessageType::FilePurge => "file_purge",
        MessageType::FirmwareUpdateInstall => "firmware_update_install",
        MessageType::FirmwareUpdateAbort => "firmware_update_abort",
        MessageType::DeviceRegistration => "device_registration",
        MessageType::DeviceRegistrationResponse => "device_registration_response",
        MessageType::DeviceRemoval => "device_removal",
        MessageType::RegisteredDevicesRequest => "registered_devices",
        MessageType::RegisteredDevicesResponse => "registered_devices_response",
        MessageType::ChildrenSynchronizationRequest => "children_synchronization",
        MessageType::ChildrenSynchronizationResponse => "children_synchronization_response",
        MessageType::PlatformStatus => "connection_status",
        MessageType::Unknown => return None,
    };
    Some(action)
}

fn type_for_action(action: &str) -> MessageType {
    match action {
        "feed_values" => MessageType::FeedValues,
        "pull_feed_values" => MessageType::FeedValues,
        "parameters" => MessageType::ParameterSync,
        "pull_parameters" => MessageType::ParameterSync,
        "time" => MessageType::TimeSync,
        "file_upload_initiate" => MessageType::FileUploadInit,
        "file_upload_abort" => MessageType::FileUploadAbort,
        "file_binary_response" => MessageType::FileBinaryResponse,
        "file_url_download_initiate" => MessageType::FileUrlDownloadInit,
        "file_url_download_abort" => MessageType::FileUrlDownloadAbort,
        "file_list" => MessageType::FileListRequest,
        "file_delete" => MessageType::FileDelete,
        "file_purge" => MessageType::FilePurge,
        "firmware_update_install" => MessageType::FirmwareUpdateInstall,
        "firmware_update_abort" => MessageType::FirmwareUpdateAbort,
        "device_registration" => MessageType::DeviceRegistration,
        "device_registration_response" => MessageType::DeviceRegistrationResponse,
        "device_removal" => MessageType::DeviceRemoval,
        "registered_devices" => MessageType::RegisteredDevicesRequest,
        "registered_devices_response" => MessageType::RegisteredDevicesResponse,
        "children_synchronization" => MessageType::ChildrenSynchronizationRequest,
        "children_synchronization_response" => MessageType::ChildrenSynchronizationResponse,
        "connection_status" => MessageType::PlatformStatus,
        _ => MessageType::Unknown,
    }
}

/// Splits `<prefix>/<deviceKey>/<action>`; the action must be a single
/// segment.
fn split_channel(channel: &str) -> Option<(&str, &str, &str)> {
    let mut parts = channel.splitn(3, '/');
    let prefix = parts.next()?;
    let device_key = parts.next()?;
    let action = parts.next()?;
    if device_key.is_empty() || action.is_empty() || action.contains('/') {
        return None;
    }
    Some((prefix, device_key, action))
}

fn classify(message: &Message) -> MessageType {
    match split_channel(message.channel()) {
        Some((
            DEVICE_TO_PLATFORM | PLATFORM_TO_DEVICE | GATEWAY_TO_PLATFORM | PLATFORM_TO_GATEWAY,
            _,
            action,
        )) => type_for_action(action),
        _ => MessageType::Unknown,
    }
}

fn key_of(message: &Message) -> Option<String> {
    split_channel(message.channel()).map(|(_, key, _)| key.to_owned())
}

fn make<T: Serialize>(channel: String, body: &T) -> Option<Message> {
    match serde_json::to_vec(body) {
        Ok(payload) => Some(Message::new(channel, payload)),
        Err(e) => {
            error!("Failed to serialize outbound message body: {e}");
            None
        }
    }
}

fn parse<T: for<'de> Deserialize<'de>>(message: &Message) -> Option<T> {
    match serde_json::from_slice(message.payload()) {
        Ok(value) => Some(value),
        Err(e) => {
            error!(
                "Failed to parse message on channel '{}': {e}",
                message.channel()
            );
            None
        }
    }
}

impl GatewaySubdeviceProtocol for JsonProtocol {
    fn message_type(&self, message: &Message) -> MessageType {
        classify(message)
    }

    fn device_key(&self, message: &Message) -> Option<String> {
        key_of(message)
    }

    fn parse_incoming_subdevice_message(&self, message: &Message) -> Vec<GatewaySubdeviceMessage> {
        let Some((prefix, _, action)) = split_channel(message.channel()) else {
            return Vec::new();
        };
        // Inner direction mirrors the envelope direction.
        let inner_prefix = match prefix {
            PLATFORM_TO_GATEWAY => PLATFORM_TO_DEVICE,
            GATEWAY_TO_PLATFORM => DEVICE_TO_PLATFORM,
            _ => return Vec::new(),
        };

        let elements: Vec<EnvelopeElement> = match serde_json::from_slice(message.payload()) {
            Ok(elements) => elements,
            Err(e) => {
                error!(
                    "Failed to parse gateway envelope on channel '{}': {e}",
                    message.channel()
                );
                return Vec::new();
            }
        };

        elements
            .into_iter()
            .filter_map(|element| {
                if element.device.is_empty() {
                    debug!("Dropping envelope element with an empty device key.");
                    return None;
                }
                let payload = serde_json::to_vec(&element.payload).ok()?;
                let channel = format!("{inner_prefix}/{}/{action}", element.device);
                Some(GatewaySubdeviceMessage::new(Message::new(channel, payload)))
            })
            .collect()
    }

    fn make_outbound_message(
        &self,
        gateway_key: &str,
        message: GatewaySubdeviceMessage,
    ) -> Option<Message> {
        let inner = message.into_message();
        let Some((_, device_key, action)) = split_channel(inner.channel()) else {
            error!(
                "Cannot wrap message with unrecognized channel '{}'.",
                inner.channel()
            );
            return None;
        };
        if type_for_action(action) == MessageType::Unknown {
            error!("Cannot wrap message with unrecognized action '{action}'.");
            return None;
        }

        let payload: Value = match serde_json::from_slice(inner.payload()) {
            Ok(payload) => payload,
            Err(e) => {
                error!(
                    "Cannot wrap message on channel '{}': payload is not JSON: {e}",
                    inner.channel()
                );
                return None;
            }
        };

        let elements = vec![EnvelopeElement {
            device: device_key.to_owned(),
            payload,
        }];
        make(
            format!("{GATEWAY_TO_PLATFORM}/{gateway_key}/{action}"),
            &elements,
        )
    }

    fn inbound_channels(&self, gateway_key: &str) -> Vec<String> {
        vec![format!("{PLATFORM_TO_GATEWAY}/{gateway_key}/#")]
    }
}

impl RegistrationProtocol for JsonProtocol {
    fn message_type(&self, message: &Message) -> MessageType {
        classify(message)
    }

    fn make_registration_message(
        &self,
        device_key: &str,
        message: &DeviceRegistrationMessage,
    ) -> Option<Message> {
        make(
            format!("{DEVICE_TO_PLATFORM}/{device_key}/device_registration"),
            &message.devices,
        )
    }

    fn make_removal_message(
        &self,
        device_key: &str,
        message: &DeviceRemovalMessage,
    ) -> Option<Message> {
        make(
            format!("{DEVICE_TO_PLATFORM}/{device_key}/device_removal"),
            &message.keys,
        )
    }

    fn make_children_synchronization_request(
        &self,
        device_key: &str,
        _message: &ChildrenSynchronizationRequestMessage,
    ) -> Option<Message> {
        Some(Message::new(
            format!("{DEVICE_TO_PLATFORM}/{device_key}/children_synchronization"),
            b"{}".to_vec(),
        ))
    }

    fn make_registered_devices_request(
        &self,
        device_key: &str,
        message: &RegisteredDevicesRequestMessage,
    ) -> Option<Message> {
        make(
            format!("{DEVICE_TO_PLATFORM}/{device_key}/registered_devices"),
            message,
        )
    }

    fn parse_children_synchronization_response(
        &self,
        message: &Message,
    ) -> Option<ChildrenSynchronizationResponseMessage> {
        parse::<Vec<String>>(message).map(|children| ChildrenSynchronizationResponseMessage {
            children,
        })
    }

    fn parse_registered_devices_response(
        &self,
        message: &Message,
    ) -> Option<RegisteredDevicesResponseMessage> {
        parse(message)
    }

    fn response_channel(&self, message_type: MessageType, device_key: &str) -> String {
        match message_type {
            MessageType::ChildrenSynchronizationRequest => {
                format!("{PLATFORM_TO_DEVICE}/{device_key}/children_synchronization_response")
            }
            MessageType::RegisteredDevicesRequest => {
                format!("{PLATFORM_TO_DEVICE}/{device_key}/registered_devices_response")
            }
            other => {
                let action = action_for_type(other).unwrap_or("unknown");
                format!("{PLATFORM_TO_DEVICE}/{device_key}/{action}")
            }
        }
    }
}

impl GatewayRegistrationProtocol for JsonProtocol {
    fn message_type(&self, message: &Message) -> MessageType {
        classify(message)
    }

    fn device_key(&self, message: &Message) -> Option<String> {
        key_of(message)
    }

    fn parse_registration_message(&self, message: &Message) -> Option<DeviceRegistrationMessage> {
        parse::<Vec<crate::model::messages::DeviceRegistrationData>>(message)
            .map(|devices| DeviceRegistrationMessage { devices })
    }

    fn parse_removal_message(&self, message: &Message) -> Option<DeviceRemovalMessage> {
        parse::<Vec<String>>(message).map(|keys| DeviceRemovalMessage { keys })
    }

    fn parse_registered_devices_request(
        &self,
        message: &Message,
    ) -> Option<RegisteredDevicesRequestMessage> {
        parse(message)
    }

    fn make_registration_response(
        &self,
        device_key: &str,
        message: &DeviceRegistrationResponseMessage,
    ) -> Option<Message> {
        make(
            format!("{PLATFORM_TO_DEVICE}/{device_key}/device_registration_response"),
            message,
        )
    }

    fn make_registered_devices_response(
        &self,
        device_key: &str,
        message: &RegisteredDevicesResponseMessage,
    ) -> Option<Message> {
        make(
            format!("{PLATFORM_TO_DEVICE}/{device_key}/registered_devices_response"),
            message,
        )
    }

    fn inbound_channels(&self) -> Vec<String> {
        vec![
            format!("{DEVICE_TO_PLATFORM}/+/device_registration"),
            format!("{DEVICE_TO_PLATFORM}/+/device_removal"),
            format!("{DEVICE_TO_PLATFORM}/+/registered_devices"),
        ]
    }
}

impl DataProtocol for JsonProtocol {
    fn message_type(&self, message: &Message) -> MessageType {
        classify(message)
    }

    fn device_key(&self, message: &Message) -> Option<String> {
        key_of(message)
    }

    fn make_feed_values_message(
        &self,
        device_key: &str,
        message: &FeedValuesMessage,
    ) -> Option<Message> {
        make(
            format!("{DEVICE_TO_PLATFORM}/{device_key}/feed_values"),
            &message.readings,
        )
    }

    fn make_pull_feed_values_message(
        &self,
        device_key: &str,
        _message: &PullFeedValuesMessage,
    ) -> Option<Message> {
        Some(Message::new(
            format!("{DEVICE_TO_PLATFORM}/{device_key}/pull_feed_values"),
            b"{}".to_vec(),
        ))
    }

    fn make_parameters_pull_message(
        &self,
        device_key: &str,
        _message: &ParametersPullMessage,
    ) -> Option<Message> {
        Some(Message::new(
            format!("{DEVICE_TO_PLATFORM}/{device_key}/pull_parameters"),
            b"{}".to_vec(),
        ))
    }

    fn make_feed_registration_message(
        &self,
        device_key: &str,
        message: &FeedRegistrationMessage,
    ) -> Option<Message> {
        make(
            format!("{DEVICE_TO_PLATFORM}/{device_key}/feed_registration"),
            &message.feeds,
        )
    }

    fn make_feed_removal_message(
        &self,
        device_key: &str,
        message: &FeedRemovalMessage,
    ) -> Option<Message> {
        make(
            format!("{DEVICE_TO_PLATFORM}/{device_key}/feed_removal"),
            &message.references,
        )
    }

    fn make_attribute_registration_message(
        &self,
        device_key: &str,
        message: &AttributeRegistrationMessage,
    ) -> Option<Message> {
        make(
            format!("{DEVICE_TO_PLATFORM}/{device_key}/attribute_registration"),
            &message.attributes,
        )
    }

    fn make_parameters_update_message(
        &self,
        device_key: &str,
        message: &ParametersUpdateMessage,
    ) -> Option<Message> {
        make(
            format!("{DEVICE_TO_PLATFORM}/{device_key}/parameters"),
            &message.parameters,
        )
    }

    fn make_time_request(&self, device_key: &str) -> Option<Message> {
        Some(Message::new(
            format!("{DEVICE_TO_PLATFORM}/{device_key}/time"),
            b"{}".to_vec(),
        ))
    }

    fn parse_feed_values(&self, message: &Message) -> Option<FeedValuesMessage> {
        parse::<Vec<crate::model::messages::Reading>>(message)
            .map(|readings| FeedValuesMessage { readings })
    }

    fn parse_parameters(&self, message: &Message) -> Option<ParametersUpdateMessage> {
        parse::<Vec<crate::model::messages::Parameter>>(message)
            .map(|parameters| ParametersUpdateMessage { parameters })
    }
}

impl PlatformStatusProtocol for JsonProtocol {
    fn make_status_message(&self, device_key: &str, connected: bool) -> Option<Message> {
        make(
            format!("{PLATFORM_TO_DEVICE}/{device_key}/connection_status"),
            &crate::model::messages::PlatformStatusMessage { connected },
        )
    }
}

/// Channel filters for subdevice-originated traffic on the local bus that a
/// gateway forwards to the platform verbatim.
pub fn local_data_channels() -> Vec<String> {
    [
        "feed_values",
        "parameters",
        "time",
        "file_upload_initiate",
        "file_upload_abort",
        "file_binary_response",
        "file_url_download_initiate",
        "file_url_download_abort",
        "file_list",
        "file_delete",
        "file_purge",
        "firmware_update_install",
        "firmware_update_abort",
    ]
    .iter()
    .map(|action| format!("{DEVICE_TO_PLATFORM}/+/{action}"))
    .collect()
}
