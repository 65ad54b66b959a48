//! The pluggable codec seam. Implementations turn domain messages into
//! topic+payload pairs and back; the rest of the crate depends only on these
//! traits. A builder that cannot express a message returns `None` and the
//! caller drops the operation with a log line.

use crate::model::messages::{
    AttributeRegistrationMessage, ChildrenSynchronizationRequestMessage,
    ChildrenSynchronizationResponseMessage, DeviceRegistrationMessage,
    DeviceRegistrationResponseMessage, DeviceRemovalMessage, FeedRegistrationMessage,
    FeedRemovalMessage, FeedValuesMessage, ParametersPullMessage, ParametersUpdateMessage,
    PullFeedValuesMessage, RegisteredDevicesRequestMessage, RegisteredDevicesResponseMessage,
};
use crate::model::{GatewaySubdeviceMessage, Message, MessageType};

pub mod json;

/// Envelope codec plus message classification for the platform link.
pub trait GatewaySubdeviceProtocol: Send + Sync {
    /// Classify a message by its channel (and payload where the channel is
    /// not enough). Returns [`MessageType::Unknown`] for foreign traffic.
    fn message_type(&self, message: &Message) -> MessageType;

    /// Extract the subdevice key a message concerns, if any.
    fn device_key(&self, message: &Message) -> Option<String>;

    /// Unwrap a platform envelope into its per-subdevice inner messages.
    /// An unrecognized or empty envelope yields an empty list.
    fn parse_incoming_subdevice_message(&self, message: &Message) -> Vec<GatewaySubdeviceMessage>;

    /// Wrap a subdevice-originated message into the gateway envelope bound
    /// for the platform.
    fn make_outbound_message(
        &self,
        gateway_key: &str,
        message: GatewaySubdeviceMessage,
    ) -> Option<Message>;

    /// Channel filters the platform connection must subscribe to on behalf
    /// of this gateway.
    fn inbound_channels(&self, gateway_key: &str) -> Vec<String>;
}

/// Device-lifecycle codec for the platform-facing side.
pub trait RegistrationProtocol: Send + Sync {
    fn message_type(&self, message: &Message) -> MessageType;

    fn make_registration_message(
        &self,
        device_key: &str,
        message: &DeviceRegistrationMessage,
    ) -> Option<Message>;

    fn make_removal_message(
        &self,
        device_key: &str,
        message: &DeviceRemovalMessage,
    ) -> Option<Message>;

    fn make_children_synchronization_request(
        &self,
        device_key: &str,
        message: &ChildrenSynchronizationRequestMessage,
    ) -> Option<Message>;

    fn make_registered_devices_request(
        &self,
        device_key: &str,
        message: &RegisteredDevicesRequestMessage,
    ) -> Option<Message>;

    fn parse_children_synchronization_response(
        &self,
        message: &Message,
    ) -> Option<ChildrenSynchronizationResponseMessage>;

    fn parse_registered_devices_response(
        &self,
        message: &Message,
    ) -> Option<RegisteredDevicesResponseMessage>;

    /// The channel pattern a response to `message_type` sent on behalf of
    /// `device_key` will arrive on. Used by the retry layer; MQTT filter
    /// wildcards are honored.
    fn response_channel(&self, message_type: MessageType, device_key: &str) -> String;
}

/// Device-lifecycle codec for the local-bus side.
pub trait GatewayRegistrationProtocol: Send + Sync {
    fn message_type(&self, message: &Message) -> MessageType;

    fn device_key(&self, message: &Message) -> Option<String>;

    fn parse_registration_message(&self, message: &Message) -> Option<DeviceRegistrationMessage>;

    fn parse_removal_message(&self, message: &Message) -> Option<DeviceRemovalMessage>;

    fn parse_registered_devices_request(
        &self,
        message: &Message,
    ) -> Option<RegisteredDevicesRequestMessage>;

    fn make_registration_response(
        &self,
        device_key: &str,
        message: &DeviceRegistrationResponseMessage,
    ) -> Option<Message>;

    fn make_registered_devices_response(
        &self,
        device_key: &str,
        message: &RegisteredDevicesResponseMessage,
    ) -> Option<Message>;

    /// Channel filters the local connection must subscribe to for lifecycle
    /// traffic.
    fn inbound_channels(&self) -> Vec<String>;
}

/// Telemetry and parameter codec.
pub trait DataProtocol: Send + Sync {
    fn message_type(&self, message: &Message) -> MessageType;

    fn device_key(&self, message: &Message) -> Option<String>;

    fn make_feed_values_message(
        &self,
        device_key: &str,
        message: &FeedValuesMessage,
    ) -> Option<Message>;

    fn make_pull_feed_values_message(
        &self,
        device_key: &str,
        message: &PullFeedValuesMessage,
    ) -> Option<Message>;

    fn make_parameters_pull_message(
        &self,
        device_key: &str,
        message: &ParametersPullMessage,
    ) -> Option<Message>;

    fn make_feed_registration_message(
        &self,
        device_key: &str,
        message: &FeedRegistrationMessage,
    ) -> Option<Message>;

    fn make_feed_removal_message(
        &self,
        device_key: &str,
        message: &FeedRemovalMessage,
    ) -> Option<Message>;

    fn make_attribute_registration_message(
        &self,
        device_key: &str,
        message: &AttributeRegistrationMessage,
    ) -> Option<Message>;

    fn make_parameters_update_message(
        &self,
        device_key: &str,
        message: &ParametersUpdateMessage,
    ) -> Option<Message>;

    /// An empty time-sync request. Doubles as the keep-alive ping.
    fn make_time_request(&self, device_key: &str) -> Option<Message>;

    fn parse_feed_values(&self, message: &Message) -> Option<FeedValuesMessage>;

    fn parse_parameters(&self, message: &Message) -> Option<ParametersUpdateMessage>;
}

/// Builder for the platform-connectivity broadcast on the local bus.
pub trait PlatformStatusProtocol: Send + Sync {
    fn make_status_message(&self, device_key: &str, connected: bool) -> Option<Message>;
}
