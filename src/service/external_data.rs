//! The embedded-host relay. Instead of a local broker, host code implements
//! [`DataProvider`] and pushes readings and parameters through this service;
//! platform-originated feed and parameter traffic is delivered back through
//! the provider's callbacks on the service's own command queue.

use std::sync::Arc;

use async_trait::async_trait;
use log::{error, warn};

use crate::connectivity::{GatewayMessageListener, OutboundPublisher};
use crate::model::messages::{
    Attribute, AttributeRegistrationMessage, Feed, FeedRegistrationMessage, FeedRemovalMessage,
    FeedValuesMessage, Parameter, ParametersPullMessage, ParametersUpdateMessage,
    PullFeedValuesMessage, Reading,
};
use crate::model::{GatewaySubdeviceMessage, Message, MessageType};
use crate::protocol::{DataProtocol, GatewaySubdeviceProtocol};
use crate::service::relay;
use crate::util::CommandQueue;

/// The host side of the external relay. Callbacks run on the service's
/// command queue, one at a time, in arrival order.
#[async_trait]
pub trait DataProvider: Send + Sync {
    async fn on_reading_data(&self, device_key: String, readings: Vec<Reading>);

    async fn on_parameter_data(&self, device_key: String, parameters: Vec<Parameter>);
}

pub struct ExternalDataService {
    gateway_key: String,
    subdevice_protocol: Arc<dyn GatewaySubdeviceProtocol>,
    data_protocol: Arc<dyn DataProtocol>,
    platform_outbound: Arc<OutboundPublisher>,
    provider: Arc<dyn DataProvider>,
    queue: CommandQueue,
}

impl ExternalDataService {
    pub fn new(
        gateway_key: impl Into<String>,
        subdevice_protocol: Arc<dyn GatewaySubdeviceProtocol>,
        data_protocol: Arc<dyn DataProtocol>,
        platform_outbound: Arc<OutboundPublisher>,
        provider: Arc<dyn DataProvider>,
    ) -> Self {
        ExternalDataService {
            gateway_key: gateway_key.into(),
            subdevice_protocol,
            data_protocol,
            platform_outbound,
            provider,
            queue: CommandQueue::new("external-data-service"),
        }
    }

    pub fn add_reading(&self, device_key: &str, reading: Reading) {
        self.add_readings(device_key, vec![reading]);
    }

    pub fn add_readings(&self, device_key: &str, readings: Vec<Reading>) {
        let message = self
            .data_protocol
            .make_feed_values_message(device_key, &FeedValuesMessage { readings });
        self.pack_and_send(message, "FeedValues");
    }

    pub fn pull_feed_values(&self, device_key: &str) {
        let message = self
            .data_protocol
            .make_pull_feed_values_message(device_key, &PullFeedValuesMessage);
        self.pack_and_send(message, "PullFeedValues");
    }

    pub fn pull_parameters(&self, device_key: &str) {
        let message = self
            .data_protocol
            .make_parameters_pull_message(device_key, &ParametersPullMessage);
        self.pack_and_send(message, "ParametersPull");
    }

    pub fn register_feed(&self, device_key: &str, feed: Feed) {
        self.register_feeds(device_key, vec![feed]);
    }

    pub fn register_feeds(&self, device_key: &str, feeds: Vec<Feed>) {
        let message = self
            .data_protocol
            .make_feed_registration_message(device_key, &FeedRegistrationMessage { feeds });
        self.pack_and_send(message, "FeedRegistration");
    }

    pub fn remove_feed(&self, device_key: &str, reference: &str) {
        self.remove_feeds(device_key, vec![reference.to_owned()]);
    }

    pub fn remove_feeds(&self, device_key: &str, references: Vec<String>) {
        let message = self
            .data_protocol
            .make_feed_removal_message(device_key, &FeedRemovalMessage { references });
        self.pack_and_send(message, "FeedRemoval");
    }

    pub fn add_attribute(&self, device_key: &str, attribute: Attribute) {
        let message = self.data_protocol.make_attribute_registration_message(
            device_key,
            &AttributeRegistrationMessage {
                attributes: vec![attribute],
            },
        );
        self.pack_and_send(message, "AttributeRegistration");
    }

    pub fn update_parameter(&self, device_key: &str, parameter: Parameter) {
        let message = self.data_protocol.make_parameters_update_message(
            device_key,
            &ParametersUpdateMessage {
                parameters: vec![parameter],
            },
        );
        self.pack_and_send(message, "ParametersUpdate");
    }

    /// Wraps a built domain message with the gateway envelope and queues it
    /// for the platform. A `None` from either protocol step drops the
    /// operation.
    fn pack_and_send(&self, message: Option<Message>, description: &str) {
        let Some(message) = message else {
            error!("Failed to build an outgoing '{description}' message.");
            return;
        };
        relay::wrap_and_enqueue(
            &self.subdevice_protocol,
            &self.gateway_key,
            message,
            &self.platform_outbound,
        );
    }
}

#[async_trait]
impl GatewayMessageListener for ExternalDataService {
    fn message_types(&self) -> Vec<MessageType> {
        vec![MessageType::FeedValues, MessageType::ParameterSync]
    }

    async fn receive_messages(&self, messages: Vec<GatewaySubdeviceMessage>) {
        if messages.is_empty() {
            warn!("Received an empty batch of subdevice messages.");
            return;
        }

        for message in messages {
            let inner = message.message();
            let message_type = self.subdevice_protocol.message_type(inner);
            let device_key = self
                .subdevice_protocol
                .device_key(inner)
                .unwrap_or_default();

            match message_type {
                MessageType::FeedValues => {
                    let Some(feed_values) = self.data_protocol.parse_feed_values(inner) else {
                        error!("Received a 'FeedValues' message but failed to parse it.");
                        continue;
                    };
                    let provider = self.provider.clone();
                    self.queue.push(async move {
                        provider
                            .on_reading_data(device_key, feed_values.readings)
                            .await;
                    });
                }
                MessageType::ParameterSync => {
                    let Some(parameters) = self.data_protocol.parse_parameters(inner) else {
                        error!("Received a 'Parameters' message but failed to parse it.");
                        continue;
                    };
                    let provider = self.provider.clone();
                    self.queue.push(async move {
                        provider
                            .on_parameter_data(device_key, parameters.parameters)
                            .await;
                    });
                }
                other => {
                    warn!("Received a message of type {other:?} that the service cannot handle.");
                }
            }
        }
    }
}
