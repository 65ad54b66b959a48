//! The stateless relay between the local bus and the platform. Local
//! subdevice traffic gets wrapped into the gateway envelope and queued for
//! the platform; unwrapped platform traffic is forwarded onto the local bus
//! verbatim.

use std::sync::Arc;

use async_trait::async_trait;

use crate::connectivity::{GatewayMessageListener, MessageListener, OutboundPublisher};
use crate::model::{GatewaySubdeviceMessage, Message, MessageType};
use crate::protocol::GatewaySubdeviceProtocol;
use crate::service::relay;

pub struct InternalDataService {
    gateway_key: String,
    platform_outbound: Arc<OutboundPublisher>,
    local_outbound: Arc<OutboundPublisher>,
    protocol: Arc<dyn GatewaySubdeviceProtocol>,
    local_channels: Vec<String>,
}

impl InternalDataService {
    pub fn new(
        gateway_key: impl Into<String>,
        platform_outbound: Arc<OutboundPublisher>,
        local_outbound: Arc<OutboundPublisher>,
        protocol: Arc<dyn GatewaySubdeviceProtocol>,
        local_channels: Vec<String>,
    ) -> Self {
        InternalDataService {
            gateway_key: gateway_key.into(),
            platform_outbound,
            local_outbound,
            protocol,
            local_channels,
        }
    }
}

#[async_trait]
impl MessageListener for InternalDataService {
    fn subscription_channels(&self) -> Vec<String> {
        self.local_channels.clone()
    }

    async fn message_received(&self, message: Message) {
        relay::wrap_and_enqueue(
            &self.protocol,
            &self.gateway_key,
            message,
            &self.platform_outbound,
        );
    }
}

#[async_trait]
impl GatewayMessageListener for InternalDataService {
    fn message_types(&self) -> Vec<MessageType> {
        vec![
            MessageType::FeedValues,
            MessageType::ParameterSync,
            MessageType::TimeSync,
            MessageType::FileUploadInit,
            MessageType::FileUploadAbort,
            MessageType::FileBinaryResponse,
            MessageType::FileUrlDownloadInit,
            MessageType::FileUrlDownloadAbort,
            MessageType::FileListRequest,
            MessageType::FileDelete,
            MessageType::FilePurge,
            MessageType::FirmwareUpdateInstall,
            MessageType::FirmwareUpdateAbort,
        ]
    }

    async fn receive_messages(&self, messages: Vec<GatewaySubdeviceMessage>) {
        for message in messages {
            self.local_outbound.enqueue(message.into_message());
        }
    }
}
