//! The step both data relays share: pack a subdevice-originated message into
//! the gateway envelope and queue it for the platform. The two services
//! differ only in where outbound payloads come from and how inbound traffic
//! is delivered.

use std::sync::Arc;

use log::error;

use crate::connectivity::OutboundPublisher;
use crate::model::{GatewaySubdeviceMessage, Message};
use crate::protocol::GatewaySubdeviceProtocol;

/// Wraps `message` under `gateway_key` and queues it. Returns `false` (after
/// an error log) when the codec refuses the message; nothing is published
/// then.
pub(crate) fn wrap_and_enqueue(
    protocol: &Arc<dyn GatewaySubdeviceProtocol>,
    gateway_key: &str,
    message: Message,
    publisher: &OutboundPublisher,
) -> bool {
    match protocol.make_outbound_message(gateway_key, GatewaySubdeviceMessage::new(message)) {
        Some(wrapped) => {
            publisher.enqueue(wrapped);
            true
        }
        None => {
            error!("Failed to pack a message in a gateway envelope.");
            false
        }
    }
}
