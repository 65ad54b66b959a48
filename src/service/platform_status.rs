//! Broadcasts the platform connectivity state onto the local bus so
//! subdevices know whether their traffic is currently reaching the platform.

use std::sync::Arc;

use log::error;

use crate::connectivity::Connection;
use crate::protocol::PlatformStatusProtocol;

pub struct PlatformStatusService {
    connection: Arc<dyn Connection>,
    protocol: Arc<dyn PlatformStatusProtocol>,
    device_key: String,
}

impl PlatformStatusService {
    pub fn new(
        connection: Arc<dyn Connection>,
        protocol: Arc<dyn PlatformStatusProtocol>,
        device_key: impl Into<String>,
    ) -> Self {
        PlatformStatusService {
            connection,
            protocol,
            device_key: device_key.into(),
        }
    }

    /// Publishes the status directly on the local connection. Called once on
    /// every platform connect and once on every disconnect.
    pub async fn send_platform_connection_status_message(&self, connected: bool) {
        let error_prefix = "Failed to send 'PlatformStatusMessage'";
        let Some(message) = self
            .protocol
            .make_status_message(&self.device_key, connected)
        else {
            error!("{error_prefix} -> Failed to build the outbound message.");
            return;
        };
        if !self.connection.publish(&message).await {
            error!("{error_prefix} -> Failed to send the message.");
        }
    }
}
