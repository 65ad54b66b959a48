//! Periodic liveness pings. While the platform link is up the gateway sends
//! a time-sync request on a fixed interval; the platform treats it as a
//! last-seen heartbeat and answers with its clock, which the router forwards
//! like any other time-sync traffic.

use std::sync::Arc;
use std::time::Duration;

use log::error;

use crate::connectivity::OutboundPublisher;
use crate::protocol::DataProtocol;
use crate::util::Timer;

pub struct KeepAliveService {
    gateway_key: String,
    protocol: Arc<dyn DataProtocol>,
    platform_outbound: Arc<OutboundPublisher>,
    interval: Duration,
    timer: Timer,
}

impl KeepAliveService {
    pub fn new(
        gateway_key: impl Into<String>,
        protocol: Arc<dyn DataProtocol>,
        platform_outbound: Arc<OutboundPublisher>,
        interval: Duration,
    ) -> Self {
        KeepAliveService {
            gateway_key: gateway_key.into(),
            protocol,
            platform_outbound,
            interval,
            timer: Timer::new(),
        }
    }

    /// Sends a ping right away and keeps pinging every interval until
    /// [`KeepAliveService::disconnected`].
    pub fn connected(&self) {
        self.send_ping();

        let gateway_key = self.gateway_key.clone();
        let protocol = self.protocol.clone();
        let platform_outbound = self.platform_outbound.clone();
        self.timer.start_periodic(self.interval, move || {
            send_ping_message(&gateway_key, &protocol, &platform_outbound);
        });
    }

    pub fn disconnected(&self) {
        self.timer.cancel();
    }

    pub fn send_ping(&self) {
        send_ping_message(&self.gateway_key, &self.protocol, &self.platform_outbound);
    }
}

fn send_ping_message(
    gateway_key: &str,
    protocol: &Arc<dyn DataProtocol>,
    platform_outbound: &OutboundPublisher,
) {
    match protocol.make_time_request(gateway_key) {
        Some(message) => platform_outbound.enqueue(message),
        None => error!("Failed to build the keep-alive time request."),
    }
}
