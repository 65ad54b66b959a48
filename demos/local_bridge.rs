//! Runs a gateway that bridges a local Mosquitto-style broker to the
//! platform. Broker addresses and credentials come from the environment:
//!
//! ```sh
//! GATELINK_GATEWAY_KEY=my-gateway \
//! GATELINK_GATEWAY_PASSWORD=secret \
//! GATELINK_PLATFORM_URI=ssl://platform.example.com:8883 \
//! cargo run --example local_bridge
//! ```

use std::time::Duration;

use gatelink::{Gateway, GatewayConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let gateway_key =
        std::env::var("GATELINK_GATEWAY_KEY").unwrap_or_else(|_| "demo-gateway".to_owned());
    let gateway_password = std::env::var("GATELINK_GATEWAY_PASSWORD").unwrap_or_default();
    let platform_uri = std::env::var("GATELINK_PLATFORM_URI")
        .unwrap_or_else(|_| "ssl://platform.example.com:8883".to_owned());

    let mut config = GatewayConfig::new(gateway_key, gateway_password, platform_uri);
    config.local_bus_uri = Some(
        std::env::var("GATELINK_LOCAL_BUS_URI")
            .unwrap_or_else(|_| "tcp://localhost:1883".to_owned()),
    );

    let gateway = Gateway::builder(config).build().await?;
    gateway.add_connection_listener(|connected| {
        log::info!("platform connectivity changed: {connected}");
    });
    gateway.connect();

    loop {
        tokio::time::sleep(Duration::from_secs(10)).await;
        log::info!(
            "platform connected: {}, local connected: {}",
            gateway.is_platform_connected(),
            gateway.is_local_connected()
        );
    }
}
