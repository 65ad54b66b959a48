//! Supervisor behavior: the connected sequence, the status broadcast on the
//! local bus, reconnect after a lost connection, and listener fan-out.

use std::sync::{Arc, Mutex};

use gatelink::repository::DeviceStoragePolicy;
use gatelink::{Gateway, GatewayConfig};

mod common;

const GATEWAY_KEY: &str = "TEST_GATEWAY";

fn test_config() -> GatewayConfig {
    let mut config = GatewayConfig::new(GATEWAY_KEY, "secret", "tcp://localhost:1883");
    config.reconnect_delay_ms = 50;
    config.retry_interval_ms = 200;
    config.device_storage_policy = DeviceStoragePolicy::Cached;
    config
}

struct Fixture {
    platform: Arc<common::ScriptedConnection>,
    local: Arc<common::ScriptedConnection>,
    gateway: Gateway,
    transitions: Arc<Mutex<Vec<bool>>>,
}

async fn fixture() -> Fixture {
    let platform = common::ScriptedConnection::new();
    let local = common::ScriptedConnection::new();
    let gateway = Gateway::builder(test_config())
        .with_platform_connection(platform.clone())
        .with_local_connection(local.clone())
        .with_existing_devices_repository(common::MemoryExistingDevices::new())
        .build()
        .await
        .expect("the gateway must build");

    let transitions = Arc::new(Mutex::new(Vec::new()));
    let listener_transitions = transitions.clone();
    gateway.add_connection_listener(move |connected| {
        listener_transitions.lock().unwrap().push(connected);
    });

    Fixture {
        platform,
        local,
        gateway,
        transitions,
    }
}

fn status_payloads(connection: &common::ScriptedConnection) -> Vec<bool> {
    connection
        .published()
        .iter()
        .filter(|m| m.channel() == format!("p2d/{GATEWAY_KEY}/connection_status"))
        .map(|m| {
            let body: serde_json::Value = serde_json::from_slice(m.payload()).unwrap();
            body["connected"].as_bool().unwrap()
        })
        .collect()
}

#[tokio::test]
async fn connected_sequence_updates_cache_and_broadcasts_status() {
    common::init_logging();
    let fixture = fixture().await;

    fixture.gateway.connect();

    common::assert_eventually(
        {
            let gateway = fixture.gateway.clone();
            move || gateway.is_platform_connected() && gateway.is_local_connected()
        },
        "both connections up",
    )
    .await;

    // The cache update asks for the catalog and the children list.
    common::assert_eventually(
        {
            let platform = fixture.platform.clone();
            move || {
                let channels = platform.published_channels();
                channels.contains(&format!("d2p/{GATEWAY_KEY}/registered_devices"))
                    && channels.contains(&format!("d2p/{GATEWAY_KEY}/children_synchronization"))
                    && channels.contains(&format!("d2p/{GATEWAY_KEY}/time"))
            }
        },
        "device cache update requests and the keep-alive ping",
    )
    .await;

    // The local bus learns the platform is reachable.
    common::assert_eventually(
        {
            let local = fixture.local.clone();
            move || status_payloads(&local) == vec![true]
        },
        "platform-connected status on the local bus",
    )
    .await;

    assert_eq!(*fixture.transitions.lock().unwrap(), vec![true]);
    fixture.gateway.stop().await;
}

#[tokio::test]
async fn lost_platform_connection_reconnects_and_broadcasts_both_transitions() {
    common::init_logging();
    let fixture = fixture().await;

    fixture.gateway.connect();
    common::assert_eventually(
        {
            let gateway = fixture.gateway.clone();
            move || gateway.is_platform_connected()
        },
        "initial connect",
    )
    .await;

    fixture.platform.fire_connection_lost();

    // Offline broadcast, then a successful reconnect broadcasts online again.
    common::assert_eventually(
        {
            let local = fixture.local.clone();
            move || status_payloads(&local) == vec![true, false, true]
        },
        "offline and online status broadcasts",
    )
    .await;
    common::assert_eventually(
        {
            let gateway = fixture.gateway.clone();
            move || gateway.is_platform_connected()
        },
        "reconnected",
    )
    .await;
    assert_eq!(*fixture.transitions.lock().unwrap(), vec![true, false, true]);
    fixture.gateway.stop().await;
}

#[tokio::test]
async fn failed_connects_keep_retrying_until_one_succeeds() {
    common::init_logging();
    let fixture = fixture().await;
    fixture.platform.script_connect_results([false, false, true]);

    fixture.gateway.connect();

    common::assert_eventually(
        {
            let gateway = fixture.gateway.clone();
            move || gateway.is_platform_connected()
        },
        "connected after two failed attempts",
    )
    .await;
    fixture.gateway.stop().await;
}

#[tokio::test]
async fn building_with_an_empty_gateway_key_fails() {
    common::init_logging();
    let config = GatewayConfig::new("", "secret", "tcp://localhost:1883");
    assert!(Gateway::builder(config).build().await.is_err());
}
