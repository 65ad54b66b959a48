//! The two relays: the internal service forwarding between the brokers, and
//! the external service backed by an embedded data provider.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use gatelink::connectivity::{GatewayMessageListener, MessageListener, OutboundPublisher};
use gatelink::model::messages::{Parameter, Reading};
use gatelink::model::{GatewaySubdeviceMessage, Message};
use gatelink::persistence::InMemoryMessagePersistence;
use gatelink::protocol::json::{self, JsonProtocol};
use gatelink::protocol::GatewaySubdeviceProtocol;
use gatelink::service::{DataProvider, ExternalDataService, InternalDataService};

mod common;

const GATEWAY_KEY: &str = "TEST_GATEWAY";

fn publisher_on(
    connection: &Arc<common::ScriptedConnection>,
    name: &str,
) -> Arc<OutboundPublisher> {
    let publisher = OutboundPublisher::new(
        name,
        connection.clone(),
        Arc::new(InMemoryMessagePersistence::new()),
    );
    publisher.connected();
    publisher
}

#[tokio::test]
async fn internal_relay_wraps_local_traffic_for_the_platform() {
    common::init_logging();
    let platform = common::ScriptedConnection::new();
    let local = common::ScriptedConnection::new();
    let service = InternalDataService::new(
        GATEWAY_KEY,
        publisher_on(&platform, "platform"),
        publisher_on(&local, "local"),
        Arc::new(JsonProtocol),
        json::local_data_channels(),
    );

    let reading = Message::new(
        "d2p/D1/feed_values",
        serde_json::to_vec(&serde_json::json!([{"reference": "T", "value": 25}])).unwrap(),
    );
    service.message_received(reading.clone()).await;

    common::assert_eventually(
        {
            let platform = platform.clone();
            move || platform.published().len() == 1
        },
        "wrapped message on the platform link",
    )
    .await;

    // Exactly one message, and unwrapping it restores the original.
    let wrapped = platform.published().remove(0);
    assert_eq!(wrapped.channel(), format!("g2p/{GATEWAY_KEY}/feed_values"));
    let unwrapped = JsonProtocol.parse_incoming_subdevice_message(&wrapped);
    assert_eq!(unwrapped.len(), 1);
    assert_eq!(unwrapped[0].message().channel(), reading.channel());
}

#[tokio::test]
async fn internal_relay_fans_platform_traffic_onto_the_local_bus() {
    common::init_logging();
    let platform = common::ScriptedConnection::new();
    let local = common::ScriptedConnection::new();
    let service = InternalDataService::new(
        GATEWAY_KEY,
        publisher_on(&platform, "platform"),
        publisher_on(&local, "local"),
        Arc::new(JsonProtocol),
        json::local_data_channels(),
    );

    let inner_one = Message::new("p2d/D1/parameters", b"[]".to_vec());
    let inner_two = Message::new("p2d/D2/parameters", b"[]".to_vec());
    service
        .receive_messages(vec![
            GatewaySubdeviceMessage::new(inner_one.clone()),
            GatewaySubdeviceMessage::new(inner_two.clone()),
        ])
        .await;

    common::assert_eventually(
        {
            let local = local.clone();
            move || local.published().len() == 2
        },
        "both inner messages on the local bus",
    )
    .await;
    let published = local.published();
    assert_eq!(published[0], inner_one);
    assert_eq!(published[1], inner_two);
}

#[derive(Default)]
struct RecordingProvider {
    readings: Mutex<Vec<(String, Vec<Reading>)>>,
    parameters: Mutex<Vec<(String, Vec<Parameter>)>>,
}

#[async_trait::async_trait]
impl DataProvider for RecordingProvider {
    async fn on_reading_data(&self, device_key: String, readings: Vec<Reading>) {
        self.readings.lock().unwrap().push((device_key, readings));
    }

    async fn on_parameter_data(&self, device_key: String, parameters: Vec<Parameter>) {
        self.parameters
            .lock()
            .unwrap()
            .push((device_key, parameters));
    }
}

fn external_fixture() -> (
    Arc<common::ScriptedConnection>,
    Arc<RecordingProvider>,
    ExternalDataService,
) {
    let platform = common::ScriptedConnection::new();
    let provider = Arc::new(RecordingProvider::default());
    let protocol = Arc::new(JsonProtocol);
    let service = ExternalDataService::new(
        GATEWAY_KEY,
        protocol.clone(),
        protocol,
        publisher_on(&platform, "platform"),
        provider.clone(),
    );
    (platform, provider, service)
}

/// S6: one host reading becomes exactly one platform message whose envelope
/// decodes back to the reading under the right device key.
#[tokio::test]
async fn host_reading_reaches_the_platform_wrapped() {
    common::init_logging();
    let (platform, _provider, service) = external_fixture();

    service.add_reading("D1", Reading::new("T", 25));

    common::assert_eventually(
        {
            let platform = platform.clone();
            move || platform.published().len() == 1
        },
        "exactly one platform message",
    )
    .await;

    let wrapped = platform.published().remove(0);
    assert_eq!(wrapped.channel(), format!("g2p/{GATEWAY_KEY}/feed_values"));
    let unwrapped = JsonProtocol.parse_incoming_subdevice_message(&wrapped);
    assert_eq!(unwrapped.len(), 1);
    let inner = unwrapped[0].message();
    assert_eq!(inner.channel(), "d2p/D1/feed_values");
    let readings: Vec<Reading> = serde_json::from_slice(inner.payload()).unwrap();
    assert_eq!(readings.len(), 1);
    assert_eq!(readings[0].reference, "T");
    assert_eq!(readings[0].value, serde_json::json!(25));
}

#[tokio::test]
async fn platform_feed_values_reach_the_provider() {
    common::init_logging();
    let (_platform, provider, service) = external_fixture();

    let inner = Message::new(
        "p2d/D1/feed_values",
        serde_json::to_vec(&serde_json::json!([{"reference": "T", "value": 7}])).unwrap(),
    );
    service
        .receive_messages(vec![GatewaySubdeviceMessage::new(inner)])
        .await;

    common::assert_eventually(
        {
            let provider = provider.clone();
            move || provider.readings.lock().unwrap().len() == 1
        },
        "provider reading callback",
    )
    .await;
    let (device_key, readings) = provider.readings.lock().unwrap().remove(0);
    assert_eq!(device_key, "D1");
    assert_eq!(readings[0].reference, "T");
}

#[tokio::test]
async fn platform_parameters_reach_the_provider() {
    common::init_logging();
    let (_platform, provider, service) = external_fixture();

    let inner = Message::new(
        "p2d/D2/parameters",
        serde_json::to_vec(&serde_json::json!([{"name": "interval", "value": 30}])).unwrap(),
    );
    service
        .receive_messages(vec![GatewaySubdeviceMessage::new(inner)])
        .await;

    common::assert_eventually(
        {
            let provider = provider.clone();
            move || provider.parameters.lock().unwrap().len() == 1
        },
        "provider parameter callback",
    )
    .await;
    let (device_key, parameters) = provider.parameters.lock().unwrap().remove(0);
    assert_eq!(device_key, "D2");
    assert_eq!(parameters[0].name, "interval");
}

#[tokio::test]
async fn unparseable_platform_traffic_is_dropped() {
    common::init_logging();
    let (_platform, provider, service) = external_fixture();

    service
        .receive_messages(vec![GatewaySubdeviceMessage::new(Message::new(
            "p2d/D1/feed_values",
            b"not json".to_vec(),
        ))])
        .await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(provider.readings.lock().unwrap().is_empty());
}
