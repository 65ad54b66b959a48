//! Wire-grammar checks for the default JSON protocol: classification, the
//! envelope round trip, and the lifecycle codecs.

use gatelink::model::messages::{DeviceRegistrationData, DeviceRegistrationMessage};
use gatelink::model::{GatewaySubdeviceMessage, Message, MessageType};
use gatelink::protocol::json::JsonProtocol;
use gatelink::protocol::{
    GatewayRegistrationProtocol, GatewaySubdeviceProtocol, PlatformStatusProtocol,
    RegistrationProtocol,
};

mod common;

#[test]
fn classifies_by_channel_action() {
    let protocol = JsonProtocol;
    let cases = [
        ("d2p/D1/feed_values", MessageType::FeedValues),
        ("p2d/D1/parameters", MessageType::ParameterSync),
        ("d2p/D1/time", MessageType::TimeSync),
        ("p2g/GW/registered_devices_response", MessageType::RegisteredDevicesResponse),
        ("d2p/D1/device_registration", MessageType::DeviceRegistration),
        ("p2d/GW/children_synchronization_response", MessageType::ChildrenSynchronizationResponse),
        ("d2p/D1/firmware_update_install", MessageType::FirmwareUpdateInstall),
    ];
    for (channel, expected) in cases {
        let message = Message::new(channel, b"[]".to_vec());
        assert_eq!(
            GatewaySubdeviceProtocol::message_type(&protocol, &message),
            expected,
            "channel {channel}"
        );
    }

    let foreign = Message::new("telemetry/D1", b"{}".to_vec());
    assert_eq!(
        GatewaySubdeviceProtocol::message_type(&protocol, &foreign),
        MessageType::Unknown
    );
}

#[test]
fn envelope_round_trip_contains_inner_message() {
    let protocol = JsonProtocol;
    let inner = Message::new("d2p/D1/feed_values", br#"[{"reference":"T","value":25}]"#.to_vec());

    let wrapped = protocol
        .make_outbound_message("TEST_GATEWAY", GatewaySubdeviceMessage::new(inner.clone()))
        .expect("wrapping a recognized message must succeed");
    assert_eq!(wrapped.channel(), "g2p/TEST_GATEWAY/feed_values");

    let unwrapped = protocol.parse_incoming_subdevice_message(&wrapped);
    assert_eq!(unwrapped.len(), 1);
    assert_eq!(unwrapped[0].message().channel(), inner.channel());
    let original: serde_json::Value = serde_json::from_slice(inner.payload()).unwrap();
    let restored: serde_json::Value =
        serde_json::from_slice(unwrapped[0].message().payload()).unwrap();
    assert_eq!(original, restored);
}

#[test]
fn platform_envelope_fans_out_per_device() {
    let protocol = JsonProtocol;
    let envelope = Message::new(
        "p2g/TEST_GATEWAY/parameters",
        serde_json::to_vec(&serde_json::json!([
            {"device": "D1", "payload": [{"name": "interval", "value": 5}]},
            {"device": "D2", "payload": [{"name": "interval", "value": 9}]},
        ]))
        .unwrap(),
    );
    let unwrapped = protocol.parse_incoming_subdevice_message(&envelope);
    assert_eq!(unwrapped.len(), 2);
    assert_eq!(unwrapped[0].message().channel(), "p2d/D1/parameters");
    assert_eq!(unwrapped[1].message().channel(), "p2d/D2/parameters");
}

#[test]
fn wrap_refuses_foreign_and_non_json_payloads() {
    let protocol = JsonProtocol;
    let foreign = Message::new("nonsense", b"{}".to_vec());
    assert!(protocol
        .make_outbound_message("GW", GatewaySubdeviceMessage::new(foreign))
        .is_none());

    let binary = Message::new("d2p/D1/feed_values", vec![0xff, 0xfe]);
    assert!(protocol
        .make_outbound_message("GW", GatewaySubdeviceMessage::new(binary))
        .is_none());
}

#[test]
fn registration_codec_round_trip() {
    let protocol = JsonProtocol;
    let message = DeviceRegistrationMessage {
        devices: vec![DeviceRegistrationData::new("Device One", "D1")],
    };
    let wire = protocol
        .make_registration_message("TEST_GATEWAY", &message)
        .expect("registration must serialize");
    assert_eq!(wire.channel(), "d2p/TEST_GATEWAY/device_registration");

    let parsed = GatewayRegistrationProtocol::parse_registration_message(&protocol, &wire)
        .expect("registration must parse back");
    assert_eq!(parsed, message);
}

#[test]
fn response_channels_are_addressed_to_the_requester() {
    let protocol = JsonProtocol;
    assert_eq!(
        protocol.response_channel(MessageType::ChildrenSynchronizationRequest, "GW"),
        "p2d/GW/children_synchronization_response"
    );
    assert_eq!(
        protocol.response_channel(MessageType::RegisteredDevicesRequest, "GW"),
        "p2d/GW/registered_devices_response"
    );
}

#[test]
fn status_message_carries_the_connected_flag() {
    let protocol = JsonProtocol;
    let message = protocol
        .make_status_message("TEST_GATEWAY", true)
        .expect("status must serialize");
    assert_eq!(message.channel(), "p2d/TEST_GATEWAY/connection_status");
    let body: serde_json::Value = serde_json::from_slice(message.payload()).unwrap();
    assert_eq!(body, serde_json::json!({"connected": true}));
}
