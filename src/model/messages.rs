//! Domain messages exchanged with the platform and the local bus. These are
//! the parsed forms; the wire shape is owned by a protocol implementation.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single feed reading. `timestamp` is milliseconds since the epoch; `None`
/// means "now" as far as the platform is concerned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    pub reference: String,
    pub value: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl Reading {
    pub fn new(reference: impl Into<String>, value: impl Into<Value>) -> Self {
        Reading {
            reference: reference.into(),
            value: value.into(),
            timestamp: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedValuesMessage {
    pub readings: Vec<Reading>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PullFeedValuesMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ParametersPullMessage;

/// A named configuration field on a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Parameter {
    pub name: String,
    pub value: Value,
}

impl Parameter {
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Parameter {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParametersUpdateMessage {
    pub parameters: Vec<Parameter>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeedDirection {
    In,
    InOut,
}

/// A named time-series channel on a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feed {
    pub name: String,
    pub reference: String,
    pub direction: FeedDirection,
    pub unit: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedRegistrationMessage {
    pub feeds: Vec<Feed>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedRemovalMessage {
    pub references: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attribute {
    pub name: String,
    pub data_type: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeRegistrationMessage {
    pub attributes: Vec<Attribute>,
}

/// Everything a subdevice supplies when it asks to be registered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRegistrationData {
    pub name: String,
    pub key: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub feeds: Vec<Feed>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<Parameter>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<Attribute>,
}

impl DeviceRegistrationData {
    pub fn new(name: impl Into<String>, key: impl Into<String>) -> Self {
        DeviceRegistrationData {
            name: name.into(),
            key: key.into(),
            feeds: Vec::new(),
            parameters: Vec::new(),
            attributes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRegistrationMessage {
    pub devices: Vec<DeviceRegistrationData>,
}

/// Reported back to the requesting subdevice once the platform's children
/// list settles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRegistrationResponseMessage {
    pub success: Vec<String>,
    pub failed: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRemovalMessage {
    pub keys: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChildrenSynchronizationRequestMessage;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildrenSynchronizationResponseMessage {
    pub children: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredDevicesRequestMessage {
    pub timestamp_from: i64,
    #[serde(default)]
    pub device_type: String,
    #[serde(default)]
    pub external_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredDeviceInformation {
    pub device_key: String,
    #[serde(default)]
    pub external_id: String,
    #[serde(default)]
    pub device_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredDevicesResponseMessage {
    pub timestamp_from: i64,
    #[serde(default)]
    pub device_type: String,
    #[serde(default)]
    pub external_id: String,
    pub matching_devices: Vec<RegisteredDeviceInformation>,
}

/// Broadcast on the local bus whenever the platform link goes up or down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformStatusMessage {
    pub connected: bool,
}
