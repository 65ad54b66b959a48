//! Core data model shared by every component: the opaque wire [`Message`],
//! its classification into [`MessageType`], and the device records kept by
//! the repositories.

use serde::{Deserialize, Serialize};

pub mod messages;

/// A single unit of traffic on either broker: a channel (MQTT topic) and an
/// opaque payload. The core never interprets the payload; only protocol
/// implementations do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    channel: String,
    payload: Vec<u8>,
}

impl Message {
    pub fn new(channel: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Message {
            channel: channel.into(),
            payload: payload.into(),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Lossy view of the payload for logging.
    pub fn payload_text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

/// Classes of messages the gateway routes. Everything else is [`MessageType::Unknown`]
/// and gets dropped at the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    FeedValues,
    ParameterSync,
    TimeSync,
    FileUploadInit,
    FileUploadAbort,
    FileBinaryResponse,
    FileUrlDownloadInit,
    FileUrlDownloadAbort,
    FileListRequest,
    FileDelete,
    FilePurge,
    FirmwareUpdateInstall,
    FirmwareUpdateAbort,
    DeviceRegistration,
    DeviceRegistrationResponse,
    DeviceRemoval,
    RegisteredDevicesRequest,
    RegisteredDevicesResponse,
    ChildrenSynchronizationRequest,
    ChildrenSynchronizationResponse,
    PlatformStatus,
    Unknown,
}

/// Whether a device record was created through the platform or minted by the
/// gateway on its owner's behalf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceOwnership {
    Platform,
    Gateway,
}

impl DeviceOwnership {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceOwnership::Platform => "Platform",
            DeviceOwnership::Gateway => "Gateway",
        }
    }

    pub fn parse(value: &str) -> Option<DeviceOwnership> {
        match value {
            "Platform" => Some(DeviceOwnership::Platform),
            "Gateway" => Some(DeviceOwnership::Gateway),
            _ => None,
        }
    }
}

/// The identity the gateway itself authenticates with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub key: String,
    pub password: String,
    pub name: String,
}

impl DeviceIdentity {
    pub fn new(
        key: impl Into<String>,
        password: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        DeviceIdentity {
            key: key.into(),
            password: password.into(),
            name: name.into(),
        }
    }
}

/// One row of the device repository: a known subdevice, who created it, and
/// when the gateway learned of it (milliseconds since the epoch).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredDeviceInformation {
    pub device_key: String,
    pub owned_by: DeviceOwnership,
    pub timestamp_ms: i64,
}

impl StoredDeviceInformation {
    pub fn new(
        device_key: impl Into<String>,
        owned_by: DeviceOwnership,
        timestamp_ms: i64,
    ) -> Self {
        StoredDeviceInformation {
            device_key: device_key.into(),
            owned_by,
            timestamp_ms,
        }
    }
}

/// An inner message destined for (or coming from) a single subdevice, as
/// carried inside the gateway envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewaySubdeviceMessage {
    message: Message,
}

impl GatewaySubdeviceMessage {
    pub fn new(message: Message) -> Self {
        GatewaySubdeviceMessage { message }
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn into_message(self) -> Message {
        self.message
    }
}
