//! Publish/subscribe topics and payloads
//!
//! | Topic            | Direction      | Payload                              |
//! |------------------|----------------|--------------------------------------|
//! | `discovery`      | device→server  | `"<id>:<address>"`                   |
//! | `<id>/status`    | device→server  | `active` / `connected` / `offline`   |
//! | `<id>/amg8833`   | device→server  | 256 bytes, 64 little-endian `f32`    |
//! | `<id>/control`   | server→device  | `start` / `stop` / `ack-connect`     |
//! | `server/status`  | server→all     | `online` / `offline` (also last will)|

use std::fmt;

pub const DISCOVERY_TOPIC: &str = "discovery";
pub const SERVER_STATUS_TOPIC: &str = "server/status";

const STATUS_SUFFIX: &str = "status";
const SENSOR_SUFFIX: &str = "amg8833";
const CONTROL_SUFFIX: &str = "control";

pub fn status_topic(id: &str) -> String {
    format!("{}/{}", id, STATUS_SUFFIX)
}

pub fn sensor_topic(id: &str) -> String {
    format!("{}/{}", id, SENSOR_SUFFIX)
}

pub fn control_topic(id: &str) -> String {
    format!("{}/{}", id, CONTROL_SUFFIX)
}

/// Command sent to a device on `<id>/control`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCommand {
    Start,
    Stop,
    AckConnect,
}

impl DeviceCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceCommand::Start => "start",
            DeviceCommand::Stop => "stop",
            DeviceCommand::AckConnect => "ack-connect",
        }
    }
}

impl fmt::Display for DeviceCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server presence published on `server/status`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerStatus {
    Online,
    Offline,
}

impl ServerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerStatus::Online => "online",
            ServerStatus::Offline => "offline",
        }
    }
}

/// A message received from a device
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Discovery { id: String, address: String },
    Status { id: String, token: String },
    Sensor { id: String, payload: Vec<u8> },
}

impl Inbound {
    /// Classify a received message; unknown topics and malformed text give `None`
    pub fn parse(topic: &str, payload: &[u8]) -> Option<Inbound> {
        if topic == DISCOVERY_TOPIC {
            let text = std::str::from_utf8(payload).ok()?;
            let (id, address) = text.trim().split_once(':')?;
            let (id, address) = (id.trim(), address.trim());
            if id.is_empty() || address.is_empty() {
                return None;
            }
            return Some(Inbound::Discovery {
                id: id.to_string(),
                address: address.to_string(),
            });
        }

        let (id, suffix) = topic.split_once('/')?;
        if id.is_empty() || suffix.contains('/') {
            return None;
        }
        match suffix {
            STATUS_SUFFIX => {
                let token = std::str::from_utf8(payload).ok()?.trim().to_string();
                Some(Inbound::Status { id: id.to_string(), token })
            }
            SENSOR_SUFFIX => Some(Inbound::Sensor {
                id: id.to_string(),
                payload: payload.to_vec(),
            }),
            _ => None,
        }
    }

    pub fn device_id(&self) -> &str {
        match self {
            Inbound::Discovery { id, .. } | Inbound::Status { id, .. } | Inbound::Sensor { id, .. } => id,
        }
    }
}

/// A message to publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub topic: String,
    pub payload: Vec<u8>,
    /// Deliver at least once instead of at most once
    pub reliable: bool,
}

impl Outbound {
    pub fn device_command(id: &str, command: DeviceCommand) -> Self {
        Self {
            topic: control_topic(id),
            payload: command.as_str().as_bytes().to_vec(),
            reliable: false,
        }
    }

    pub fn server_status(status: ServerStatus) -> Self {
        Self {
            topic: SERVER_STATUS_TOPIC.to_string(),
            payload: status.as_str().as_bytes().to_vec(),
            reliable: true,
        }
    }
}

/// Topics to subscribe to once a device is known
pub fn device_subscriptions(id: &str) -> [String; 2] {
    [status_topic(id), sensor_topic(id)]
}
