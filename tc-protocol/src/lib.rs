//! Shared wire protocols for Thermocam
//!
//! - `bus`: publish/subscribe topics and payloads exchanged with devices
//! - `worker`: pipes between the stream supervisor and capture workers
//! - the crate root: the control socket spoken by the CLI and the daemon

pub mod bus;
pub mod worker;

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use tc_core::data::{validate_device_id, validate_device_name, validate_settings, validate_zones};
use tc_core::{AlertZone, Device, DeviceState, ProcessingSettings, ZoneReading};

/// Global request ID counter for correlation
static REQUEST_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Maximum message size for the control socket (64KB; zone lists can be long)
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Generate a unique request ID for correlation
pub fn generate_request_id() -> u64 {
    REQUEST_ID_COUNTER.fetch_add(1, Ordering::SeqCst)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Unique request ID for correlation and debugging
    pub id: u64,
    /// The actual request
    #[serde(flatten)]
    pub request: Request,
}

impl RequestEnvelope {
    pub fn new(request: Request) -> Self {
        Self {
            id: generate_request_id(),
            request,
        }
    }

    pub fn with_id(request: Request, id: u64) -> Self {
        Self { id, request }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", content = "data")]
pub enum Request {
    Ping,
    Version,
    ListDevices,
    GetDevice { id: String },
    /// Ask an Available device to start streaming
    StartDevice { id: String },
    /// Ask an Active device to stop streaming
    StopDevice { id: String },
    RemoveDevice { id: String },
    RenameDevice { id: String, name: String },
    SetZones { id: String, zones: Vec<AlertZone> },
    SetSettings { id: String, settings: ProcessingSettings },
    GetReadings { id: String },
}

impl Request {
    /// Validate request parameters before sending to the daemon
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Request::Ping | Request::Version | Request::ListDevices => Ok(()),

            Request::GetDevice { id }
            | Request::StartDevice { id }
            | Request::StopDevice { id }
            | Request::RemoveDevice { id }
            | Request::GetReadings { id } => check_id(id),

            Request::RenameDevice { id, name } => {
                check_id(id)?;
                validate_device_name(name).map(|_| ()).map_err(|e| e.to_string())
            }

            Request::SetZones { id, zones } => {
                check_id(id)?;
                validate_zones(zones).map_err(|e| e.to_string())
            }

            Request::SetSettings { id, settings } => {
                check_id(id)?;
                validate_settings(settings).map_err(|e| e.to_string())
            }
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Request::Ping => "Ping",
            Request::Version => "Version",
            Request::ListDevices => "ListDevices",
            Request::GetDevice { .. } => "GetDevice",
            Request::StartDevice { .. } => "StartDevice",
            Request::StopDevice { .. } => "StopDevice",
            Request::RemoveDevice { .. } => "RemoveDevice",
            Request::RenameDevice { .. } => "RenameDevice",
            Request::SetZones { .. } => "SetZones",
            Request::SetSettings { .. } => "SetSettings",
            Request::GetReadings { .. } => "GetReadings",
        }
    }
}

fn check_id(id: &str) -> Result<(), String> {
    validate_device_id(id).map_err(|e| e.to_string())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// Matches the request ID
    pub id: u64,
    /// The actual response
    #[serde(flatten)]
    pub response: Response,
}

impl ResponseEnvelope {
    pub fn new(id: u64, response: Response) -> Self {
        Self { id, response }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum Response {
    #[serde(rename = "ok")]
    Ok(ResponseData),
    #[serde(rename = "error")]
    Error { message: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub devices: Option<Vec<DeviceInfo>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readings: Option<Vec<ZoneReading>>,
}

impl ResponseData {
    pub fn none() -> Self { Self::default() }
    pub fn string(v: String) -> Self { Self { value: Some(v), ..Self::default() } }
    pub fn device(d: DeviceInfo) -> Self { Self { device: Some(d), ..Self::default() } }
    pub fn device_list(d: Vec<DeviceInfo>) -> Self { Self { devices: Some(d), ..Self::default() } }
    pub fn zone_readings(r: Vec<ZoneReading>) -> Self { Self { readings: Some(r), ..Self::default() } }
}

/// Device as reported to control clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub id: String,
    pub name: String,
    pub address: String,
    pub state: DeviceState,
    /// A capture worker is running for this device
    pub streaming: bool,
    pub zones: Vec<AlertZone>,
    pub settings: ProcessingSettings,
}

impl DeviceInfo {
    pub fn from_device(device: &Device, streaming: bool) -> Self {
        Self {
            id: device.id.clone(),
            name: device.name.clone(),
            address: device.address.clone(),
            state: device.state,
            streaming,
            zones: device.zones.clone(),
            settings: device.settings,
        }
    }
}

impl Response {
    pub fn ok() -> Self {
        Response::Ok(ResponseData::none())
    }

    pub fn ok_string(s: impl Into<String>) -> Self {
        Response::Ok(ResponseData::string(s.into()))
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Response::Error { message: msg.into() }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Response::Ok(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tc_core::NormPoint;

    #[test]
    fn test_request_wire_format() {
        let env = RequestEnvelope::with_id(Request::StartDevice { id: "cam1".into() }, 7);
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["id"], 7);
        assert_eq!(json["cmd"], "StartDevice");
        assert_eq!(json["data"]["id"], "cam1");

        let back: RequestEnvelope =
            serde_json::from_str(r#"{"id":3,"cmd":"Ping"}"#).unwrap();
        assert_eq!(back.request, Request::Ping);
    }

    #[test]
    fn test_response_wire_format() {
        let env = ResponseEnvelope::new(1, Response::ok_string("0.4.0"));
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["value"], "0.4.0");
        assert!(json.get("devices").is_none());

        let err: ResponseEnvelope =
            serde_json::from_str(r#"{"id":1,"status":"error","message":"nope"}"#).unwrap();
        assert_eq!(err.response, Response::error("nope"));
    }

    #[test]
    fn test_validate() {
        assert!(Request::Ping.validate().is_ok());
        assert!(Request::GetDevice { id: "cam/1".into() }.validate().is_err());
        assert!(Request::RenameDevice { id: "cam1".into(), name: " ".into() }
            .validate()
            .is_err());
        let bad_zone = AlertZone::point(NormPoint::new(1.2, 0.0));
        assert!(Request::SetZones { id: "cam1".into(), zones: vec![bad_zone] }
            .validate()
            .is_err());
        let settings = ProcessingSettings { filter_intensity: 250, ..Default::default() };
        assert!(Request::SetSettings { id: "cam1".into(), settings }.validate().is_err());
    }

    #[test]
    fn test_request_ids_increase() {
        let a = generate_request_id();
        let b = generate_request_id();
        assert!(b > a);
    }
}
