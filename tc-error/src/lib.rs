//! Error types shared by the Thermocam crates
//!
//! Library code returns [`Result`]; the binaries wrap it in `anyhow` at the
//! top level only. Sensor decoding has its own [`DecodeError`] so callers can
//! drop a bad payload without inspecting strings.

use std::io;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, ThermocamError>;

/// Failure to turn a raw sensor payload into a thermal matrix.
///
/// Decoding is all-or-nothing: any of these means no matrix was produced.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("Invalid sensor payload length: {actual} bytes (expected {expected})")]
    InvalidLength { expected: usize, actual: usize },

    #[error("Non-finite sensor value at index {index}: {value}")]
    NonFinite { index: usize, value: f32 },
}

#[derive(thiserror::Error, Debug)]
pub enum ThermocamError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A file we own (device store, config, snapshot) could not be read or written
    #[error("Cannot {op} {path}: {source}")]
    File {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    // Devices

    #[error("Sensor decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    #[error("Invalid device id {id:?}: {reason}")]
    InvalidDeviceId { id: String, reason: String },

    #[error("Invalid device name: {0}")]
    InvalidDeviceName(String),

    #[error("Invalid device address {0:?}")]
    InvalidAddress(String),

    #[error("Device {0} is active; stop its stream first")]
    DeviceActive(String),

    #[error("Device {id} is {state}, expected {expected}")]
    WrongState {
        id: String,
        state: String,
        expected: &'static str,
    },

    #[error("Invalid zone: {0}")]
    InvalidZone(String),

    #[error("Invalid processing setting {field}: {reason}")]
    InvalidSettings { field: String, reason: String },

    // Streams

    #[error("Failed to open video source {url}: {reason}")]
    CaptureOpen { url: String, reason: String },

    #[error("Capture error: {0}")]
    Capture(String),

    #[error("Failed to spawn worker for {device_id}: {reason}")]
    WorkerSpawn { device_id: String, reason: String },

    #[error("Worker protocol error: {0}")]
    WorkerProtocol(String),

    #[error("Snapshot failed: {0}")]
    Snapshot(String),

    // Bus and discovery

    #[error("Message bus error: {0}")]
    Bus(String),

    #[error("Service discovery error: {0}")]
    Discovery(String),

    // Control socket

    #[error("No thermocamd socket at {0}")]
    SocketMissing(PathBuf),

    #[error("Refusing control socket {path}: {reason}")]
    SocketPath { path: PathBuf, reason: &'static str },

    #[error("Control connection failed: {0}")]
    ControlConnection(String),

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Control protocol error: {0}")]
    ControlProtocol(String),

    #[error("Message too large: {size} bytes (max {max_size} bytes)")]
    MessageTooLarge { size: usize, max_size: usize },
}

impl ThermocamError {
    pub fn read_file(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::File {
            op: "read",
            path: path.into(),
            source,
        }
    }

    pub fn write_file(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::File {
            op: "write",
            path: path.into(),
            source,
        }
    }

    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_settings(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSettings {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn bus(msg: impl Into<String>) -> Self {
        Self::Bus(msg.into())
    }

    pub fn worker_protocol(msg: impl Into<String>) -> Self {
        Self::WorkerProtocol(msg.into())
    }
}
