//! Data types, persistence, and validation modules
//!
//! Contains the device record model and its on-disk representation.

mod persistence;
mod types;
mod validation;

pub use persistence::{DeviceRecords, DeviceStore, PersistedDevice};
pub use types::{
    default_device_name, AlertZone, Colormap, Device, DeviceState, NormPoint, OverlayMode,
    ProcessingSettings, VideoFilter, ZoneKind,
};
pub use validation::{
    validate_address, validate_device_id, validate_device_name, validate_settings,
    validate_zone, validate_zones,
};
