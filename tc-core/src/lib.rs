//! Thermocam Core Library
//!
//! Device lifecycle, thermal decoding and thermal/video fusion for a fleet
//! of networked thermal cameras.
//!
//! # Features
//!
//! - **Thermal Codec**: decodes AMG8833 payloads into camera-oriented 8x8 grids
//! - **Device Registry**: owns device records and the lifecycle state machine
//! - **Alert Zones**: normalized point/area/global zones with hot-spot search
//! - **Fusion Engine**: smoothed heatmaps, colormaps, filters and overlays
//! - **Configuration**: daemon config and persistent device records
//!
//! # Module Structure
//!
//! - `data/` - Data types, validation, persistence
//! - `engine/` - Heatmap, colormap, filter and fusion engine
//! - `codec`, `registry`, `zones`, `config`, `constants`
//!
//! # Example
//!
//! ```no_run
//! use tc_core::{DeviceRegistry, FusionEngine};
//!
//! let mut registry = DeviceRegistry::new();
//! registry.discover("cam1", "10.0.0.5").unwrap();
//!
//! let mut engine = FusionEngine::new();
//! let payload = [0u8; 256];
//! engine.update_matrix("cam1", &payload).unwrap();
//! ```

// Grouped modules
pub mod data;
pub mod engine;

// Standalone modules
pub mod codec;
pub mod config;
pub mod constants;
pub mod error;
pub mod registry;
pub mod zones;

pub use codec::{decode, encode_sensor_order, ThermalMatrix};
pub use config::DaemonConfig;
pub use data::{
    default_device_name, AlertZone, Colormap, Device, DeviceRecords, DeviceState, DeviceStore,
    NormPoint, OverlayMode, PersistedDevice, ProcessingSettings, VideoFilter, ZoneKind,
};
pub use engine::{FusionEngine, RunningScale, TemperatureUpdate};
pub use error::{DecodeError, Result, ThermocamError};
pub use registry::{DeviceRegistry, StatusToken, TransitionOutcome, Trigger, TRANSITIONS};
pub use zones::{ensure_global_zone, ZoneReading};
