//! Thermal/video fusion engine
//!
//! Owns, per device, the exponentially smoothed thermal matrix, the running
//! color scale, the zone list and the processing settings. Everything else
//! talks to it through explicit update calls.
//!
//! # How It Works
//!
//! 1. **Matrix updates**: each payload is decoded and blended into the
//!    smoothed matrix (`0.8 * previous + 0.2 * new`, the first observation
//!    seeds it). Zone temperatures are recomputed right away so readings stay
//!    fresh between video frames.
//!
//! 2. **Frames**: the smoothed matrix is upscaled to the frame size,
//!    normalized against the running scale, colorized and composed with the
//!    (optionally filtered) frame according to the overlay mode.

use image::RgbImage;
use ndarray::Array2;
use std::collections::HashMap;
use tracing::{debug, trace};

use crate::codec::{self, ThermalMatrix};
use crate::constants::fusion::{DEFAULT_EVAL_HEIGHT, DEFAULT_EVAL_WIDTH};
use crate::constants::thermal::{SMOOTHING_GAIN, SMOOTHING_RETAIN};
use crate::data::{AlertZone, ProcessingSettings};
use crate::engine::colormap::colorize;
use crate::engine::filters::compose;
use crate::engine::heatmap::{resize_cubic, RunningScale};
use crate::error::DecodeError;
use crate::zones::{ensure_global_zone, evaluate_zones, ZoneReading};

/// Fresh zone temperatures for one device
#[derive(Debug, Clone, PartialEq)]
pub struct TemperatureUpdate {
    pub device_id: String,
    pub readings: Vec<ZoneReading>,
}

#[derive(Debug, Clone)]
struct DeviceFusion {
    smoothed: Option<ThermalMatrix>,
    scale: Option<RunningScale>,
    zones: Vec<AlertZone>,
    settings: ProcessingSettings,
    frame_size: Option<(u32, u32)>,
    readings: Vec<ZoneReading>,
}

impl Default for DeviceFusion {
    fn default() -> Self {
        Self {
            smoothed: None,
            scale: None,
            zones: vec![AlertZone::global()],
            settings: ProcessingSettings::default(),
            frame_size: None,
            readings: Vec::new(),
        }
    }
}

/// Per-device fusion state
#[derive(Debug, Clone)]
pub struct FusionEngine {
    devices: HashMap<String, DeviceFusion>,
    default_eval_size: (u32, u32),
}

impl Default for FusionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl FusionEngine {
    pub fn new() -> Self {
        Self {
            devices: HashMap::new(),
            default_eval_size: (DEFAULT_EVAL_WIDTH, DEFAULT_EVAL_HEIGHT),
        }
    }

    /// Resolution used to evaluate zones before a device's first frame
    pub fn with_eval_size(mut self, width: u32, height: u32) -> Self {
        self.default_eval_size = (width.max(1), height.max(1));
        self
    }

    fn entry(&mut self, device_id: &str) -> &mut DeviceFusion {
        self.devices.entry(device_id.to_string()).or_default()
    }

    /// Decode a sensor payload and fold it into the device's smoothed matrix
    ///
    /// On a decode error nothing changes.
    pub fn update_matrix(
        &mut self,
        device_id: &str,
        payload: &[u8],
    ) -> Result<Option<TemperatureUpdate>, DecodeError> {
        let raw = codec::decode(payload)?;
        Ok(self.apply_matrix(device_id, &raw))
    }

    /// Fold an already decoded matrix into the smoothed one
    pub fn apply_matrix(&mut self, device_id: &str, raw: &ThermalMatrix) -> Option<TemperatureUpdate> {
        let default_size = self.default_eval_size;
        let state = self.entry(device_id);

        let next = match &state.smoothed {
            None => *raw,
            Some(prev) => {
                let mut out = *prev;
                for (o, r) in out.iter_mut().flatten().zip(raw.iter().flatten()) {
                    *o = SMOOTHING_RETAIN * *o + SMOOTHING_GAIN * *r;
                }
                out
            }
        };
        state.smoothed = Some(next);

        if !state.zones.iter().any(AlertZone::is_evaluated) {
            return None;
        }

        let (w, h) = state.frame_size.unwrap_or(default_size);
        let field = resize_cubic(&next, w, h);
        let readings = evaluate_zones(&mut state.zones, field.view());
        state.readings = readings.clone();
        trace!("Evaluated {} zones for {}", readings.len(), device_id);

        Some(TemperatureUpdate {
            device_id: device_id.to_string(),
            readings,
        })
    }

    /// Fuse a video frame with the device's smoothed matrix
    ///
    /// Returns `None` while no matrix has been received for the device.
    pub fn handle_frame(&mut self, device_id: &str, frame: &RgbImage) -> Option<RgbImage> {
        let state = self.devices.get_mut(device_id)?;
        let smoothed = state.smoothed?;
        let (w, h) = frame.dimensions();
        if w == 0 || h == 0 {
            return None;
        }
        state.frame_size = Some((w, h));

        let field: Array2<f32> = resize_cubic(&smoothed, w, h);
        let scale = match state.scale.as_mut() {
            Some(scale) => {
                scale.observe(field.view());
                *scale
            }
            None => {
                let seeded = RunningScale::seeded(field.view())?;
                debug!(
                    "Seeded heatmap scale for {}: {:.1}..{:.1}",
                    device_id,
                    seeded.min(),
                    seeded.max()
                );
                state.scale = Some(seeded);
                seeded
            }
        };

        let levels = scale.normalize_field(field.view());
        let heatmap = colorize(levels.view(), state.settings.heatmap_colormap);
        Some(compose(frame, heatmap, &state.settings))
    }

    /// Replace a device's zones (the Global zone rule is applied)
    pub fn set_zones(&mut self, device_id: &str, mut zones: Vec<AlertZone>) {
        ensure_global_zone(&mut zones);
        let state = self.entry(device_id);
        state.zones = zones;
        state.readings.clear();
    }

    pub fn set_settings(&mut self, device_id: &str, settings: ProcessingSettings) {
        self.entry(device_id).settings = settings;
    }

    /// Drop all state for a device
    pub fn forget(&mut self, device_id: &str) {
        self.devices.remove(device_id);
    }

    pub fn smoothed(&self, device_id: &str) -> Option<&ThermalMatrix> {
        self.devices.get(device_id)?.smoothed.as_ref()
    }

    pub fn scale(&self, device_id: &str) -> Option<RunningScale> {
        self.devices.get(device_id)?.scale
    }

    pub fn zones(&self, device_id: &str) -> Option<&[AlertZone]> {
        self.devices.get(device_id).map(|s| s.zones.as_slice())
    }

    pub fn settings(&self, device_id: &str) -> Option<&ProcessingSettings> {
        self.devices.get(device_id).map(|s| &s.settings)
    }

    /// Most recent zone readings
    pub fn readings(&self, device_id: &str) -> &[ZoneReading] {
        self.devices
            .get(device_id)
            .map(|s| s.readings.as_slice())
            .unwrap_or(&[])
    }
}
