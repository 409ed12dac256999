//! Core data types for Thermocam
//!
//! Defines the device record, its lifecycle state, alert zones and the
//! per-device processing settings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::constants::{device as device_const, processing, zones as zone_const};

/// Lifecycle state of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceState {
    Init,
    Offline,
    Available,
    Active,
    Error,
}

impl DeviceState {
    pub const ALL: [DeviceState; 5] = [
        DeviceState::Init,
        DeviceState::Offline,
        DeviceState::Available,
        DeviceState::Active,
        DeviceState::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceState::Init => "init",
            DeviceState::Offline => "offline",
            DeviceState::Available => "available",
            DeviceState::Active => "active",
            DeviceState::Error => "error",
        }
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A point in the unit square, relative to the source frame
///
/// Serialized as a two-element array `[x, y]`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "(f64, f64)", into = "(f64, f64)")]
pub struct NormPoint {
    pub x: f64,
    pub y: f64,
}

impl NormPoint {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn is_in_unit_square(&self) -> bool {
        (0.0..=1.0).contains(&self.x) && (0.0..=1.0).contains(&self.y)
    }
}

impl From<(f64, f64)> for NormPoint {
    fn from((x, y): (f64, f64)) -> Self {
        Self { x, y }
    }
}

impl From<NormPoint> for (f64, f64) {
    fn from(p: NormPoint) -> Self {
        (p.x, p.y)
    }
}

/// Kind of alert zone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoneKind {
    Point,
    Area,
    Global,
}

/// A user-defined region of interest on a device's frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertZone {
    #[serde(rename = "type")]
    pub kind: ZoneKind,
    pub coords: Vec<NormPoint>,
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    #[serde(default = "default_color")]
    pub color: String,
    #[serde(default)]
    pub enabled: bool,
    /// Last evaluated temperature (runtime only)
    #[serde(skip)]
    pub last_temperature: Option<f32>,
    /// Last evaluated hottest point (runtime only)
    #[serde(skip)]
    pub last_hot_point: Option<NormPoint>,
}

fn default_threshold() -> f32 {
    zone_const::DEFAULT_THRESHOLD
}

fn default_color() -> String {
    zone_const::DEFAULT_COLOR.to_string()
}

impl AlertZone {
    fn with_kind(kind: ZoneKind, coords: Vec<NormPoint>) -> Self {
        Self {
            kind,
            coords,
            threshold: zone_const::DEFAULT_THRESHOLD,
            color: zone_const::DEFAULT_COLOR.to_string(),
            enabled: true,
            last_temperature: None,
            last_hot_point: None,
        }
    }

    /// Enabled point zone at a normalized position
    pub fn point(at: NormPoint) -> Self {
        Self::with_kind(ZoneKind::Point, vec![at])
    }

    /// Enabled polygon zone
    pub fn area(polygon: Vec<NormPoint>) -> Self {
        Self::with_kind(ZoneKind::Area, polygon)
    }

    /// The full-frame zone every device carries; disabled by default
    pub fn global() -> Self {
        let mut zone = Self::with_kind(
            ZoneKind::Global,
            vec![
                NormPoint::new(0.0, 0.0),
                NormPoint::new(1.0, 0.0),
                NormPoint::new(1.0, 1.0),
                NormPoint::new(0.0, 1.0),
            ],
        );
        zone.enabled = false;
        zone
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = color.into();
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn is_global(&self) -> bool {
        self.kind == ZoneKind::Global
    }

    /// Zones that take part in temperature evaluation
    pub fn is_evaluated(&self) -> bool {
        self.enabled && !self.is_global()
    }
}

/// What the composed overlay shows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlayMode {
    Video,
    Thermal,
    #[default]
    Both,
}

/// Filter applied to the video frame before composition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoFilter {
    #[default]
    None,
    Gray,
    Edges,
}

/// Named heatmap color scale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Colormap {
    #[default]
    Hot,
    Jet,
    Hsv,
    Inferno,
}

impl Colormap {
    pub const ALL: [Colormap; 4] = [Colormap::Hot, Colormap::Jet, Colormap::Hsv, Colormap::Inferno];
}

macro_rules! lowercase_from_str {
    ($ty:ident { $($name:literal => $variant:ident),+ $(,)? }) => {
        impl FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_ascii_lowercase().as_str() {
                    $($name => Ok($ty::$variant),)+
                    other => Err(format!(
                        "unknown {} '{}' (expected one of: {})",
                        stringify!($ty),
                        other,
                        [$($name),+].join(", ")
                    )),
                }
            }
        }
    };
}

lowercase_from_str!(OverlayMode { "video" => Video, "thermal" => Thermal, "both" => Both });
lowercase_from_str!(VideoFilter { "none" => None, "gray" => Gray, "edges" => Edges });
lowercase_from_str!(Colormap { "hot" => Hot, "jet" => Jet, "hsv" => Hsv, "inferno" => Inferno });
lowercase_from_str!(ZoneKind { "point" => Point, "area" => Area, "global" => Global });

/// Per-device fusion parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingSettings {
    #[serde(default)]
    pub overlay_mode: OverlayMode,
    /// Heatmap weight in `Both` mode, percent
    #[serde(default = "default_thermo_alpha")]
    pub thermo_alpha: u8,
    #[serde(default)]
    pub video_filter: VideoFilter,
    /// Filter strength, percent
    #[serde(default = "default_filter_intensity")]
    pub filter_intensity: u8,
    #[serde(default)]
    pub heatmap_colormap: Colormap,
}

fn default_thermo_alpha() -> u8 {
    processing::DEFAULT_THERMO_ALPHA
}

fn default_filter_intensity() -> u8 {
    processing::DEFAULT_FILTER_INTENSITY
}

impl Default for ProcessingSettings {
    fn default() -> Self {
        Self {
            overlay_mode: OverlayMode::Both,
            thermo_alpha: processing::DEFAULT_THERMO_ALPHA,
            video_filter: VideoFilter::None,
            filter_intensity: processing::DEFAULT_FILTER_INTENSITY,
            heatmap_colormap: Colormap::Hot,
        }
    }
}

impl ProcessingSettings {
    /// Heatmap blend weight in [0, 1]
    pub fn heatmap_weight(&self) -> f32 {
        f32::from(self.thermo_alpha.min(processing::MAX_PERCENT)) / 100.0
    }
}

/// A networked thermal camera
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    /// Network address; rediscovered at runtime, never persisted
    pub address: String,
    pub name: String,
    pub state: DeviceState,
    pub zones: Vec<AlertZone>,
    pub settings: ProcessingSettings,
}

impl Device {
    /// New device with the default name, settings and a disabled Global zone
    pub fn new(id: impl Into<String>, address: impl Into<String>, state: DeviceState) -> Self {
        let id = id.into();
        Self {
            name: default_device_name(&id),
            id,
            address: address.into(),
            state,
            zones: vec![AlertZone::global()],
            settings: ProcessingSettings::default(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == DeviceState::Active
    }
}

/// `Camera-<id>`
pub fn default_device_name(id: &str) -> String {
    format!("{}{}", device_const::NAME_PREFIX, id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_norm_point_serializes_as_pair() {
        let json = serde_json::to_string(&NormPoint::new(0.25, 0.5)).unwrap();
        assert_eq!(json, "[0.25,0.5]");
        let back: NormPoint = serde_json::from_str("[0.1,0.9]").unwrap();
        assert_eq!(back, NormPoint::new(0.1, 0.9));
    }

    #[test]
    fn test_zone_uses_type_key_and_defaults() {
        let zone: AlertZone = serde_json::from_str(
            r#"{"coords":[[0.5,0.5]],"type":"point","enabled":true,"threshold":42.0}"#,
        )
        .unwrap();
        assert_eq!(zone.kind, ZoneKind::Point);
        assert_eq!(zone.color, "#ff0000");
        assert_eq!(zone.threshold, 42.0);

        let json = serde_json::to_value(&zone).unwrap();
        assert_eq!(json["type"], "point");
        assert!(json.get("last_temperature").is_none());
    }

    #[test]
    fn test_settings_defaults() {
        let s = ProcessingSettings::default();
        assert_eq!(s.overlay_mode, OverlayMode::Both);
        assert_eq!(s.thermo_alpha, 30);
        assert_eq!(s.video_filter, VideoFilter::None);
        assert_eq!(s.filter_intensity, 30);
        assert_eq!(s.heatmap_colormap, Colormap::Hot);

        let parsed: ProcessingSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(parsed, s);
    }

    #[test]
    fn test_missing_fields_take_their_own_defaults() {
        let parsed: ProcessingSettings =
            serde_json::from_str(r#"{"thermo_alpha": 80}"#).unwrap();
        assert_eq!(parsed.thermo_alpha, 80);
        assert_eq!(parsed.filter_intensity, processing::DEFAULT_FILTER_INTENSITY);

        let parsed: ProcessingSettings =
            serde_json::from_str(r#"{"filter_intensity": 5}"#).unwrap();
        assert_eq!(parsed.filter_intensity, 5);
        assert_eq!(parsed.thermo_alpha, processing::DEFAULT_THERMO_ALPHA);
    }

    #[test]
    fn test_settings_wire_names() {
        let json = serde_json::to_value(ProcessingSettings::default()).unwrap();
        assert_eq!(json["overlay_mode"], "both");
        assert_eq!(json["video_filter"], "none");
        assert_eq!(json["heatmap_colormap"], "hot");
    }

    #[test]
    fn test_from_str_case_insensitive() {
        assert_eq!("JET".parse::<Colormap>().unwrap(), Colormap::Jet);
        assert_eq!("edges".parse::<VideoFilter>().unwrap(), VideoFilter::Edges);
        assert!("sepia".parse::<VideoFilter>().is_err());
    }

    #[test]
    fn test_new_device_defaults() {
        let d = Device::new("cam1", "10.0.0.5", DeviceState::Available);
        assert_eq!(d.name, "Camera-cam1");
        assert_eq!(d.zones.len(), 1);
        assert!(d.zones[0].is_global());
        assert!(!d.zones[0].enabled);
    }

    #[test]
    fn test_heatmap_weight() {
        let s = ProcessingSettings { thermo_alpha: 75, ..Default::default() };
        assert!((s.heatmap_weight() - 0.75).abs() < 1e-6);
    }
}
