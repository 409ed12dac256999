//! Fusion engine modules
//!
//! Heatmap upscaling and scaling, colormaps, video filters and the
//! per-device fusion state that ties them together.

pub mod colormap;
pub mod filters;
mod fusion;
pub mod heatmap;

pub use fusion::{FusionEngine, TemperatureUpdate};
pub use heatmap::RunningScale;
