//! Thermal matrix upscaling and normalization
//!
//! # How It Works
//!
//! 1. **Resize**: the 8x8 matrix is upscaled to the frame size with
//!    `imageops::resize` and the Catmull-Rom filter. The resampler clamps
//!    float samples to 0.0..=1.0, so the matrix is first mapped into the
//!    middle of that band and mapped back afterwards. Cubic overshoot stays
//!    inside the margin, so the field keeps real temperatures for zone
//!    evaluation.
//!
//! 2. **Running scale**: a per-device min/max that is seeded from the first
//!    field and only ever widens. The color scale therefore adapts slowly
//!    instead of rescaling (and flickering) on every frame.

use image::imageops::{self, FilterType};
use image::{ImageBuffer, Luma};
use ndarray::{Array2, ArrayView2};

use crate::codec::ThermalMatrix;
use crate::constants::fusion::{NORMALIZE_EPSILON, RESAMPLE_BAND};
use crate::constants::thermal::GRID_SIZE;

/// Upscale a thermal matrix to `width` x `height`; result is indexed `[[y, x]]`
pub fn resize_cubic(matrix: &ThermalMatrix, width: u32, height: u32) -> Array2<f32> {
    let (w, h) = (width as usize, height as usize);
    let Some((lo, hi)) = matrix_range(matrix) else {
        return Array2::zeros((h, w));
    };
    if w == 0 || h == 0 || hi <= lo {
        return Array2::from_elem((h, w), lo);
    }

    let (band_lo, band_hi) = RESAMPLE_BAND;
    let to_band = (band_hi - band_lo) / (hi - lo);
    let grid = GRID_SIZE as u32;
    let source = ImageBuffer::<Luma<f32>, Vec<f32>>::from_fn(grid, grid, |x, y| {
        Luma([band_lo + (matrix[y as usize][x as usize] - lo) * to_band])
    });

    let resized = imageops::resize(&source, width, height, FilterType::CatmullRom);
    Array2::from_shape_fn((h, w), |(y, x)| {
        lo + (resized.get_pixel(x as u32, y as u32)[0] - band_lo) / to_band
    })
}

fn matrix_range(matrix: &ThermalMatrix) -> Option<(f32, f32)> {
    matrix.iter().flatten().fold(None, |acc, &v| match acc {
        None => Some((v, v)),
        Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
    })
}

/// Monotonically widening min/max used to normalize heatmaps
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunningScale {
    min: f32,
    max: f32,
}

impl RunningScale {
    /// Seed from the first field of a device
    pub fn seeded(field: ArrayView2<f32>) -> Option<Self> {
        let (min, max) = field_range(field)?;
        Some(Self { min, max })
    }

    /// Widen to include the field's range; never narrows
    pub fn observe(&mut self, field: ArrayView2<f32>) {
        if let Some((min, max)) = field_range(field) {
            self.min = self.min.min(min);
            self.max = self.max.max(max);
        }
    }

    pub fn min(&self) -> f32 {
        self.min
    }

    pub fn max(&self) -> f32 {
        self.max
    }

    /// Map a value into 0-255
    pub fn normalize(&self, value: f32) -> u8 {
        let scaled = 255.0 * (value - self.min) / (self.max - self.min + NORMALIZE_EPSILON);
        scaled.clamp(0.0, 255.0) as u8
    }

    /// Normalize a whole field
    pub fn normalize_field(&self, field: ArrayView2<f32>) -> Array2<u8> {
        field.mapv(|v| self.normalize(v))
    }
}

fn field_range(field: ArrayView2<f32>) -> Option<(f32, f32)> {
    field.iter().fold(None, |acc, &v| match acc {
        None => Some((v, v)),
        Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
    })
}
