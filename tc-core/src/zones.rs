//! Alert zone geometry and evaluation
//!
//! Zones are stored in normalized coordinates. Conversion to pixel space
//! happens only here, transiently, against a temperature field that has
//! already been resized to the frame's pixel dimensions (`[[y, x]]`).

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::constants::zones::AREA_SCAN_STRIDE;
use crate::data::{AlertZone, NormPoint, ZoneKind};

/// Normalized point to pixel coordinates
pub fn to_pixel(p: NormPoint, width: u32, height: u32) -> (f64, f64) {
    (p.x * f64::from(width), p.y * f64::from(height))
}

/// Pixel coordinates to a normalized point
pub fn to_normalized(x: f64, y: f64, width: u32, height: u32) -> NormPoint {
    NormPoint::new(x / f64::from(width), y / f64::from(height))
}

/// Integer pixel holding a normalized point (floor, clamped into the frame)
pub fn pixel_index(p: NormPoint, width: u32, height: u32) -> (usize, usize) {
    let (x, y) = to_pixel(p, width, height);
    (clamp_index(x, width), clamp_index(y, height))
}

fn clamp_index(v: f64, len: u32) -> usize {
    let max = len.saturating_sub(1) as f64;
    v.floor().clamp(0.0, max) as usize
}

/// Inclusive pixel bounding box
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub x0: usize,
    pub y0: usize,
    pub x1: usize,
    pub y1: usize,
}

impl BoundingBox {
    pub fn width(&self) -> usize {
        self.x1 - self.x0 + 1
    }

    pub fn height(&self) -> usize {
        self.y1 - self.y0 + 1
    }
}

/// Axis-aligned bounding box of a pixel-space polygon, clipped to the frame
pub fn bounding_box(polygon: &[(f64, f64)], width: u32, height: u32) -> Option<BoundingBox> {
    if polygon.is_empty() || width == 0 || height == 0 {
        return None;
    }
    let (mut min_x, mut min_y) = (f64::INFINITY, f64::INFINITY);
    let (mut max_x, mut max_y) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
    for &(x, y) in polygon {
        min_x = min_x.min(x);
        min_y = min_y.min(y);
        max_x = max_x.max(x);
        max_y = max_y.max(y);
    }
    Some(BoundingBox {
        x0: clamp_index(min_x, width),
        y0: clamp_index(min_y, height),
        x1: clamp_index(max_x, width),
        y1: clamp_index(max_y, height),
    })
}

/// Rasterized polygon restricted to its bounding box
///
/// A pixel is inside when its center is inside the polygon (even-odd rule).
#[derive(Debug, Clone)]
pub struct PolygonMask {
    bbox: BoundingBox,
    bits: Array2<bool>,
}

impl PolygonMask {
    pub fn rasterize(polygon: &[(f64, f64)], width: u32, height: u32) -> Option<Self> {
        let bbox = bounding_box(polygon, width, height)?;
        let mut bits = Array2::from_elem((bbox.height(), bbox.width()), false);
        let mut crossings: Vec<f64> = Vec::with_capacity(polygon.len());

        for y in bbox.y0..=bbox.y1 {
            let yc = y as f64 + 0.5;
            crossings.clear();
            for i in 0..polygon.len() {
                let (xa, ya) = polygon[i];
                let (xb, yb) = polygon[(i + 1) % polygon.len()];
                if (ya <= yc && yc < yb) || (yb <= yc && yc < ya) {
                    crossings.push(xa + (yc - ya) * (xb - xa) / (yb - ya));
                }
            }
            crossings.sort_by(f64::total_cmp);

            for pair in crossings.chunks_exact(2) {
                let start = (pair[0] - 0.5).ceil().max(bbox.x0 as f64) as usize;
                let end = (pair[1] - 0.5).floor();
                if end < bbox.x0 as f64 {
                    continue;
                }
                let end = (end as usize).min(bbox.x1);
                for x in start..=end {
                    bits[[y - bbox.y0, x - bbox.x0]] = true;
                }
            }
        }
        Some(Self { bbox, bits })
    }

    pub fn bbox(&self) -> BoundingBox {
        self.bbox
    }

    pub fn contains(&self, x: usize, y: usize) -> bool {
        if x < self.bbox.x0 || x > self.bbox.x1 || y < self.bbox.y0 || y > self.bbox.y1 {
            return false;
        }
        self.bits[[y - self.bbox.y0, x - self.bbox.x0]]
    }

    pub fn count(&self) -> usize {
        self.bits.iter().filter(|b| **b).count()
    }
}

/// Result of evaluating one zone against a temperature field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneReading {
    /// Position of the zone in the device's zone list
    pub index: usize,
    pub kind: ZoneKind,
    pub temperature: f32,
    pub hot_point: NormPoint,
    pub threshold: f32,
    pub alarm: bool,
}

/// Evaluate one zone; `None` for Global, disabled or degenerate zones
pub fn evaluate_zone(index: usize, zone: &AlertZone, field: ArrayView2<f32>) -> Option<ZoneReading> {
    if !zone.is_evaluated() {
        return None;
    }
    let (height, width) = field.dim();
    let (w, h) = (u32::try_from(width).ok()?, u32::try_from(height).ok()?);
    if w == 0 || h == 0 {
        return None;
    }

    let (temperature, hot_point) = match zone.kind {
        ZoneKind::Point => {
            let p = *zone.coords.first()?;
            let (x, y) = pixel_index(p, w, h);
            (field[[y, x]], p)
        }
        ZoneKind::Area => {
            let polygon: Vec<(f64, f64)> = zone.coords.iter().map(|p| to_pixel(*p, w, h)).collect();
            let mask = PolygonMask::rasterize(&polygon, w, h)?;
            let bbox = mask.bbox();
            let mut best: Option<(f32, usize, usize)> = None;
            for y in (bbox.y0..=bbox.y1).step_by(AREA_SCAN_STRIDE) {
                for x in (bbox.x0..=bbox.x1).step_by(AREA_SCAN_STRIDE) {
                    if !mask.contains(x, y) {
                        continue;
                    }
                    let v = field[[y, x]];
                    if best.map_or(true, |(b, _, _)| v > b) {
                        best = Some((v, x, y));
                    }
                }
            }
            let (v, x, y) = best?;
            (v, to_normalized(x as f64, y as f64, w, h))
        }
        ZoneKind::Global => return None,
    };

    Some(ZoneReading {
        index,
        kind: zone.kind,
        temperature,
        hot_point,
        threshold: zone.threshold,
        alarm: temperature >= zone.threshold,
    })
}

/// Evaluate all zones and record the results on the zones themselves
pub fn evaluate_zones(zones: &mut [AlertZone], field: ArrayView2<f32>) -> Vec<ZoneReading> {
    let mut readings = Vec::new();
    for (index, zone) in zones.iter_mut().enumerate() {
        if let Some(reading) = evaluate_zone(index, zone, field) {
            zone.last_temperature = Some(reading.temperature);
            zone.last_hot_point = Some(reading.hot_point);
            readings.push(reading);
        }
    }
    readings
}

/// Keep exactly one Global zone: the first one found stays, later ones are
/// dropped, and a disabled full-frame zone is inserted at the front when
/// none exists. Returns true when the list changed.
pub fn ensure_global_zone(zones: &mut Vec<AlertZone>) -> bool {
    let before = zones.len();
    let mut seen = false;
    zones.retain(|z| {
        if !z.is_global() {
            return true;
        }
        let keep = !seen;
        seen = true;
        keep
    });
    if !seen {
        zones.insert(0, AlertZone::global());
    }
    zones.len() != before || !seen
}
