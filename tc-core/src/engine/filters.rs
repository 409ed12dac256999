//! Video filters and overlay composition

use image::buffer::ConvertBuffer;
use image::{imageops, GrayImage, Rgb, RgbImage};
use ndarray::Array2;
use std::borrow::Cow;

use crate::data::{OverlayMode, ProcessingSettings, VideoFilter};

/// Desaturate, then expand back to three channels
pub fn gray(frame: &RgbImage) -> RgbImage {
    imageops::grayscale(frame).convert()
}

/// Sobel gradient magnitude rescaled to 0-255, as a three-channel image
pub fn edges(frame: &RgbImage) -> RgbImage {
    let (w, h) = frame.dimensions();
    if w == 0 || h == 0 {
        return frame.clone();
    }
    let plane: GrayImage = imageops::grayscale(frame);
    let (hu, wu) = (h as usize, w as usize);
    // Borders replicate the nearest pixel
    let at = |y: isize, x: isize| {
        let y = y.clamp(0, hu as isize - 1) as u32;
        let x = x.clamp(0, wu as isize - 1) as u32;
        f32::from(plane.get_pixel(x, y)[0])
    };

    let mut magnitude = Array2::<f32>::zeros((hu, wu));
    let mut peak = 0.0f32;
    for y in 0..hu as isize {
        for x in 0..wu as isize {
            let gx = (at(y - 1, x + 1) + 2.0 * at(y, x + 1) + at(y + 1, x + 1))
                - (at(y - 1, x - 1) + 2.0 * at(y, x - 1) + at(y + 1, x - 1));
            let gy = (at(y + 1, x - 1) + 2.0 * at(y + 1, x) + at(y + 1, x + 1))
                - (at(y - 1, x - 1) + 2.0 * at(y - 1, x) + at(y - 1, x + 1));
            let m = (gx * gx + gy * gy).sqrt();
            peak = peak.max(m);
            magnitude[[y as usize, x as usize]] = m;
        }
    }

    let gain = if peak > 0.0 { 255.0 / peak } else { 0.0 };
    RgbImage::from_fn(w, h, |x, y| {
        let v = (magnitude[[y as usize, x as usize]] * gain).round().clamp(0.0, 255.0) as u8;
        Rgb([v, v, v])
    })
}

/// Apply the configured filter; `None` borrows the frame untouched
pub fn apply_filter(frame: &RgbImage, filter: VideoFilter) -> Cow<'_, RgbImage> {
    match filter {
        VideoFilter::None => Cow::Borrowed(frame),
        VideoFilter::Gray => Cow::Owned(gray(frame)),
        VideoFilter::Edges => Cow::Owned(edges(frame)),
    }
}

/// `(1 - weight) * base + weight * top`, per channel
pub fn blend(base: &RgbImage, top: &RgbImage, weight: f32) -> RgbImage {
    let weight = weight.clamp(0.0, 1.0);
    let mut out = base.clone();
    for (o, t) in out.pixels_mut().zip(top.pixels()) {
        for k in 0..3 {
            let v = (1.0 - weight) * f32::from(o[k]) + weight * f32::from(t[k]);
            o[k] = v.round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}

/// Compose the overlay for a frame and its heatmap (same dimensions)
pub fn compose(frame: &RgbImage, heatmap: RgbImage, settings: &ProcessingSettings) -> RgbImage {
    match settings.overlay_mode {
        OverlayMode::Thermal => heatmap,
        OverlayMode::Video => apply_filter(frame, settings.video_filter).into_owned(),
        OverlayMode::Both => {
            let filtered = apply_filter(frame, settings.video_filter);
            blend(&filtered, &heatmap, settings.heatmap_weight())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(w: u32, h: u32, c: [u8; 3]) -> RgbImage {
        RgbImage::from_pixel(w, h, Rgb(c))
    }

    #[test]
    fn test_gray_equalizes_channels() {
        let img = gray(&solid(2, 2, [255, 0, 0]));
        let p = img.get_pixel(0, 0).0;
        assert_eq!(p[0], p[1]);
        assert_eq!(p[1], p[2]);
        // Rec. 709 weights
        assert_eq!(p[0], 54);
    }

    #[test]
    fn test_edges_flat_image_is_black() {
        let img = edges(&solid(8, 8, [120, 40, 200]));
        assert!(img.pixels().all(|p| p.0 == [0, 0, 0]));
    }

    #[test]
    fn test_edges_vertical_step() {
        let img = RgbImage::from_fn(10, 6, |x, _| if x < 5 { Rgb([0, 0, 0]) } else { Rgb([255, 255, 255]) });
        let out = edges(&img);
        assert_eq!(out.get_pixel(4, 3).0, [255, 255, 255]);
        assert_eq!(out.get_pixel(0, 3).0, [0, 0, 0]);
        assert_eq!(out.get_pixel(9, 3).0, [0, 0, 0]);
    }

    #[test]
    fn test_compose_modes() {
        let frame = solid(4, 4, [200, 200, 200]);
        let heat = solid(4, 4, [0, 0, 100]);

        let mut s = ProcessingSettings { overlay_mode: OverlayMode::Video, ..Default::default() };
        assert_eq!(compose(&frame, heat.clone(), &s).get_pixel(0, 0).0, [200, 200, 200]);

        s.overlay_mode = OverlayMode::Thermal;
        assert_eq!(compose(&frame, heat.clone(), &s).get_pixel(0, 0).0, [0, 0, 100]);

        s.overlay_mode = OverlayMode::Both;
        s.thermo_alpha = 50;
        assert_eq!(compose(&frame, heat, &s).get_pixel(0, 0).0, [100, 100, 150]);
    }

    #[test]
    fn test_apply_filter_none_borrows() {
        let frame = solid(2, 2, [1, 2, 3]);
        assert!(matches!(apply_filter(&frame, VideoFilter::None), Cow::Borrowed(_)));
    }
}
