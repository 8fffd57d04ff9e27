//! Lightweight style analysis used to pick an upscaling model.
//!
//! Illustrations tend to combine many hard edges with flat, uniform colour,
//! so a high edge density together with a narrow saturation spread is taken
//! as a hint that the illustration model will do better than the photo model.

use image::imageops::grayscale;
use image::RgbImage;
use imageproc::edges::canny;
use serde::Serialize;

const CANNY_LOW: f32 = 100.0;
const CANNY_HIGH: f32 = 200.0;
const ILLUSTRATION_MIN_EDGE_DENSITY: f64 = 0.1;
const ILLUSTRATION_MAX_SATURATION_STD: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StyleHint {
    /// Share of pixels that are Canny edges
    pub edge_density: f64,
    /// Standard deviation of HSV saturation on a 0-255 scale
    pub saturation_std: f64,
    pub is_illustration: bool,
}

pub fn analyze_style(image: &RgbImage) -> StyleHint {
    let pixel_count = (image.width() as u64 * image.height() as u64).max(1) as f64;

    let edges = canny(&grayscale(image), CANNY_LOW, CANNY_HIGH);
    let edge_pixels = edges.pixels().filter(|p| p.0[0] > 0).count();
    let edge_density = edge_pixels as f64 / pixel_count;

    let saturation_std = saturation_std(image);

    StyleHint {
        edge_density,
        saturation_std,
        is_illustration: looks_like_illustration(edge_density, saturation_std),
    }
}

pub fn looks_like_illustration(edge_density: f64, saturation_std: f64) -> bool {
    edge_density > ILLUSTRATION_MIN_EDGE_DENSITY && saturation_std < ILLUSTRATION_MAX_SATURATION_STD
}

fn saturation_std(image: &RgbImage) -> f64 {
    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    let mut count = 0u64;

    for pixel in image.pixels() {
        let [r, g, b] = pixel.0;
        let max = r.max(g).max(b) as f64;
        let min = r.min(g).min(b) as f64;
        let saturation = if max == 0.0 {
            0.0
        } else {
            (max - min) / max * 255.0
        };
        sum += saturation;
        sum_sq += saturation * saturation;
        count += 1;
    }

    if count == 0 {
        return 0.0;
    }
    let mean = sum / count as f64;
    ((sum_sq / count as f64) - mean * mean).max(0.0).sqrt()
}
