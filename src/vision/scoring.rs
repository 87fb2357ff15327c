//! Appearance scoring for TEMPLATE regions
//!
//! Zero-mean normalized cross-correlation between a rectified crop and its
//! golden snapshot. Calibration and runtime denormalize the same rectangle,
//! so the two images normally have identical dimensions; when they differ by
//! a pixel or two the golden slides over the crop and the best position wins.

use image::GrayImage;

use super::RegionScorer;

pub struct NccScorer;

impl RegionScorer for NccScorer {
    fn score(&self, crop: &GrayImage, golden: &GrayImage) -> f32 {
        let (cw, ch) = crop.dimensions();
        let (gw, gh) = golden.dimensions();
        if gw == 0 || gh == 0 || gw > cw || gh > ch {
            return 0.0;
        }

        let mut best = 0.0f32;
        for y in 0..=(ch - gh) {
            for x in 0..=(cw - gw) {
                let score = zncc(crop, golden, x, y);
                if score > best {
                    best = score;
                }
            }
        }
        best
    }
}

/// Zero-mean normalized cross-correlation of `template` against the region of
/// `image` at (x, y), clamped to [0,1].
fn zncc(image: &GrayImage, template: &GrayImage, x: u32, y: u32) -> f32 {
    let (tw, th) = template.dimensions();

    let mut sum_it = 0.0f64;
    let mut sum_i2 = 0.0f64;
    let mut sum_t2 = 0.0f64;
    let mut sum_i = 0.0f64;
    let mut sum_t = 0.0f64;
    let count = (tw * th) as f64;

    for ty in 0..th {
        for tx in 0..tw {
            let iv = image.get_pixel(x + tx, y + ty).0[0] as f64;
            let tv = template.get_pixel(tx, ty).0[0] as f64;
            sum_it += iv * tv;
            sum_i2 += iv * iv;
            sum_t2 += tv * tv;
            sum_i += iv;
            sum_t += tv;
        }
    }

    let mean_i = sum_i / count;
    let mean_t = sum_t / count;

    let numerator = sum_it - count * mean_i * mean_t;
    let denom_i = (sum_i2 - count * mean_i * mean_i).max(0.0).sqrt();
    let denom_t = (sum_t2 - count * mean_t * mean_t).max(0.0).sqrt();
    let denominator = denom_i * denom_t;

    if denominator < 1e-10 {
        return 0.0;
    }

    (numerator / denominator).clamp(0.0, 1.0) as f32
}
