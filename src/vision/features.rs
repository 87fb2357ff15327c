//! Corner detection and binary description
//!
//! Segment-test corner detector with a fixed 256-pair intensity-comparison
//! descriptor sampled from a box-smoothed patch. Deliberately not a full ORB:
//! no orientation estimation, no scale pyramid. Sufficient to register a
//! planar template under moderate perspective change, and replaceable through
//! the `FeatureExtractor` contract when something stronger is needed.

use image::GrayImage;

use super::{DescriptorSet, FeatureExtractor, KeyPoint, DESCRIPTOR_BYTES};

/// Bresenham circle of radius 3 around the candidate pixel, in ring order.
const CIRCLE: [(i32, i32); 16] = [
    (0, -3),
    (1, -3),
    (2, -2),
    (3, -1),
    (3, 0),
    (3, 1),
    (2, 2),
    (1, 3),
    (0, 3),
    (-1, 3),
    (-2, 2),
    (-3, 1),
    (-3, 0),
    (-3, -1),
    (-2, -2),
    (-1, -3),
];

/// Contiguous arc length required for a corner.
const SEGMENT_LEN: usize = 9;

/// Keypoints closer than this to the border cannot be described.
const PATCH_MARGIN: i32 = 15;

/// Half-extent of the descriptor sampling pattern. Leaves room for the 5x5
/// smoothing window inside `PATCH_MARGIN`.
const PATTERN_RADIUS: u32 = 13;

/// Segment-test corner extractor with binary patch descriptors.
pub struct FastExtractor {
    threshold: i16,
    /// 256 comparison pairs (x1, y1, x2, y2), fixed at construction so that
    /// descriptors stay comparable across template and frame extractions.
    pattern: Vec<[i32; 4]>,
}

impl FastExtractor {
    pub fn new(threshold: u8) -> Self {
        Self {
            threshold: threshold as i16,
            pattern: sampling_pattern(),
        }
    }
}

impl Default for FastExtractor {
    fn default() -> Self {
        Self::new(20)
    }
}

impl FeatureExtractor for FastExtractor {
    fn extract(&self, image: &GrayImage, budget: usize) -> DescriptorSet {
        let (w, h) = image.dimensions();
        if budget == 0 || w <= 2 * PATCH_MARGIN as u32 || h <= 2 * PATCH_MARGIN as u32 {
            return DescriptorSet::default();
        }

        // Corner response over the describable interior.
        let mut scores = vec![0f32; (w * h) as usize];
        for y in PATCH_MARGIN..(h as i32 - PATCH_MARGIN) {
            for x in PATCH_MARGIN..(w as i32 - PATCH_MARGIN) {
                scores[(y as u32 * w + x as u32) as usize] =
                    self.corner_score(image, x, y);
            }
        }

        // 3x3 non-maximum suppression.
        let mut candidates = Vec::new();
        for y in PATCH_MARGIN..(h as i32 - PATCH_MARGIN) {
            for x in PATCH_MARGIN..(w as i32 - PATCH_MARGIN) {
                let s = scores[(y as u32 * w + x as u32) as usize];
                if s <= 0.0 {
                    continue;
                }
                let mut is_max = true;
                'nbr: for dy in -1..=1i32 {
                    for dx in -1..=1i32 {
                        if dx == 0 && dy == 0 {
                            continue;
                        }
                        let n = scores[((y + dy) as u32 * w + (x + dx) as u32) as usize];
                        if n > s || (n == s && (dy < 0 || (dy == 0 && dx < 0))) {
                            is_max = false;
                            break 'nbr;
                        }
                    }
                }
                if is_max {
                    candidates.push(KeyPoint {
                        x: x as f32,
                        y: y as f32,
                        response: s,
                    });
                }
            }
        }

        candidates.sort_by(|a, b| b.response.total_cmp(&a.response));
        candidates.truncate(budget);

        let smoothed = Smoothed::new(image);
        let descriptors = candidates
            .iter()
            .map(|kp| self.describe(&smoothed, kp.x as i32, kp.y as i32))
            .collect();

        DescriptorSet {
            keypoints: candidates,
            descriptors,
        }
    }
}

impl FastExtractor {
    /// Segment-test response: zero when the pixel is not a corner, otherwise
    /// the summed contrast of the circle pixels beyond the threshold.
    fn corner_score(&self, image: &GrayImage, x: i32, y: i32) -> f32 {
        let center = image.get_pixel(x as u32, y as u32).0[0] as i16;
        let mut brighter = 0u16;
        let mut darker = 0u16;
        let mut contrast = 0i32;

        for (i, (dx, dy)) in CIRCLE.iter().enumerate() {
            let v = image.get_pixel((x + dx) as u32, (y + dy) as u32).0[0] as i16;
            let d = v - center;
            if d > self.threshold {
                brighter |= 1 << i;
                contrast += (d - self.threshold) as i32;
            } else if d < -self.threshold {
                darker |= 1 << i;
                contrast += (-d - self.threshold) as i32;
            }
        }

        if has_arc(brighter) || has_arc(darker) {
            contrast as f32
        } else {
            0.0
        }
    }

    fn describe(&self, smoothed: &Smoothed, x: i32, y: i32) -> [u8; DESCRIPTOR_BYTES] {
        let mut desc = [0u8; DESCRIPTOR_BYTES];
        for (i, [x1, y1, x2, y2]) in self.pattern.iter().enumerate() {
            let a = smoothed.mean5(x + x1, y + y1);
            let b = smoothed.mean5(x + x2, y + y2);
            if a < b {
                desc[i / 8] |= 1 << (i % 8);
            }
        }
        desc
    }
}

/// Whether the 16-bit ring mask contains `SEGMENT_LEN` contiguous set bits,
/// wrapping around.
fn has_arc(mask: u16) -> bool {
    if mask == 0 {
        return false;
    }
    let doubled = (mask as u32) | ((mask as u32) << 16);
    for start in 0..16 {
        let window = (doubled >> start) & ((1 << SEGMENT_LEN) - 1);
        if window == (1 << SEGMENT_LEN) - 1 {
            return true;
        }
    }
    false
}

/// Integral-image view for 5x5 box means, used only inside the descriptor
/// patch where all samples are in bounds.
struct Smoothed {
    // u64 so the running sum cannot overflow on large bright frames.
    integral: Vec<u64>,
    width: u32,
}

impl Smoothed {
    fn new(image: &GrayImage) -> Self {
        let (w, h) = image.dimensions();
        let stride = (w + 1) as usize;
        let mut integral = vec![0u64; stride * (h + 1) as usize];
        for y in 0..h {
            let mut row = 0u64;
            for x in 0..w {
                row += image.get_pixel(x, y).0[0] as u64;
                integral[(y as usize + 1) * stride + x as usize + 1] =
                    integral[y as usize * stride + x as usize + 1] + row;
            }
        }
        Self { integral, width: w }
    }

    fn mean5(&self, x: i32, y: i32) -> u64 {
        let stride = (self.width + 1) as usize;
        let x0 = (x - 2) as usize;
        let y0 = (y - 2) as usize;
        let x1 = (x + 3) as usize;
        let y1 = (y + 3) as usize;
        let sum = self.integral[y1 * stride + x1] + self.integral[y0 * stride + x0]
            - self.integral[y0 * stride + x1]
            - self.integral[y1 * stride + x0];
        sum / 25
    }
}

/// Fixed comparison pattern, generated once from a constant seed so that all
/// extractors in a process (and across processes) agree on it.
fn sampling_pattern() -> Vec<[i32; 4]> {
    let mut state = 0x9E37_79B9u32;
    let mut next_coord = move || {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        (state % (2 * PATTERN_RADIUS + 1)) as i32 - PATTERN_RADIUS as i32
    };
    (0..DESCRIPTOR_BYTES * 8)
        .map(|_| [next_coord(), next_coord(), next_coord(), next_coord()])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn checker(width: u32, height: u32, cell: u32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| {
            if ((x / cell) + (y / cell)) % 2 == 0 {
                Luma([230u8])
            } else {
                Luma([20u8])
            }
        })
    }

    #[test]
    fn flat_image_yields_no_features() {
        let img = GrayImage::from_pixel(100, 100, Luma([128u8]));
        let set = FastExtractor::default().extract(&img, 500);
        assert!(set.is_empty());
    }

    #[test]
    fn checkerboard_yields_corners() {
        let img = checker(120, 120, 20);
        let set = FastExtractor::default().extract(&img, 500);
        assert!(!set.is_empty(), "expected corners on a checkerboard");
        assert_eq!(set.keypoints.len(), set.descriptors.len());
    }

    #[test]
    fn budget_is_honored() {
        let img = checker(160, 160, 10);
        let set = FastExtractor::default().extract(&img, 7);
        assert!(set.len() <= 7);
    }

    #[test]
    fn keypoints_stay_inside_descriptor_margin() {
        let img = checker(120, 120, 20);
        let set = FastExtractor::default().extract(&img, 500);
        for kp in &set.keypoints {
            assert!(kp.x >= PATCH_MARGIN as f32 && kp.x < (120 - PATCH_MARGIN) as f32);
            assert!(kp.y >= PATCH_MARGIN as f32 && kp.y < (120 - PATCH_MARGIN) as f32);
        }
    }

    #[test]
    fn descriptors_are_reproducible() {
        let img = checker(120, 120, 20);
        let a = FastExtractor::default().extract(&img, 50);
        let b = FastExtractor::default().extract(&img, 50);
        assert_eq!(a.descriptors, b.descriptors);
    }

    #[test]
    fn tiny_image_yields_nothing() {
        let img = checker(20, 20, 5);
        let set = FastExtractor::default().extract(&img, 100);
        assert!(set.is_empty());
    }

    #[test]
    fn integral_survives_large_bright_images() {
        // Enough white pixels that a 32-bit running sum would wrap.
        let img = GrayImage::from_pixel(4200, 4100, Luma([255u8]));
        let smoothed = Smoothed::new(&img);
        assert_eq!(smoothed.mean5(2100, 2050), 255);
        assert_eq!(smoothed.mean5(4190, 4090), 255);
    }

    #[test]
    fn arc_detection_wraps_around() {
        // Bits 12..16 and 0..4 set: a 9-long arc across the wrap point.
        let mask = 0b1111_0000_0000_1111u16 | (1 << 4);
        assert!(has_arc(mask));
        assert!(!has_arc(0b0000_0000_1111_0000));
    }
}
