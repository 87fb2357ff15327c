//! Rectangle spaces used by calibration and inspection
//!
//! Three coordinate spaces appear in the pipeline: the camera frame (pixels),
//! the template's canonical space (pixels, origin at the template crop), and
//! normalized template space where every ROI lives as fractions of the
//! template extent. Normalized rectangles are always clamped to [0,1] with
//! non-negative width and height.

use serde::{Deserialize, Serialize};

/// Axis-aligned rectangle in integer pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl PixelRect {
    pub fn new(x: u32, y: u32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }

    /// Whether the rectangle has any area.
    pub fn is_empty(&self) -> bool {
        self.w == 0 || self.h == 0
    }

    /// Intersect with an image of the given dimensions. Returns `None` when
    /// nothing of the rectangle remains inside the image.
    pub fn clip_to(&self, width: u32, height: u32) -> Option<PixelRect> {
        if self.x >= width || self.y >= height {
            return None;
        }
        let w = self.w.min(width - self.x);
        let h = self.h.min(height - self.y);
        if w == 0 || h == 0 {
            return None;
        }
        Some(PixelRect::new(self.x, self.y, w, h))
    }
}

/// In-progress selection rectangle in frame coordinates, as produced by a
/// pointer drag. Kept in floating point until it is committed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DragRect {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl DragRect {
    /// Build a drag rectangle from two corner points in any order.
    pub fn from_corners(start: (f32, f32), end: (f32, f32)) -> Self {
        Self {
            x: start.0.min(end.0),
            y: start.1.min(end.1),
            w: (end.0 - start.0).abs(),
            h: (end.1 - start.1).abs(),
        }
    }

    /// Round to whole pixels for cropping.
    pub fn to_pixel_rect(&self) -> PixelRect {
        PixelRect::new(
            self.x.max(0.0).round() as u32,
            self.y.max(0.0).round() as u32,
            self.w.max(0.0).round() as u32,
            self.h.max(0.0).round() as u32,
        )
    }
}

impl From<PixelRect> for DragRect {
    fn from(r: PixelRect) -> Self {
        Self {
            x: r.x as f32,
            y: r.y as f32,
            w: r.w as f32,
            h: r.h as f32,
        }
    }
}

/// ROI rectangle normalized to the template extent, every component in [0,1].
///
/// The clamp is applied on every construction path, including deserialization,
/// so a `NormRect` read from a document upholds the same invariant as one
/// produced by calibration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 4]", into = "[f32; 4]")]
pub struct NormRect {
    x: f32,
    y: f32,
    w: f32,
    h: f32,
}

impl NormRect {
    /// Construct with each component clamped to [0,1].
    pub fn clamped(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self {
            x: x.clamp(0.0, 1.0),
            y: y.clamp(0.0, 1.0),
            w: w.clamp(0.0, 1.0),
            h: h.clamp(0.0, 1.0),
        }
    }

    /// Convert a frame-space rectangle into normalized template space by
    /// subtracting the template origin and dividing by the template extent.
    pub fn from_frame_rect(rect: DragRect, template_box: PixelRect) -> Self {
        let tw = template_box.w.max(1) as f32;
        let th = template_box.h.max(1) as f32;
        Self::clamped(
            (rect.x - template_box.x as f32) / tw,
            (rect.y - template_box.y as f32) / th,
            rect.w / tw,
            rect.h / th,
        )
    }

    pub fn x(&self) -> f32 {
        self.x
    }

    pub fn y(&self) -> f32 {
        self.y
    }

    pub fn w(&self) -> f32 {
        self.w
    }

    pub fn h(&self) -> f32 {
        self.h
    }

    /// Map back to pixel coordinates against a template of the given size.
    ///
    /// Pure function of its inputs: the same rectangle and template extent
    /// always produce the same pixel rectangle.
    pub fn denormalize(&self, width: u32, height: u32) -> PixelRect {
        PixelRect::new(
            (self.x * width as f32).round() as u32,
            (self.y * height as f32).round() as u32,
            (self.w * width as f32).round() as u32,
            (self.h * height as f32).round() as u32,
        )
    }
}

impl From<[f32; 4]> for NormRect {
    fn from(v: [f32; 4]) -> Self {
        Self::clamped(v[0], v[1], v[2], v[3])
    }
}

impl From<NormRect> for [f32; 4] {
    fn from(r: NormRect) -> Self {
        [r.x, r.y, r.w, r.h]
    }
}
