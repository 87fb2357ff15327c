//! Frame data for the inspection tick loop

use image::GrayImage;
use std::time::Instant;

/// A single-channel frame as consumed by the pipeline.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: GrayImage,
    /// When the frame was acquired (or retained, for frozen frames).
    pub timestamp: Instant,
}

impl Frame {
    pub fn new(image: GrayImage) -> Self {
        Self {
            image,
            timestamp: Instant::now(),
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}
