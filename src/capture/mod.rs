//! Frame acquisition
//!
//! The pipeline pulls frames through the `FrameSource` contract. The actual
//! camera integration lives outside the core; what ships here is the freeze
//! wrapper used during calibration and a file-driven source for offline runs.

pub mod frame;

use std::path::Path;

use anyhow::{Context, Result};
use image::GrayImage;

pub use frame::Frame;

/// Supplies the current frame each tick.
pub trait FrameSource: Send {
    fn current(&mut self) -> Result<Frame>;
}

/// Wraps a source with a freeze flag. While frozen, the last captured frame
/// is served instead of a fresh one, so the operator can calibrate against
/// the still image they were already seeing; the tick cycle itself keeps
/// running.
pub struct FrozenSource {
    inner: Box<dyn FrameSource>,
    frozen: bool,
    /// Most recent frame pulled from the inner source.
    last: Option<Frame>,
}

impl FrozenSource {
    pub fn new(inner: Box<dyn FrameSource>) -> Self {
        Self {
            inner,
            frozen: false,
            last: None,
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn set_frozen(&mut self, frozen: bool) {
        self.frozen = frozen;
    }
}

impl FrameSource for FrozenSource {
    fn current(&mut self) -> Result<Frame> {
        if self.frozen {
            if let Some(last) = &self.last {
                return Ok(last.clone());
            }
        }
        let frame = self.inner.current()?;
        self.last = Some(frame.clone());
        Ok(frame)
    }
}

/// Cycles through a fixed list of images, one per tick. Used for offline
/// inspection runs driven from files.
pub struct ImageSequenceSource {
    frames: Vec<GrayImage>,
    cursor: usize,
}

impl ImageSequenceSource {
    pub fn from_paths<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        if paths.is_empty() {
            anyhow::bail!("no frame images given");
        }
        let mut frames = Vec::with_capacity(paths.len());
        for path in paths {
            let img = image::open(path.as_ref())
                .with_context(|| format!("failed to load frame {}", path.as_ref().display()))?
                .to_luma8();
            frames.push(img);
        }
        Ok(Self { frames, cursor: 0 })
    }

    pub fn from_images(frames: Vec<GrayImage>) -> Result<Self> {
        if frames.is_empty() {
            anyhow::bail!("no frame images given");
        }
        Ok(Self { frames, cursor: 0 })
    }
}

impl FrameSource for ImageSequenceSource {
    fn current(&mut self) -> Result<Frame> {
        let img = self.frames[self.cursor].clone();
        self.cursor = (self.cursor + 1) % self.frames.len();
        Ok(Frame::new(img))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    /// Source that brightens by one each pull, to observe freshness.
    struct CountingSource {
        level: u8,
    }

    impl FrameSource for CountingSource {
        fn current(&mut self) -> Result<Frame> {
            self.level = self.level.wrapping_add(1);
            Ok(Frame::new(GrayImage::from_pixel(4, 4, Luma([self.level]))))
        }
    }

    fn level(frame: &Frame) -> u8 {
        frame.image.get_pixel(0, 0).0[0]
    }

    #[test]
    fn unfrozen_source_serves_fresh_frames() {
        let mut src = FrozenSource::new(Box::new(CountingSource { level: 0 }));
        assert_eq!(level(&src.current().unwrap()), 1);
        assert_eq!(level(&src.current().unwrap()), 2);
    }

    #[test]
    fn frozen_source_holds_last_frame() {
        let mut src = FrozenSource::new(Box::new(CountingSource { level: 0 }));
        src.set_frozen(true);
        assert_eq!(level(&src.current().unwrap()), 1);
        assert_eq!(level(&src.current().unwrap()), 1);
        assert_eq!(level(&src.current().unwrap()), 1);
    }

    #[test]
    fn freezing_retains_frame_already_on_screen() {
        let mut src = FrozenSource::new(Box::new(CountingSource { level: 0 }));
        assert_eq!(level(&src.current().unwrap()), 1);
        assert_eq!(level(&src.current().unwrap()), 2);
        // Freeze keeps the buffer the operator was looking at, not the next
        // one the inner source would produce.
        src.set_frozen(true);
        assert_eq!(level(&src.current().unwrap()), 2);
        assert_eq!(level(&src.current().unwrap()), 2);
    }

    #[test]
    fn unfreezing_resumes_fresh_frames() {
        let mut src = FrozenSource::new(Box::new(CountingSource { level: 0 }));
        src.set_frozen(true);
        let _ = src.current().unwrap();
        src.set_frozen(false);
        assert_eq!(level(&src.current().unwrap()), 2);
        src.set_frozen(true);
        assert_eq!(level(&src.current().unwrap()), 2);
        assert_eq!(level(&src.current().unwrap()), 2);
    }

    #[test]
    fn image_sequence_cycles() {
        let a = GrayImage::from_pixel(2, 2, Luma([10u8]));
        let b = GrayImage::from_pixel(2, 2, Luma([20u8]));
        let mut src = ImageSequenceSource::from_images(vec![a, b]).unwrap();
        assert_eq!(level(&src.current().unwrap()), 10);
        assert_eq!(level(&src.current().unwrap()), 20);
        assert_eq!(level(&src.current().unwrap()), 10);
    }

    #[test]
    fn empty_sequence_is_rejected() {
        assert!(ImageSequenceSource::from_images(Vec::new()).is_err());
    }
}
