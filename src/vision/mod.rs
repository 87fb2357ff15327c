//! Vision capability layer
//!
//! The inspection pipeline consumes a small set of capability contracts:
//! feature extraction, descriptor matching, homography estimation, image
//! warping, region scoring, and barcode decoding. Built-in adapters cover
//! everything except barcode decoding, which ships as a placeholder until a
//! real decoder is wired in.

pub mod barcode;
pub mod features;
pub mod homography;
pub mod matching;
pub mod scoring;

#[cfg(test)]
pub mod fakes;

use async_trait::async_trait;
use image::GrayImage;

pub use barcode::{default_symbologies, DecodedBarcode, Symbology, UnsupportedBarcodeDecoder};
pub use features::FastExtractor;
pub use homography::{Homography, HomographyFit, PerspectiveWarper, RansacHomography};
pub use matching::HammingMatcher;
pub use scoring::NccScorer;

/// Number of bytes in one binary descriptor (256 bits).
pub const DESCRIPTOR_BYTES: usize = 32;

/// A detected feature point in image coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyPoint {
    pub x: f32,
    pub y: f32,
    /// Detector response, used to rank keypoints against the feature budget.
    pub response: f32,
}

/// Keypoints plus their binary descriptors, index-aligned.
#[derive(Debug, Clone, Default)]
pub struct DescriptorSet {
    pub keypoints: Vec<KeyPoint>,
    pub descriptors: Vec<[u8; DESCRIPTOR_BYTES]>,
}

impl DescriptorSet {
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

/// One ranked match candidate from a k-NN query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KnnPair {
    /// Index into the query descriptor set.
    pub query: usize,
    /// Index into the train descriptor set.
    pub train: usize,
    /// Hamming distance between the two descriptors.
    pub distance: u32,
}

/// A matched point pair that survived correspondence filtering.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correspondence {
    /// Point in the live frame.
    pub frame: (f32, f32),
    /// Point in the template's canonical space.
    pub template: (f32, f32),
}

/// Extracts keypoints and descriptors from a grayscale image, honoring a
/// feature budget (the extractor may return fewer, never more).
pub trait FeatureExtractor: Send {
    fn extract(&self, image: &GrayImage, budget: usize) -> DescriptorSet;
}

/// k-nearest-neighbor descriptor matching. Returns, per query descriptor, up
/// to `k` candidates ranked by ascending distance.
pub trait DescriptorMatcher: Send {
    fn knn_match(
        &self,
        query: &DescriptorSet,
        train: &DescriptorSet,
        k: usize,
    ) -> Vec<Vec<KnnPair>>;
}

/// Robust projective transform estimation with outlier rejection.
pub trait HomographyEstimator: Send {
    /// Estimate the frame-to-template homography. `reproj_threshold` is the
    /// maximum reprojection error (in template pixels) for an inlier.
    /// Returns `None` when no valid transform can be found.
    fn estimate(
        &self,
        correspondences: &[Correspondence],
        reproj_threshold: f64,
    ) -> Option<HomographyFit>;
}

/// Rectifies a frame into the template's canonical coordinate space.
pub trait ImageWarper: Send {
    fn warp(
        &self,
        image: &GrayImage,
        homography: &Homography,
        out_w: u32,
        out_h: u32,
    ) -> GrayImage;
}

/// Appearance similarity between a rectified crop and its golden snapshot,
/// in [0,1].
pub trait RegionScorer: Send {
    fn score(&self, crop: &GrayImage, golden: &GrayImage) -> f32;
}

/// Barcode decoding over a rectified crop. The one suspension point of the
/// tick loop: decoding latency is variable and the pipeline awaits it.
#[async_trait]
pub trait BarcodeDecoder: Send + Sync {
    /// Decode a symbol from the crop. `allowed` restricts the accepted
    /// symbologies; an empty slice accepts any. `None` means no symbol of an
    /// allowed symbology was found.
    async fn decode(&self, crop: &GrayImage, allowed: &[Symbology]) -> Option<DecodedBarcode>;
}

/// The bundle of capability adapters the pipeline runs against.
pub struct VisionStack {
    pub extractor: Box<dyn FeatureExtractor>,
    pub matcher: Box<dyn DescriptorMatcher>,
    pub estimator: Box<dyn HomographyEstimator>,
    pub warper: Box<dyn ImageWarper>,
    pub scorer: Box<dyn RegionScorer>,
    pub decoder: Box<dyn BarcodeDecoder>,
}

impl VisionStack {
    /// Stack of built-in adapters. Barcode decoding is a placeholder that
    /// fails every decode until a real decoder is substituted.
    pub fn builtin() -> Self {
        Self {
            extractor: Box::new(FastExtractor::default()),
            matcher: Box::new(HammingMatcher),
            estimator: Box::new(RansacHomography::default()),
            warper: Box::new(PerspectiveWarper),
            scorer: Box::new(NccScorer),
            decoder: Box::new(UnsupportedBarcodeDecoder),
        }
    }

    /// Replace the barcode decoder, keeping the rest of the stack.
    pub fn with_decoder(mut self, decoder: Box<dyn BarcodeDecoder>) -> Self {
        self.decoder = decoder;
        self
    }
}
