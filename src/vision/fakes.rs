//! Test-only fake capability adapters
//!
//! Canned implementations of the vision contracts so pipeline and session
//! tests can drive specific correspondence counts, scores, and decode
//! outcomes without synthesizing imagery.

use async_trait::async_trait;
use image::GrayImage;

use super::{
    BarcodeDecoder, Correspondence, DecodedBarcode, DescriptorMatcher, DescriptorSet,
    FeatureExtractor, Homography, HomographyEstimator, HomographyFit, ImageWarper, KeyPoint,
    KnnPair, RegionScorer, Symbology, VisionStack, DESCRIPTOR_BYTES,
};

/// A descriptor set of `n` keypoints laid out on a diagonal-free grid, so no
/// three points are collinear for estimators that care.
pub fn grid_set(n: usize) -> DescriptorSet {
    let keypoints: Vec<KeyPoint> = (0..n)
        .map(|i| KeyPoint {
            x: (i % 5) as f32 * 37.0 + ((i / 5) % 3) as f32 * 3.0,
            y: (i / 5) as f32 * 29.0 + (i % 2) as f32 * 5.0,
            response: 1.0,
        })
        .collect();
    let descriptors = (0..n).map(|i| [i as u8; DESCRIPTOR_BYTES]).collect();
    DescriptorSet {
        keypoints,
        descriptors,
    }
}

/// Returns the same descriptor set for every image.
pub struct FakeExtractor(pub DescriptorSet);

impl FeatureExtractor for FakeExtractor {
    fn extract(&self, _image: &GrayImage, budget: usize) -> DescriptorSet {
        let mut set = self.0.clone();
        set.keypoints.truncate(budget);
        set.descriptors.truncate(budget);
        set
    }
}

/// Pairs query i with train i at a passing ratio for the first `accepted`
/// queries, and at a failing ratio for the rest.
pub struct FakeMatcher {
    pub accepted: usize,
}

impl DescriptorMatcher for FakeMatcher {
    fn knn_match(
        &self,
        query: &DescriptorSet,
        train: &DescriptorSet,
        _k: usize,
    ) -> Vec<Vec<KnnPair>> {
        (0..query.len())
            .map(|i| {
                if i >= train.len() {
                    return Vec::new();
                }
                let nearest = if i < self.accepted { 10 } else { 90 };
                vec![
                    KnnPair {
                        query: i,
                        train: i,
                        distance: nearest,
                    },
                    KnnPair {
                        query: i,
                        train: (i + 1) % train.len(),
                        distance: 100,
                    },
                ]
            })
            .collect()
    }
}

/// Always returns the identity transform with a full inlier mask.
pub struct IdentityEstimator;

impl HomographyEstimator for IdentityEstimator {
    fn estimate(
        &self,
        correspondences: &[Correspondence],
        _reproj_threshold: f64,
    ) -> Option<HomographyFit> {
        Some(HomographyFit {
            homography: Homography::identity(),
            inliers: vec![true; correspondences.len()],
        })
    }
}

/// Never finds a transform.
pub struct FailingEstimator;

impl HomographyEstimator for FailingEstimator {
    fn estimate(&self, _c: &[Correspondence], _t: f64) -> Option<HomographyFit> {
        None
    }
}

/// Copies the source into the output size, ignoring the homography. Pixels
/// beyond the source stay black.
pub struct CroppingWarper;

impl ImageWarper for CroppingWarper {
    fn warp(&self, image: &GrayImage, _h: &Homography, out_w: u32, out_h: u32) -> GrayImage {
        let mut out = GrayImage::new(out_w, out_h);
        let (w, h) = image.dimensions();
        for y in 0..out_h.min(h) {
            for x in 0..out_w.min(w) {
                out.put_pixel(x, y, *image.get_pixel(x, y));
            }
        }
        out
    }
}

/// Scores every comparison with the same value.
pub struct FixedScorer(pub f32);

impl RegionScorer for FixedScorer {
    fn score(&self, _crop: &GrayImage, _golden: &GrayImage) -> f32 {
        self.0
    }
}

/// Returns a canned decode, honoring the allowed-symbology restriction.
pub struct FakeDecoder(pub Option<DecodedBarcode>);

#[async_trait]
impl BarcodeDecoder for FakeDecoder {
    async fn decode(&self, _crop: &GrayImage, allowed: &[Symbology]) -> Option<DecodedBarcode> {
        let hit = self.0.clone()?;
        if !allowed.is_empty() && !allowed.contains(&hit.symbology) {
            return None;
        }
        Some(hit)
    }
}

/// A stack where alignment always succeeds over `n` correspondences and every
/// TEMPLATE region scores `score`.
pub fn aligned_stack(n: usize, score: f32, decode: Option<DecodedBarcode>) -> VisionStack {
    VisionStack {
        extractor: Box::new(FakeExtractor(grid_set(n))),
        matcher: Box::new(FakeMatcher { accepted: n }),
        estimator: Box::new(IdentityEstimator),
        warper: Box::new(CroppingWarper),
        scorer: Box::new(FixedScorer(score)),
        decoder: Box::new(FakeDecoder(decode)),
    }
}
