//! Alignment engine
//!
//! Per tick: extract frame features, k-NN match against the template
//! descriptors, filter with the ratio test, estimate a robust homography, and
//! rectify the frame into the template's canonical space. Any failure aborts
//! the tick before region verification.

use image::GrayImage;
use thiserror::Error;
use tracing::debug;

use crate::program::{TemplateParams, TemplateReference};
use crate::vision::{Correspondence, Homography, VisionStack};

/// Minimum accepted correspondences before estimation is attempted. A fixed
/// sample-size floor, not a per-program tunable.
pub const MIN_CORRESPONDENCES: usize = 12;

/// Why a tick could not be aligned. The empty-descriptor cases are reported
/// separately from the matching cases so operators can tell a blank scene
/// from a scene that simply does not contain the template.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AlignmentFailure {
    #[error("template has no descriptors")]
    EmptyTemplate,
    #[error("frame produced no descriptors")]
    EmptyFrame,
    #[error("{accepted} correspondences after ratio test, need at least {min}")]
    TooFewCorrespondences { accepted: usize, min: usize },
    #[error("no homography found from {accepted} correspondences")]
    NoHomography { accepted: usize },
}

/// Outcome of a successful alignment. Transient; never persisted.
#[derive(Debug, Clone)]
pub struct AlignmentResult {
    /// Frame-to-template transform.
    pub homography: Homography,
    /// Correspondences that survived the ratio test.
    pub accepted: usize,
    /// Correspondences the estimator kept as inliers.
    pub inliers: usize,
}

/// A successful alignment plus the rectified frame.
#[derive(Debug)]
pub struct Aligned {
    pub result: AlignmentResult,
    pub rectified: GrayImage,
}

/// Align a frame against the calibrated template.
pub fn align(
    frame: &GrayImage,
    template: &TemplateReference,
    params: &TemplateParams,
    stack: &VisionStack,
) -> Result<Aligned, AlignmentFailure> {
    if template.features.is_empty() {
        return Err(AlignmentFailure::EmptyTemplate);
    }

    let frame_features = stack.extractor.extract(frame, params.nfeatures);
    if frame_features.is_empty() {
        return Err(AlignmentFailure::EmptyFrame);
    }

    let matches = stack
        .matcher
        .knn_match(&template.features, &frame_features, 2);

    // Lowe ratio test: keep a correspondence only when the best match is
    // clearly better than the runner-up.
    let mut correspondences = Vec::new();
    for ranked in &matches {
        if ranked.len() < 2 {
            continue;
        }
        let (first, second) = (&ranked[0], &ranked[1]);
        if (first.distance as f32) < params.ratio_test * second.distance as f32 {
            let tpl = template.features.keypoints[first.query];
            let frm = frame_features.keypoints[first.train];
            correspondences.push(Correspondence {
                frame: (frm.x, frm.y),
                template: (tpl.x, tpl.y),
            });
        }
    }

    let accepted = correspondences.len();
    if accepted < MIN_CORRESPONDENCES {
        return Err(AlignmentFailure::TooFewCorrespondences {
            accepted,
            min: MIN_CORRESPONDENCES,
        });
    }

    let fit = stack
        .estimator
        .estimate(&correspondences, params.ransac)
        .ok_or(AlignmentFailure::NoHomography { accepted })?;
    let inliers = fit.inlier_count();
    debug!(accepted, inliers, "alignment homography estimated");

    let rectified = stack
        .warper
        .warp(frame, &fit.homography, params.w, params.h);

    Ok(Aligned {
        result: AlignmentResult {
            homography: fit.homography,
            accepted,
            inliers,
        },
        rectified,
    })
}
