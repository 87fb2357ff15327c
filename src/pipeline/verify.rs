//! Region verifier
//!
//! Walks the ROI list in order over the rectified frame. Every local failure
//! (crop out of bounds, undecodable golden payload, failed barcode decode)
//! becomes a false verdict for that region only; the remaining regions are
//! still verified and the tick completes.

use image::GrayImage;
use tracing::debug;

use crate::geometry::PixelRect;
use crate::program::{golden, Roi, RoiKind, TemplateParams};
use crate::vision::VisionStack;

/// Verdict for one region. Ordered with its siblings exactly as the ROI list
/// is ordered; consumed by the display collaborator, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoiVerdict {
    pub roi_id: String,
    /// Region rectangle in rectified (template) pixel space.
    pub rect: PixelRect,
    pub passed: bool,
}

/// Verify every ROI against the rectified frame, in list order.
pub async fn verify_rois(
    rectified: &GrayImage,
    rois: &[Roi],
    params: &TemplateParams,
    stack: &VisionStack,
) -> Vec<RoiVerdict> {
    let mut verdicts = Vec::with_capacity(rois.len());
    for roi in rois {
        let rect = roi.rect_norm.denormalize(params.w, params.h);
        let passed = verify_one(rectified, roi, rect, stack).await;
        debug!(roi = %roi.id, passed, "region verified");
        verdicts.push(RoiVerdict {
            roi_id: roi.id.clone(),
            rect,
            passed,
        });
    }
    verdicts
}

async fn verify_one(
    rectified: &GrayImage,
    roi: &Roi,
    rect: PixelRect,
    stack: &VisionStack,
) -> bool {
    let (w, h) = rectified.dimensions();
    let Some(clipped) = rect.clip_to(w, h) else {
        debug!(roi = %roi.id, "region rectangle outside rectified frame");
        return false;
    };
    let crop =
        image::imageops::crop_imm(rectified, clipped.x, clipped.y, clipped.w, clipped.h)
            .to_image();

    match roi.kind {
        RoiKind::Template => verify_template(&crop, roi, stack),
        RoiKind::Barcode => verify_barcode(&crop, roi, stack).await,
    }
}

fn verify_template(crop: &GrayImage, roi: &Roi, stack: &VisionStack) -> bool {
    let Some(payload) = roi.golden_data.as_deref() else {
        debug!(roi = %roi.id, "TEMPLATE region has no golden snapshot");
        return false;
    };
    let golden = match golden::decode_golden(payload) {
        Ok(img) => img,
        Err(err) => {
            debug!(roi = %roi.id, %err, "golden snapshot undecodable");
            return false;
        }
    };
    let threshold = roi
        .ok_threshold
        .unwrap_or(crate::program::DEFAULT_OK_THRESHOLD);
    let score = stack.scorer.score(crop, &golden);
    // Boundary inclusive: a score exactly at the threshold passes.
    score >= threshold
}

async fn verify_barcode(crop: &GrayImage, roi: &Roi, stack: &VisionStack) -> bool {
    let allowed = roi.symbologies.as_deref().unwrap_or(&[]);
    let Some(decoded) = stack.decoder.decode(crop, allowed).await else {
        return false;
    };
    // Re-check the decoded format; the decoder is not trusted to honor the
    // restriction on its own.
    if !allowed.is_empty() && !allowed.contains(&decoded.symbology) {
        debug!(roi = %roi.id, symbology = ?decoded.symbology, "decoded symbology not allowed");
        return false;
    }
    match roi.expected_text.as_deref() {
        None | Some("") => true,
        Some(expected) => decoded.text == expected,
    }
}
