//! Per-tick inspection pipeline
//!
//! One tick runs sequentially: align the frame to the template, verify every
//! ROI over the rectified image, then aggregate. Alignment failure
//! short-circuits the tick to NG with no region verdicts; the next tick is
//! scheduled unconditionally either way.

pub mod align;
pub mod verify;

use image::GrayImage;
use tracing::debug;

pub use align::{align, Aligned, AlignmentFailure, AlignmentResult, MIN_CORRESPONDENCES};
pub use verify::{verify_rois, RoiVerdict};

use crate::program::{NgPolicy, Program, TemplateReference};
use crate::vision::VisionStack;

/// Aggregate outcome of one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Every configured region passed.
    Ok,
    /// Alignment failed or at least one region failed.
    Ng,
    /// The program has no regions configured. Reported distinctly instead of
    /// letting an empty AND read as a pass.
    NotConfigured,
}

/// Result of one tick. Transient; consumed by the display collaborator.
#[derive(Debug, Clone)]
pub struct InspectionResult {
    pub verdict: Verdict,
    /// Per-region verdicts in ROI list order. Empty when alignment failed or
    /// nothing is configured.
    pub roi_verdicts: Vec<RoiVerdict>,
    /// Populated when the tick failed before verification.
    pub alignment_failure: Option<AlignmentFailure>,
}

impl InspectionResult {
    pub fn not_configured() -> Self {
        Self {
            verdict: Verdict::NotConfigured,
            roi_verdicts: Vec::new(),
            alignment_failure: None,
        }
    }

    pub fn alignment_failed(failure: AlignmentFailure) -> Self {
        Self {
            verdict: Verdict::Ng,
            roi_verdicts: Vec::new(),
            alignment_failure: Some(failure),
        }
    }
}

/// Combine region verdicts under the program's NG policy. Requires at least
/// one verdict; the zero-ROI case is decided before aggregation.
pub fn aggregate(policy: NgPolicy, verdicts: &[RoiVerdict]) -> Verdict {
    match policy {
        NgPolicy::AnyRoiFails => {
            if verdicts.iter().all(|v| v.passed) {
                Verdict::Ok
            } else {
                Verdict::Ng
            }
        }
    }
}

/// Run one inspection tick over an already-acquired frame.
pub async fn run_tick(
    frame: &GrayImage,
    program: &Program,
    template: &TemplateReference,
    stack: &VisionStack,
) -> InspectionResult {
    if program.rois.is_empty() {
        return InspectionResult::not_configured();
    }

    let aligned = match align(frame, template, &program.template, stack) {
        Ok(aligned) => aligned,
        Err(failure) => {
            debug!(%failure, "tick alignment failed");
            return InspectionResult::alignment_failed(failure);
        }
    };

    let roi_verdicts =
        verify_rois(&aligned.rectified, &program.rois, &program.template, stack).await;
    let verdict = aggregate(program.ng_policy, &roi_verdicts);

    InspectionResult {
        verdict,
        roi_verdicts,
        alignment_failure: None,
    }
}
