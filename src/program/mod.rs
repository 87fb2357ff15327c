//! Calibration model
//!
//! A `Program` is the persisted definition of one inspection task: template
//! parameters, the ordered ROI list, and the NG policy. The calibrated
//! reference imagery itself lives in `TemplateReference`, which is owned by
//! the session and rebuilt atomically whenever the template is redefined.

pub mod golden;

use image::GrayImage;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geometry::NormRect;
use crate::vision::{DescriptorSet, FeatureExtractor, Symbology};

/// Default feature budget for template and frame extraction.
pub const DEFAULT_NFEATURES: usize = 800;
/// Default Lowe ratio-test threshold.
pub const DEFAULT_RATIO_TEST: f32 = 0.75;
/// Default RANSAC reprojection threshold, in template pixels.
pub const DEFAULT_RANSAC: f64 = 3.0;
/// Default pass threshold for TEMPLATE regions.
pub const DEFAULT_OK_THRESHOLD: f32 = 0.85;

/// The persisted inspection definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Program {
    pub id: String,
    pub name: String,
    pub template: TemplateParams,
    pub rois: Vec<Roi>,
    pub ng_policy: NgPolicy,
}

impl Program {
    /// Fresh program for a newly calibrated template, with an empty ROI list.
    pub fn new(template: TemplateParams) -> Self {
        Self {
            id: format!("program_{}", Uuid::new_v4().simple()),
            name: "Program".to_string(),
            template,
            rois: Vec::new(),
            ng_policy: NgPolicy::AnyRoiFails,
        }
    }
}

/// Template dimensions and pipeline tuning parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateParams {
    pub w: u32,
    pub h: u32,
    pub nfeatures: usize,
    pub ratio_test: f32,
    pub ransac: f64,
}

impl TemplateParams {
    pub fn for_size(w: u32, h: u32) -> Self {
        Self {
            w,
            h,
            nfeatures: DEFAULT_NFEATURES,
            ratio_test: DEFAULT_RATIO_TEST,
            ransac: DEFAULT_RANSAC,
        }
    }
}

/// How ROI verdicts combine into the aggregate. Only `AnyRoiFails` (logical
/// AND of all verdicts) is implemented; the field exists so future policies
/// do not reshape the document schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NgPolicy {
    #[serde(rename = "ANY_ROI_FAILS")]
    AnyRoiFails,
}

/// Inspection region kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoiKind {
    #[serde(rename = "TEMPLATE")]
    Template,
    #[serde(rename = "BARCODE")]
    Barcode,
}

/// One inspection region, normalized to the template extent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Roi {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: RoiKind,
    pub rect_norm: NormRect,
    /// TEMPLATE only: minimum passing score, boundary inclusive.
    pub ok_threshold: Option<f32>,
    /// BARCODE only: accepted symbologies; empty or absent accepts any.
    pub symbologies: Option<Vec<Symbology>>,
    /// BARCODE only: required decoded text; empty accepts any.
    pub expected_text: Option<String>,
    /// TEMPLATE only: base64 PNG snapshot of the template crop captured at
    /// calibration time. Immutable once set.
    pub golden_data: Option<String>,
}

impl Roi {
    pub fn new_template(rect_norm: NormRect, ok_threshold: f32, golden_data: String) -> Self {
        Self {
            id: new_roi_id(),
            kind: RoiKind::Template,
            rect_norm,
            ok_threshold: Some(ok_threshold),
            symbologies: None,
            expected_text: None,
            golden_data: Some(golden_data),
        }
    }

    pub fn new_barcode(
        rect_norm: NormRect,
        symbologies: Vec<Symbology>,
        expected_text: String,
    ) -> Self {
        Self {
            id: new_roi_id(),
            kind: RoiKind::Barcode,
            rect_norm,
            ok_threshold: None,
            symbologies: Some(symbologies),
            expected_text: Some(expected_text),
            golden_data: None,
        }
    }
}

fn new_roi_id() -> String {
    format!("roi_{}", Uuid::new_v4().simple())
}

/// The calibrated reference image and its descriptor set.
///
/// Always constructed whole and swapped in as one value, so a pipeline tick
/// can never observe an old image with new descriptors or vice versa.
#[derive(Debug, Clone)]
pub struct TemplateReference {
    pub image: GrayImage,
    pub features: DescriptorSet,
}

impl TemplateReference {
    pub fn calibrate(image: GrayImage, extractor: &dyn FeatureExtractor, budget: usize) -> Self {
        let features = extractor.extract(&image, budget);
        Self { image, features }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_program_has_no_rois() {
        let p = Program::new(TemplateParams::for_size(200, 150));
        assert!(p.rois.is_empty());
        assert_eq!(p.ng_policy, NgPolicy::AnyRoiFails);
        assert_eq!(p.template.w, 200);
        assert_eq!(p.template.h, 150);
        assert_eq!(p.template.nfeatures, DEFAULT_NFEATURES);
    }

    #[test]
    fn program_ids_are_unique() {
        let a = Program::new(TemplateParams::for_size(10, 10));
        let b = Program::new(TemplateParams::for_size(10, 10));
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn roi_serializes_with_document_field_names() {
        let roi = Roi::new_template(
            NormRect::clamped(0.1, 0.2, 0.3, 0.4),
            DEFAULT_OK_THRESHOLD,
            "Zm9v".to_string(),
        );
        let json = serde_json::to_value(&roi).unwrap();
        assert_eq!(json["type"], "TEMPLATE");
        assert!(json["rectNorm"].is_array());
        assert_eq!(json["okThreshold"], 0.85);
        assert_eq!(json["goldenData"], "Zm9v");
    }

    #[test]
    fn barcode_roi_carries_symbologies_and_expected_text() {
        let roi = Roi::new_barcode(
            NormRect::clamped(0.0, 0.0, 0.5, 0.5),
            crate::vision::default_symbologies(),
            "ABC123".to_string(),
        );
        let json = serde_json::to_value(&roi).unwrap();
        assert_eq!(json["type"], "BARCODE");
        assert_eq!(json["expectedText"], "ABC123");
        assert_eq!(json["symbologies"][0], "QR_CODE");
        assert!(json["goldenData"].is_null());
    }

    #[test]
    fn ng_policy_wire_name() {
        assert_eq!(
            serde_json::to_string(&NgPolicy::AnyRoiFails).unwrap(),
            "\"ANY_ROI_FAILS\""
        );
    }
}
