//! Barcode decoding contract types
//!
//! The decoder itself is an external capability; this module defines the
//! symbology vocabulary shared with program documents and a placeholder
//! decoder for stacks with no real one attached.

use async_trait::async_trait;
use image::GrayImage;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::BarcodeDecoder;

/// Barcode formats a BARCODE ROI may accept. Wire names follow the ZXing
/// conventions used in program documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Symbology {
    #[serde(rename = "QR_CODE")]
    QrCode,
    #[serde(rename = "EAN_13")]
    Ean13,
    #[serde(rename = "EAN_8")]
    Ean8,
    #[serde(rename = "CODE_128")]
    Code128,
    #[serde(rename = "CODE_39")]
    Code39,
    #[serde(rename = "UPC_A")]
    UpcA,
    #[serde(rename = "DATA_MATRIX")]
    DataMatrix,
    #[serde(rename = "PDF_417")]
    Pdf417,
    #[serde(rename = "ITF")]
    Itf,
}

/// Symbologies preselected for newly calibrated BARCODE ROIs.
pub fn default_symbologies() -> Vec<Symbology> {
    vec![Symbology::QrCode, Symbology::Ean13, Symbology::Code128]
}

/// A successfully decoded symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedBarcode {
    pub symbology: Symbology,
    pub text: String,
}

/// Decoder used when no real decoder is wired into the stack. Every decode
/// fails, so BARCODE ROIs verify as NG rather than erroring the tick.
pub struct UnsupportedBarcodeDecoder;

#[async_trait]
impl BarcodeDecoder for UnsupportedBarcodeDecoder {
    async fn decode(&self, _crop: &GrayImage, _allowed: &[Symbology]) -> Option<DecodedBarcode> {
        debug!("no barcode decoder attached, decode fails");
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbology_wire_names() {
        assert_eq!(
            serde_json::to_string(&Symbology::QrCode).unwrap(),
            "\"QR_CODE\""
        );
        assert_eq!(
            serde_json::to_string(&Symbology::Ean13).unwrap(),
            "\"EAN_13\""
        );
        assert_eq!(
            serde_json::to_string(&Symbology::Code128).unwrap(),
            "\"CODE_128\""
        );
        let back: Symbology = serde_json::from_str("\"PDF_417\"").unwrap();
        assert_eq!(back, Symbology::Pdf417);
    }

    #[test]
    fn default_set_matches_calibration_preset() {
        assert_eq!(
            default_symbologies(),
            vec![Symbology::QrCode, Symbology::Ean13, Symbology::Code128]
        );
    }

    #[tokio::test]
    async fn unsupported_decoder_always_fails() {
        let img = GrayImage::new(8, 8);
        let result = UnsupportedBarcodeDecoder.decode(&img, &[]).await;
        assert!(result.is_none());
    }
}
