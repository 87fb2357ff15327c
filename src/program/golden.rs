//! Golden snapshot payloads
//!
//! TEMPLATE regions carry the reference crop captured at calibration time as
//! a base64-encoded PNG, embedded directly in the program document so a saved
//! program is self-contained.

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::{GrayImage, ImageFormat};
use std::io::Cursor;

/// Encode a grayscale crop as a base64 PNG payload.
pub fn encode_golden(crop: &GrayImage) -> Result<String> {
    let mut bytes = Vec::new();
    image::DynamicImage::ImageLuma8(crop.clone())
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .context("failed to encode golden snapshot as PNG")?;
    Ok(STANDARD.encode(bytes))
}

/// Decode a golden payload back into a grayscale image.
pub fn decode_golden(data: &str) -> Result<GrayImage> {
    let bytes = STANDARD
        .decode(data)
        .context("golden payload is not valid base64")?;
    let img = image::load_from_memory(&bytes).context("golden payload is not a decodable image")?;
    Ok(img.to_luma8())
}
