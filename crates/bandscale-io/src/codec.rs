//! Image decoding and encoding.
//!
//! Accepts raw image bytes (PNG, JPEG, BMP, WebP) and produces the
//! 3-channel HSV buffer the pipeline consumes. On the way out, HSV
//! buffers are converted back to RGB and encoded in whatever format the
//! caller or the output path's extension asks for.

use std::io::Cursor;
use std::path::Path;

use bandscale_pipeline::ImageBuffer;
use image::ImageFormat;
use log::debug;

use crate::IoError;
use crate::color::{hsv_to_rgb_image, rgb_image_to_hsv};

/// Decode raw image bytes into an HSV buffer.
///
/// Any alpha channel is dropped and grayscale inputs are expanded to
/// RGB before conversion.
///
/// # Errors
///
/// Returns [`IoError::EmptyInput`] if `bytes` is empty.
/// Returns [`IoError::ImageDecode`] if the image format is
/// unrecognized or the data is corrupt.
#[must_use = "returns the decoded HSV image"]
pub fn decode_hsv(bytes: &[u8]) -> Result<ImageBuffer<u8>, IoError> {
    if bytes.is_empty() {
        return Err(IoError::EmptyInput);
    }

    let img = image::load_from_memory(bytes)?;
    rgb_image_to_hsv(&img.to_rgb8())
}

/// Read and decode an image file into an HSV buffer.
///
/// # Errors
///
/// Returns [`IoError::Io`] if the file cannot be read, otherwise the
/// errors of [`decode_hsv`].
pub fn load_hsv(path: &Path) -> Result<ImageBuffer<u8>, IoError> {
    let bytes = std::fs::read(path)?;
    debug!("read {} bytes from {}", bytes.len(), path.display());
    decode_hsv(&bytes)
}

/// Convert an HSV buffer to RGB and encode it in `format`.
///
/// # Errors
///
/// Returns [`IoError::Pipeline`] or [`IoError::Dimensions`] if the
/// buffer cannot be viewed as an RGB image, and
/// [`IoError::ImageDecode`] if encoding fails.
pub fn encode_rgb(hsv: &ImageBuffer<u8>, format: ImageFormat) -> Result<Vec<u8>, IoError> {
    let rgb = hsv_to_rgb_image(hsv)?;
    let mut out = Cursor::new(Vec::new());
    rgb.write_to(&mut out, format)?;
    Ok(out.into_inner())
}

/// Convert an HSV buffer to RGB and save it, picking the format from
/// the path's extension.
///
/// # Errors
///
/// As [`encode_rgb`], plus [`IoError::ImageDecode`] for an unsupported
/// extension or a failed write.
pub fn save_rgb(hsv: &ImageBuffer<u8>, path: &Path) -> Result<(), IoError> {
    let rgb = hsv_to_rgb_image(hsv)?;
    rgb.save(path)?;
    debug!("wrote {}x{} image to {}", rgb.width(), rgb.height(), path.display());
    Ok(())
}
