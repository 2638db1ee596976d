//! Nearest-neighbor upsampling of a row band.
//!
//! Each source sample is replicated into a `scale × scale` block and
//! normalized into `[0, 1]` by dividing by [`MAX_SAMPLE`]. There is no
//! interpolation. Upsampling happens per band, before any convolution,
//! so each worker only materializes its own enlarged rows.

use std::ops::Range;

use crate::types::{ImageBuffer, MAX_SAMPLE, PipelineError};

/// Upsample the source rows in `rows` by `scale` along both axes.
///
/// The output has shape `[rows.len() * scale, width * scale, channels]`.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] if `scale` is zero or the
/// upsampled band would overflow `usize`, and
/// [`PipelineError::RowRange`] if `rows` falls outside `source`.
pub fn upsample_rows(
    source: &ImageBuffer<u8>,
    rows: Range<usize>,
    scale: usize,
) -> Result<ImageBuffer<f64>, PipelineError> {
    if scale == 0 {
        return Err(PipelineError::InvalidConfig(
            "scale factor must be at least 1".to_string(),
        ));
    }
    let band = source.row_samples(rows.clone())?;
    let band_shape = source.shape().with_height(rows.len());
    let Some(shape) = band_shape.checked_scaled(scale) else {
        return Err(PipelineError::InvalidConfig(format!(
            "scale factor {scale} is too large for a {band_shape} band"
        )));
    };
    let channels = shape.channels;
    let max = f64::from(MAX_SAMPLE);

    let mut data = Vec::with_capacity(shape.len());
    let mut line = Vec::with_capacity(shape.row_len());
    for source_row in band.chunks_exact(source.shape().row_len().max(1)) {
        line.clear();
        for pixel in source_row.chunks_exact(channels.max(1)) {
            for _ in 0..scale {
                line.extend(pixel.iter().map(|&sample| f64::from(sample) / max));
            }
        }
        for _ in 0..scale {
            data.extend_from_slice(&line);
        }
    }

    ImageBuffer::from_vec(shape, data)
}
