//! bandscale-io: the file-facing side of the bandscale pipeline.
//!
//! Decodes source images into 3-channel HSV buffers, converts processed
//! HSV buffers back to RGB for encoding, and writes the two-column
//! timing CSV. The processing itself lives in `bandscale-pipeline`,
//! which never touches files.

pub mod codec;
pub mod color;
pub mod metrics;

use bandscale_pipeline::PipelineError;

pub use codec::{decode_hsv, encode_rgb, load_hsv, save_rgb};
pub use color::{hsv_to_rgb, hsv_to_rgb_image, rgb_image_to_hsv, rgb_to_hsv};
pub use metrics::{save_timing_csv, write_timing_csv};

/// Errors raised while reading or writing images and reports.
#[derive(Debug, thiserror::Error)]
pub enum IoError {
    /// The image format is unrecognized, the data is corrupt, or encoding failed.
    #[error("image codec error: {0}")]
    ImageDecode(#[from] image::ImageError),

    /// A filesystem read or write failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The input image data is empty.
    #[error("input image data is empty")]
    EmptyInput,

    /// Image dimensions do not fit the encoder's 32-bit sizes.
    #[error("image of {height}x{width} pixels is too large to encode")]
    Dimensions {
        /// Rows.
        height: usize,
        /// Columns.
        width: usize,
    },

    /// A buffer handed to the encoder was malformed.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}
