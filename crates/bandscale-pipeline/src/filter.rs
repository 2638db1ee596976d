//! The fixed two-stage filter chain applied to each upsampled tile.
//!
//! 1. [`smooth`]: every channel is convolved with the normalized 3×3
//!    weighted average [`SMOOTHING_KERNEL`].
//! 2. [`sharpen`]: channels 0 and 1 pass through; only
//!    [`SHARPEN_CHANNEL`] (value, the luminance-like channel) is convolved
//!    with the Laplacian-style [`SHARPEN_KERNEL`]. The result is clamped
//!    to `[0, 1]`.
//!
//! Sharpening hue or saturation produces color fringes, so it stays
//! restricted to the value channel.
//!
//! # Boundary handling
//!
//! Convolutions are "same" size with zero fill: samples outside the
//! buffer count as `0.0`. Applied to a single tile this darkens the
//! tile's own top and bottom rows, which is where the seams between tiles
//! come from under [`BoundaryPolicy::TileLocal`](crate::BoundaryPolicy).
//!
//! [`quantize`] maps the clamped result back to 8-bit samples by
//! multiplying by 255 and truncating.

use crate::types::{ImageBuffer, MAX_SAMPLE};

/// A 3×3 convolution kernel, indexed `[row][column]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Kernel3([[f64; 3]; 3]);

impl Kernel3 {
    /// Build a kernel from integer-valued weights and a divisor.
    #[must_use]
    pub const fn new(weights: [[f64; 3]; 3], divisor: f64) -> Self {
        let mut scaled = weights;
        let mut row = 0;
        while row < 3 {
            let mut col = 0;
            while col < 3 {
                scaled[row][col] = weights[row][col] / divisor;
                col += 1;
            }
            row += 1;
        }
        Self(scaled)
    }

    /// The kernel weights.
    #[must_use]
    pub const fn weights(&self) -> &[[f64; 3]; 3] {
        &self.0
    }

    /// Sum of all weights.
    #[must_use]
    pub fn sum(&self) -> f64 {
        self.0.iter().flatten().sum()
    }
}

/// Weighted average: center 4, edges 2, corners 1, divided by 16.
pub const SMOOTHING_KERNEL: Kernel3 =
    Kernel3::new([[1.0, 2.0, 1.0], [2.0, 4.0, 2.0], [1.0, 2.0, 1.0]], 16.0);

/// Sharpening: center 5, edge neighbors -1, corners 0.
pub const SHARPEN_KERNEL: Kernel3 =
    Kernel3::new([[0.0, -1.0, 0.0], [-1.0, 5.0, -1.0], [0.0, -1.0, 0.0]], 1.0);

/// The only channel the sharpening stage touches.
pub const SHARPEN_CHANNEL: usize = 2;

/// Convolve one channel plane of `input` with `kernel`, writing the
/// result into the same channel of `output`.
///
/// Samples outside `input` are treated as zero. Does nothing if
/// `channel` is not present. `output` must have the same shape as
/// `input`.
fn convolve_channel(
    input: &ImageBuffer<f64>,
    channel: usize,
    kernel: &Kernel3,
    output: &mut ImageBuffer<f64>,
) {
    let (height, width) = (input.height(), input.width());
    if channel >= input.channels() || output.shape() != input.shape() {
        return;
    }
    let weights = kernel.weights();

    for row in 0..height {
        for col in 0..width {
            let mut acc = 0.0;
            // True convolution: the tap at offset (dy, dx) uses the
            // kernel weight mirrored through the center.
            for ky in 0..3 {
                let Some(src_row) = (row + 2).checked_sub(ky + 1) else {
                    continue;
                };
                if src_row >= height {
                    continue;
                }
                for kx in 0..3 {
                    let Some(src_col) = (col + 2).checked_sub(kx + 1) else {
                        continue;
                    };
                    if src_col >= width {
                        continue;
                    }
                    acc += weights[ky][kx] * input.get(src_row, src_col, channel);
                }
            }
            output.set(row, col, channel, acc);
        }
    }
}

/// Smoothing stage: convolve every channel with [`SMOOTHING_KERNEL`].
#[must_use = "returns the smoothed tile"]
pub fn smooth(tile: &ImageBuffer<f64>) -> ImageBuffer<f64> {
    let mut out = ImageBuffer::new(tile.shape());
    for channel in 0..tile.channels() {
        convolve_channel(tile, channel, &SMOOTHING_KERNEL, &mut out);
    }
    out
}

/// Sharpening stage: convolve [`SHARPEN_CHANNEL`] with
/// [`SHARPEN_KERNEL`], keep the other channels, clamp to `[0, 1]`.
#[must_use = "returns the sharpened tile"]
pub fn sharpen(smoothed: &ImageBuffer<f64>) -> ImageBuffer<f64> {
    let mut out = smoothed.clone();
    convolve_channel(smoothed, SHARPEN_CHANNEL, &SHARPEN_KERNEL, &mut out);
    for sample in out.as_mut_slice() {
        *sample = sample.clamp(0.0, 1.0);
    }
    out
}

/// Scale `[0, 1]` samples to `0..=255`, truncating toward zero.
#[must_use = "returns the quantized tile"]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn quantize(tile: &ImageBuffer<f64>) -> ImageBuffer<u8> {
    let max = f64::from(MAX_SAMPLE);
    // Inputs are clamped to [0, 1], so the product fits in u8.
    tile.map(|sample| (sample * max) as u8)
}

/// Run smoothing, sharpening and quantization on an upsampled tile.
#[must_use = "returns the filtered tile"]
pub fn apply_filter_chain(tile: &ImageBuffer<f64>) -> ImageBuffer<u8> {
    quantize(&sharpen(&smooth(tile)))
}
