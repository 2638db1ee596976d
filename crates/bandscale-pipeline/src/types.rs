//! Shared types for the bandscale pipeline.

use std::fmt;
use std::ops::Range;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::comm::CommError;

/// Number of samples per pixel. The pipeline's color encoding is a
/// 3-channel hue/saturation/value triple.
pub const CHANNELS: usize = 3;

/// Largest representable integer sample.
pub const MAX_SAMPLE: u8 = u8::MAX;

/// Rank of the worker that holds the source before the broadcast and
/// the reassembled output after the gather.
pub const LEADER_RANK: usize = 0;

/// Shape of an image buffer: `[height, width, channels]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shape {
    /// Number of rows.
    pub height: usize,
    /// Number of columns.
    pub width: usize,
    /// Samples per pixel.
    pub channels: usize,
}

impl Shape {
    /// Create a new shape.
    #[must_use]
    pub const fn new(height: usize, width: usize, channels: usize) -> Self {
        Self {
            height,
            width,
            channels,
        }
    }

    /// Number of samples in one row.
    #[must_use]
    pub const fn row_len(self) -> usize {
        self.width * self.channels
    }

    /// Total number of samples (`height * width * channels`).
    #[must_use]
    pub const fn len(self) -> usize {
        self.height * self.row_len()
    }

    /// Returns `true` if the shape holds no samples.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.len() == 0
    }

    /// The same shape with a different number of rows.
    #[must_use]
    pub const fn with_height(self, height: usize) -> Self {
        Self { height, ..self }
    }

    /// The shape after scaling both spatial axes by `factor`.
    #[must_use]
    pub const fn scaled(self, factor: usize) -> Self {
        Self {
            height: self.height * factor,
            width: self.width * factor,
            channels: self.channels,
        }
    }

    /// [`Shape::scaled`], or `None` if either axis or the total sample
    /// count overflows `usize`.
    #[must_use]
    pub const fn checked_scaled(self, factor: usize) -> Option<Self> {
        let (Some(height), Some(width)) = (
            self.height.checked_mul(factor),
            self.width.checked_mul(factor),
        ) else {
            return None;
        };
        let scaled = Self {
            height,
            width,
            channels: self.channels,
        };
        match width.checked_mul(self.channels) {
            Some(row_len) if height.checked_mul(row_len).is_some() => Some(scaled),
            _ => None,
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.height, self.width, self.channels)
    }
}

/// A dense row-major image indexed `[row, column, channel]`.
///
/// Used with `u8` samples for source and output buffers and with `f64`
/// samples for normalized tiles inside the filter chain.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageBuffer<T> {
    shape: Shape,
    data: Vec<T>,
}

impl<T: Copy + Default> ImageBuffer<T> {
    /// Allocate a buffer of the given shape filled with `T::default()`.
    #[must_use]
    pub fn new(shape: Shape) -> Self {
        Self {
            shape,
            data: vec![T::default(); shape.len()],
        }
    }

    /// Allocate a buffer of the given shape filled with `value`.
    #[must_use]
    pub fn filled(shape: Shape, value: T) -> Self {
        Self {
            shape,
            data: vec![value; shape.len()],
        }
    }

    /// Build a buffer by evaluating `f(row, column, channel)` for every
    /// sample.
    #[must_use]
    pub fn from_fn(shape: Shape, mut f: impl FnMut(usize, usize, usize) -> T) -> Self {
        let mut data = Vec::with_capacity(shape.len());
        for row in 0..shape.height {
            for col in 0..shape.width {
                for channel in 0..shape.channels {
                    data.push(f(row, col, channel));
                }
            }
        }
        Self { shape, data }
    }

    /// Wrap an existing flat sample vector.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::BufferLength`] if `data.len()` does not
    /// equal `shape.len()`.
    pub fn from_vec(shape: Shape, data: Vec<T>) -> Result<Self, PipelineError> {
        if data.len() != shape.len() {
            return Err(PipelineError::BufferLength {
                shape,
                len: data.len(),
            });
        }
        Ok(Self { shape, data })
    }

    /// Copy out the rows in `rows` as a new buffer.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::RowRange`] if the range is reversed or
    /// extends past the last row.
    pub fn crop_rows(&self, rows: Range<usize>) -> Result<Self, PipelineError> {
        let samples = self.row_samples(rows.clone())?;
        Ok(Self {
            shape: self.shape.with_height(rows.len()),
            data: samples.to_vec(),
        })
    }

    /// Apply `f` to every sample, producing a buffer of the same shape.
    #[must_use]
    pub fn map<U>(&self, f: impl FnMut(T) -> U) -> ImageBuffer<U> {
        ImageBuffer {
            shape: self.shape,
            data: self.data.iter().copied().map(f).collect(),
        }
    }
}

impl<T> ImageBuffer<T> {
    /// The buffer's shape.
    #[must_use]
    pub const fn shape(&self) -> Shape {
        self.shape
    }

    /// Number of rows.
    #[must_use]
    pub const fn height(&self) -> usize {
        self.shape.height
    }

    /// Number of columns.
    #[must_use]
    pub const fn width(&self) -> usize {
        self.shape.width
    }

    /// Samples per pixel.
    #[must_use]
    pub const fn channels(&self) -> usize {
        self.shape.channels
    }

    /// Flat index of `(row, col, channel)`.
    #[must_use]
    pub const fn index(&self, row: usize, col: usize, channel: usize) -> usize {
        (row * self.shape.width + col) * self.shape.channels + channel
    }

    /// All samples in row-major order.
    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// All samples in row-major order, mutably.
    #[must_use]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Consume the buffer and return the flat sample vector.
    #[must_use]
    pub fn into_vec(self) -> Vec<T> {
        self.data
    }

    /// The samples of a single row.
    ///
    /// # Panics
    ///
    /// Panics if `row` is not below [`height`](Self::height).
    #[must_use]
    pub fn row(&self, row: usize) -> &[T] {
        let len = self.shape.row_len();
        &self.data[row * len..(row + 1) * len]
    }

    /// The contiguous samples covering `rows`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::RowRange`] if the range is reversed or
    /// extends past the last row.
    pub fn row_samples(&self, rows: Range<usize>) -> Result<&[T], PipelineError> {
        if rows.start > rows.end || rows.end > self.shape.height {
            return Err(PipelineError::RowRange {
                start: rows.start,
                end: rows.end,
                height: self.shape.height,
            });
        }
        let len = self.shape.row_len();
        Ok(&self.data[rows.start * len..rows.end * len])
    }
}

impl<T: Copy> ImageBuffer<T> {
    /// The sample at `(row, col, channel)`.
    ///
    /// # Panics
    ///
    /// Panics if `row` is not below the height. `col` and `channel` are
    /// checked against the shape in debug builds only.
    #[must_use]
    pub fn get(&self, row: usize, col: usize, channel: usize) -> T {
        debug_assert!(col < self.shape.width && channel < self.shape.channels);
        self.data[self.index(row, col, channel)]
    }

    /// Overwrite the sample at `(row, col, channel)`.
    ///
    /// # Panics
    ///
    /// Same conditions as [`get`](Self::get).
    pub fn set(&mut self, row: usize, col: usize, channel: usize, value: T) {
        debug_assert!(col < self.shape.width && channel < self.shape.channels);
        let idx = self.index(row, col, channel);
        self.data[idx] = value;
    }
}

/// The source-resolution row band owned by one worker.
///
/// Rows are the half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileDescriptor {
    /// Rank of the owning worker.
    pub rank: usize,
    /// First source row (inclusive).
    pub start: usize,
    /// Last source row (exclusive).
    pub end: usize,
}

impl TileDescriptor {
    /// Number of source rows in the tile.
    #[must_use]
    pub const fn height(&self) -> usize {
        self.end - self.start
    }

    /// The tile's rows as a range.
    #[must_use]
    pub const fn rows(&self) -> Range<usize> {
        self.start..self.end
    }
}

/// How the filter chain treats the top and bottom edges of a tile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoundaryPolicy {
    /// Convolve each tile in isolation with zero fill beyond its rows.
    ///
    /// Interior tile boundaries show seams that a whole-image run does
    /// not have, confined to two upsampled rows on either side of each
    /// boundary.
    #[default]
    TileLocal,
    /// Extend each tile with neighboring source rows before filtering
    /// and crop afterwards.
    ///
    /// Output is identical to a whole-image run for any worker count.
    Halo,
}

impl fmt::Display for BoundaryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TileLocal => f.write_str("TileLocal"),
            Self::Halo => f.write_str("Halo"),
        }
    }
}

/// Configuration for a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Number of workers in the pool.
    pub workers: usize,

    /// Integer upsampling factor applied to both axes.
    pub scale: usize,

    /// Tile-edge handling in the convolution stages.
    pub boundary: BoundaryPolicy,

    /// Upper bound in milliseconds on how long any worker waits for a
    /// peer inside a collective operation. `None` waits forever.
    pub collective_timeout_ms: Option<u64>,
}

impl PipelineConfig {
    /// Default worker count.
    pub const DEFAULT_WORKERS: usize = 1;

    /// Default upsampling factor.
    pub const DEFAULT_SCALE: usize = 2;

    /// Default boundary policy.
    pub const DEFAULT_BOUNDARY: BoundaryPolicy = BoundaryPolicy::TileLocal;

    /// The collective timeout as a [`Duration`].
    #[must_use]
    pub fn collective_timeout(&self) -> Option<Duration> {
        self.collective_timeout_ms.map(Duration::from_millis)
    }

    /// Check the configuration against a source image of shape `source`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] if `workers` or `scale`
    /// is zero or the scaled output would not fit in memory addressing,
    /// and [`PipelineError::TooManyWorkers`] if there are more workers
    /// than rows.
    pub fn validate(&self, source: Shape) -> Result<(), PipelineError> {
        if self.workers == 0 {
            return Err(PipelineError::InvalidConfig(
                "worker count must be at least 1".to_string(),
            ));
        }
        self.output_shape(source)?;
        if self.workers > source.height {
            return Err(PipelineError::TooManyWorkers {
                workers: self.workers,
                height: source.height,
            });
        }
        Ok(())
    }

    /// Shape of the output produced from a source of shape `source`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] if `scale` is zero or the
    /// scaled dimensions or sample count overflow `usize`.
    pub fn output_shape(&self, source: Shape) -> Result<Shape, PipelineError> {
        if self.scale == 0 {
            return Err(PipelineError::InvalidConfig(
                "scale factor must be at least 1".to_string(),
            ));
        }
        source.checked_scaled(self.scale).ok_or_else(|| {
            PipelineError::InvalidConfig(format!(
                "scale factor {} is too large for a {source} source",
                self.scale
            ))
        })
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: Self::DEFAULT_WORKERS,
            scale: Self::DEFAULT_SCALE,
            boundary: Self::DEFAULT_BOUNDARY,
            collective_timeout_ms: None,
        }
    }
}

/// Errors that can occur during a pipeline run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A configuration value is out of range.
    #[error("invalid pipeline configuration: {0}")]
    InvalidConfig(String),

    /// More workers than source rows; some tile would be empty.
    #[error("{workers} workers requested for an image of only {height} rows")]
    TooManyWorkers {
        /// Requested worker count.
        workers: usize,
        /// Source image height.
        height: usize,
    },

    /// The source image does not carry exactly [`CHANNELS`] channels.
    #[error("expected {expected} channels, got {actual}")]
    ChannelCount {
        /// Required channel count.
        expected: usize,
        /// Channel count of the source image.
        actual: usize,
    },

    /// A computed shape disagrees with the one implied by the broadcast
    /// shape descriptor.
    #[error("shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch {
        /// Shape implied by the broadcast descriptor.
        expected: Shape,
        /// Shape actually produced.
        actual: Shape,
    },

    /// A flat sample vector does not fit its declared shape.
    #[error("buffer of {len} samples does not match shape {shape}")]
    BufferLength {
        /// Declared shape.
        shape: Shape,
        /// Actual number of samples.
        len: usize,
    },

    /// A row range falls outside the buffer.
    #[error("row range {start}..{end} is outside an image of {height} rows")]
    RowRange {
        /// Range start.
        start: usize,
        /// Range end.
        end: usize,
        /// Buffer height.
        height: usize,
    },

    /// The leader finished without producing the reassembled image.
    #[error("leader produced no output")]
    MissingOutput,

    /// A collective operation failed.
    #[error(transparent)]
    Comm(#[from] CommError),
}

impl PipelineError {
    /// Whether this error is only a consequence of another worker
    /// having failed first (its endpoint disappeared mid-collective).
    #[must_use]
    pub const fn is_collateral(&self) -> bool {
        matches!(self, Self::Comm(CommError::Disconnected { .. }))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn shape_len_and_scaling() {
        let shape = Shape::new(13, 7, CHANNELS);
        assert_eq!(shape.row_len(), 21);
        assert_eq!(shape.len(), 273);
        assert_eq!(shape.scaled(2), Shape::new(26, 14, 3));
        assert_eq!(shape.with_height(4), Shape::new(4, 7, 3));
        assert_eq!(shape.to_string(), "13x7x3");
    }

    #[test]
    fn from_fn_is_row_major() {
        let img = ImageBuffer::from_fn(Shape::new(2, 3, 3), |r, c, ch| r * 100 + c * 10 + ch);
        assert_eq!(img.get(1, 2, 1), 121);
        assert_eq!(img.as_slice()[img.index(1, 2, 1)], 121);
        assert_eq!(img.row(1)[0], 100);
    }

    #[test]
    fn from_vec_rejects_wrong_length() {
        let result = ImageBuffer::from_vec(Shape::new(2, 2, 3), vec![0_u8; 11]);
        assert!(matches!(
            result,
            Err(PipelineError::BufferLength { len: 11, .. })
        ));
    }

    #[test]
    fn crop_rows_copies_band() {
        let img = ImageBuffer::from_fn(Shape::new(5, 2, 3), |r, _, _| r as u8);
        let band = img.crop_rows(1..3).unwrap();
        assert_eq!(band.shape(), Shape::new(2, 2, 3));
        assert!(band.row(0).iter().all(|&v| v == 1));
        assert!(band.row(1).iter().all(|&v| v == 2));
    }

    #[test]
    fn crop_rows_out_of_range() {
        let img = ImageBuffer::<u8>::new(Shape::new(3, 2, 3));
        assert!(matches!(
            img.crop_rows(2..4),
            Err(PipelineError::RowRange { height: 3, .. })
        ));
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn row_past_height_panics() {
        let image = ImageBuffer::from_fn(Shape::new(2, 2, CHANNELS), |r, _, _| r);
        let _ = image.row(2);
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn get_past_height_panics() {
        let image = ImageBuffer::from_fn(Shape::new(2, 2, CHANNELS), |r, _, _| r);
        let _ = image.get(2, 0, 0);
    }

    #[test]
    fn default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.workers, 1);
        assert_eq!(config.scale, 2);
        assert_eq!(config.boundary, BoundaryPolicy::TileLocal);
        assert_eq!(config.collective_timeout(), None);
    }

    #[test]
    fn validate_rejects_zero_workers_and_scale() {
        let zero_workers = PipelineConfig {
            workers: 0,
            ..PipelineConfig::default()
        };
        assert!(matches!(
            zero_workers.validate(Shape::new(10, 4, CHANNELS)),
            Err(PipelineError::InvalidConfig(_))
        ));

        let zero_scale = PipelineConfig {
            scale: 0,
            ..PipelineConfig::default()
        };
        assert!(matches!(
            zero_scale.validate(Shape::new(10, 4, CHANNELS)),
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn validate_rejects_more_workers_than_rows() {
        let config = PipelineConfig {
            workers: 5,
            ..PipelineConfig::default()
        };
        assert!(matches!(
            config.validate(Shape::new(4, 4, CHANNELS)),
            Err(PipelineError::TooManyWorkers {
                workers: 5,
                height: 4
            })
        ));
        assert!(config.validate(Shape::new(5, 4, CHANNELS)).is_ok());
    }

    #[test]
    fn validate_rejects_scale_that_overflows_output() {
        let config = PipelineConfig {
            scale: usize::MAX / 2 + 1,
            ..PipelineConfig::default()
        };
        let result = config.validate(Shape::new(2, 2, CHANNELS));
        assert!(
            matches!(&result, Err(PipelineError::InvalidConfig(msg)) if msg.contains("too large")),
            "{result:?}"
        );

        // Each axis fits on its own but the sample count does not.
        let config = PipelineConfig {
            scale: 1 << (usize::BITS / 2),
            ..PipelineConfig::default()
        };
        assert!(matches!(
            config.validate(Shape::new(2, 2, CHANNELS)),
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn checked_scaled_matches_scaled_when_it_fits() {
        let shape = Shape::new(13, 7, CHANNELS);
        assert_eq!(shape.checked_scaled(3), Some(shape.scaled(3)));
        assert_eq!(shape.checked_scaled(usize::MAX), None);
        assert_eq!(Shape::new(0, 5, CHANNELS).checked_scaled(usize::MAX), None);
    }

    #[test]
    fn config_json_fills_missing_fields_with_defaults() {
        let config: PipelineConfig = serde_json::from_str(r#"{"workers": 4}"#).unwrap();
        assert_eq!(config.workers, 4);
        assert_eq!(config.scale, PipelineConfig::DEFAULT_SCALE);
        assert_eq!(config.boundary, BoundaryPolicy::TileLocal);
    }

    #[test]
    fn config_json_roundtrip() {
        let config = PipelineConfig {
            workers: 3,
            scale: 4,
            boundary: BoundaryPolicy::Halo,
            collective_timeout_ms: Some(2500),
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: PipelineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, back);
    }

    #[test]
    fn only_disconnects_are_collateral() {
        let disconnected = PipelineError::Comm(CommError::Disconnected { peer: 1 });
        assert!(disconnected.is_collateral());
        assert!(!PipelineError::MissingOutput.is_collateral());
        assert!(!PipelineError::Comm(CommError::WorkerPanicked { rank: 2 }).is_collateral());
    }
}
