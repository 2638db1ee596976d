//! Output layout table for the variable-size gather.
//!
//! Built at the leader from every worker's reported tile shape: each
//! worker's element count, and its offset in the flat output buffer as
//! the running sum of the counts before it.

use crate::types::{PipelineError, Shape};

/// Per-worker element counts and offsets into the reassembled buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    counts: Vec<usize>,
    offsets: Vec<usize>,
    shape: Shape,
}

impl OutputLayout {
    /// Build the layout from tile shapes listed in rank order.
    ///
    /// Tiles may differ in height but must agree on width and channel
    /// count.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] if `shapes` is empty and
    /// [`PipelineError::ShapeMismatch`] if a tile's width or channel
    /// count differs from the first tile's.
    pub fn from_shapes(shapes: &[Shape]) -> Result<Self, PipelineError> {
        let Some(first) = shapes.first().copied() else {
            return Err(PipelineError::InvalidConfig(
                "cannot lay out zero tiles".to_string(),
            ));
        };

        let mut counts = Vec::with_capacity(shapes.len());
        let mut offsets = Vec::with_capacity(shapes.len());
        let mut offset = 0;
        let mut height = 0;
        for &shape in shapes {
            if shape.width != first.width || shape.channels != first.channels {
                return Err(PipelineError::ShapeMismatch {
                    expected: first.with_height(shape.height),
                    actual: shape,
                });
            }
            offsets.push(offset);
            counts.push(shape.len());
            offset += shape.len();
            height += shape.height;
        }

        Ok(Self {
            counts,
            offsets,
            shape: first.with_height(height),
        })
    }

    /// Element count contributed by each worker.
    #[must_use]
    pub fn counts(&self) -> &[usize] {
        &self.counts
    }

    /// Start offset of each worker's contribution.
    #[must_use]
    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    /// Shape of the reassembled image.
    #[must_use]
    pub const fn shape(&self) -> Shape {
        self.shape
    }

    /// Total number of elements across all workers.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.shape.len()
    }
}
