//! Reassembly of variable-height tiles at the leader.
//!
//! A two-phase protocol:
//!
//! 1. every worker reports its tile shape to the leader,
//! 2. the leader builds an [`OutputLayout`] (element counts and
//!    prefix-sum offsets) and allocates the output buffer,
//! 3. one variable-count gather moves every tile's samples into that
//!    buffer at its offset.
//!
//! Tiles land in rank order, so rank 0's rows come first. Tiles are not
//! assumed to have equal heights.

use log::debug;

use crate::comm::{Communicator, GatherTarget};
use crate::layout::OutputLayout;
use crate::types::{ImageBuffer, LEADER_RANK, PipelineError};

/// Gather every worker's tile into one image at the leader.
///
/// Returns `Some(image)` at the leader and `None` on every other worker.
///
/// # Errors
///
/// Returns [`PipelineError::ShapeMismatch`] if tiles disagree on width or
/// channel count, and [`PipelineError::Comm`] if a collective fails.
pub fn gather_tiles<C, T>(
    comm: &C,
    tile: &ImageBuffer<T>,
) -> Result<Option<ImageBuffer<T>>, PipelineError>
where
    C: Communicator,
    T: Copy + Default + Send + 'static,
{
    let Some(shapes) = comm.gather(tile.shape(), LEADER_RANK)? else {
        comm.gather_into(tile.as_slice(), None, LEADER_RANK)?;
        return Ok(None);
    };

    let layout = OutputLayout::from_shapes(&shapes)?;
    debug!(
        "gathering {} tiles into {} (offsets {:?})",
        shapes.len(),
        layout.shape(),
        layout.offsets(),
    );

    let mut output = ImageBuffer::new(layout.shape());
    let target = GatherTarget {
        buffer: output.as_mut_slice(),
        counts: layout.counts(),
        offsets: layout.offsets(),
    };
    comm.gather_into(tile.as_slice(), Some(target), LEADER_RANK)?;
    Ok(Some(output))
}
