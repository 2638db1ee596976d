//! Broadcast of the source image from the leader to every worker.
//!
//! The shape descriptor goes first so that non-leaders can allocate
//! matching storage, then the raw samples follow into that storage.
//! Afterwards every worker owns an independent copy of the full image,
//! so memory grows with the image size times the worker count.

use log::debug;

use crate::comm::Communicator;
use crate::types::{ImageBuffer, LEADER_RANK, PipelineError};

/// Replicate the leader's source image to every worker.
///
/// The leader passes `Some(source)`; other workers pass `None` (anything
/// they pass is ignored). Every worker returns its own copy.
///
/// # Errors
///
/// Returns [`PipelineError::Comm`] if the leader has no source or any
/// collective fails.
pub fn distribute_source<C: Communicator>(
    comm: &C,
    source: Option<ImageBuffer<u8>>,
) -> Result<ImageBuffer<u8>, PipelineError> {
    let source = source.filter(|_| comm.is_leader());
    let shape = comm.broadcast(source.as_ref().map(ImageBuffer::shape), LEADER_RANK)?;

    let mut buffer = source.unwrap_or_else(|| ImageBuffer::new(shape));
    comm.broadcast_into(buffer.as_mut_slice(), LEADER_RANK)?;

    debug!("worker {} holds source {shape}", comm.rank());
    Ok(buffer)
}
