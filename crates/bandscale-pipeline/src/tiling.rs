//! Row-band partitioning of the source image across workers.
//!
//! Every worker but the last gets `height / workers` rows; the last one
//! also absorbs the `height % workers` remainder rows. Ranks own bands in
//! increasing row order, which the gather step relies on when it
//! concatenates tiles by rank.

use crate::types::{PipelineError, TileDescriptor};

/// Compute the source rows owned by `rank` in a pool of `workers`.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] if `workers` is zero or
/// `rank` is not below `workers`, and [`PipelineError::TooManyWorkers`]
/// if `workers > height`.
pub fn plan_tile(
    height: usize,
    workers: usize,
    rank: usize,
) -> Result<TileDescriptor, PipelineError> {
    check_pool(height, workers)?;
    if rank >= workers {
        return Err(PipelineError::InvalidConfig(format!(
            "rank {rank} is outside a pool of {workers} workers"
        )));
    }

    let rows_per_worker = height / workers;
    let start = rank * rows_per_worker;
    let end = if rank == workers - 1 {
        height
    } else {
        start + rows_per_worker
    };
    Ok(TileDescriptor { rank, start, end })
}

/// Compute every worker's tile, in rank order.
///
/// # Errors
///
/// Same conditions as [`plan_tile`].
pub fn plan_tiles(height: usize, workers: usize) -> Result<Vec<TileDescriptor>, PipelineError> {
    check_pool(height, workers)?;
    (0..workers)
        .map(|rank| plan_tile(height, workers, rank))
        .collect()
}

fn check_pool(height: usize, workers: usize) -> Result<(), PipelineError> {
    if workers == 0 {
        return Err(PipelineError::InvalidConfig(
            "worker count must be at least 1".to_string(),
        ));
    }
    if workers > height {
        return Err(PipelineError::TooManyWorkers { workers, height });
    }
    Ok(())
}
