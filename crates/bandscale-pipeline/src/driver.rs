//! Pipeline driver: the only place that synchronizes workers and
//! measures time.
//!
//! Each worker runs the same sequence:
//!
//! 1. barrier, start the clock
//! 2. broadcast the source from the leader ([`distribute_source`])
//! 3. plan its own tile ([`plan_tile`])
//! 4. upsample and filter the tile ([`process_tile`])
//! 5. gather tiles at the leader ([`gather_tiles`]), stop the clock
//! 6. gather per-worker diagnostics at the leader
//!
//! [`run_worker`] is that sequence for one rank over any
//! [`Communicator`]. [`run_local`] starts a [`LocalWorld`] with
//! `config.workers` ranks and runs it on each.

use std::ops::Range;

use log::{debug, info};
use web_time::Instant;

use crate::comm::{Communicator, LocalWorld};
use crate::diagnostics::{PipelineDiagnostics, WorkerDiagnostics};
use crate::distribute::distribute_source;
use crate::filter;
use crate::gather::gather_tiles;
use crate::tiling::plan_tile;
use crate::types::{
    BoundaryPolicy, CHANNELS, ImageBuffer, LEADER_RANK, PipelineConfig, PipelineError,
    TileDescriptor,
};
use crate::upsample::upsample_rows;

/// Result of a complete run, held by the leader.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    /// Reassembled, filtered image at `scale` times the source size.
    pub image: ImageBuffer<u8>,
    /// Timings and shapes for the run.
    pub diagnostics: PipelineDiagnostics,
}

/// Number of extra source rows a tile needs on each interior side so
/// that the two 3×3 stages see true neighbors for every kept row.
///
/// Smoothing and sharpening each reach one upsampled row, so two
/// upsampled rows of context are needed.
#[must_use]
pub const fn halo_rows(scale: usize) -> usize {
    2_usize.div_ceil(scale)
}

/// The source rows to upsample for `tile`, and the upsampled rows of the
/// filtered band that belong to the tile.
fn band_for(
    tile: TileDescriptor,
    height: usize,
    scale: usize,
    boundary: BoundaryPolicy,
) -> (Range<usize>, Range<usize>) {
    match boundary {
        BoundaryPolicy::TileLocal => (tile.rows(), 0..tile.height() * scale),
        BoundaryPolicy::Halo => {
            let halo = halo_rows(scale);
            let start = tile.start.saturating_sub(halo);
            let end = (tile.end + halo).min(height);
            let skip = (tile.start - start) * scale;
            (start..end, skip..skip + tile.height() * scale)
        }
    }
}

/// Upsample and filter one worker's tile of `source`.
///
/// Returns the 8-bit tile of shape
/// `[tile.height() * scale, width * scale, 3]` and its stage timings.
///
/// # Errors
///
/// Returns [`PipelineError::ShapeMismatch`] if an intermediate buffer
/// disagrees with the shape derived from `source`, and
/// [`PipelineError::RowRange`] if the tile falls outside `source`.
pub fn process_tile(
    source: &ImageBuffer<u8>,
    tile: TileDescriptor,
    scale: usize,
    boundary: BoundaryPolicy,
) -> Result<(ImageBuffer<u8>, WorkerDiagnostics), PipelineError> {
    let source_shape = source.shape();
    let (band, keep) = band_for(tile, source_shape.height, scale, boundary);

    let t = Instant::now();
    let upsampled = upsample_rows(source, band.clone(), scale)?;
    let upsample = t.elapsed();
    let expected = source_shape.with_height(band.len()).scaled(scale);
    if upsampled.shape() != expected {
        return Err(PipelineError::ShapeMismatch {
            expected,
            actual: upsampled.shape(),
        });
    }

    let t = Instant::now();
    let smoothed = filter::smooth(&upsampled);
    let smooth = t.elapsed();

    let t = Instant::now();
    let sharpened = filter::sharpen(&smoothed);
    let sharpen = t.elapsed();

    let t = Instant::now();
    let kept = if keep.len() == sharpened.height() {
        sharpened
    } else {
        sharpened.crop_rows(keep)?
    };
    let output = filter::quantize(&kept);
    let quantize = t.elapsed();

    let expected = source_shape.with_height(tile.height()).scaled(scale);
    if output.shape() != expected {
        return Err(PipelineError::ShapeMismatch {
            expected,
            actual: output.shape(),
        });
    }

    debug!(
        "worker {} filtered rows {}..{} (band {}..{}) into {}",
        tile.rank,
        tile.start,
        tile.end,
        band.start,
        band.end,
        output.shape(),
    );

    let diagnostics = WorkerDiagnostics {
        rank: tile.rank,
        tile,
        band_rows: band.len(),
        output_rows: output.height(),
        upsample,
        smooth,
        sharpen,
        quantize,
    };
    Ok((output, diagnostics))
}

/// Upsample and filter the whole image with no tiling.
///
/// This is the reference a single-worker run reproduces exactly.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] if `scale` is zero.
pub fn process_serial(source: &ImageBuffer<u8>, scale: usize) -> Result<ImageBuffer<u8>, PipelineError> {
    let upsampled = upsample_rows(source, 0..source.height(), scale)?;
    Ok(filter::apply_filter_chain(&upsampled))
}

/// Run the pipeline as one rank of `comm`.
///
/// The leader passes `Some(source)`; other ranks pass `None`. The pool
/// size is taken from `comm`, not from `config.workers`. Returns the
/// reassembled output at the leader and `None` elsewhere.
///
/// # Errors
///
/// Returns [`PipelineError::ChannelCount`] unless the source has
/// [`CHANNELS`] channels, [`PipelineError::InvalidConfig`] if the
/// scaled output does not fit, [`PipelineError::TooManyWorkers`] if the pool
/// is larger than the image height, shape errors from the tile stages,
/// and [`PipelineError::Comm`] if any collective fails.
pub fn run_worker<C: Communicator>(
    comm: &C,
    source: Option<ImageBuffer<u8>>,
    config: &PipelineConfig,
) -> Result<Option<PipelineOutput>, PipelineError> {
    comm.barrier()?;
    let start = Instant::now();

    let source = distribute_source(comm, source)?;
    let source_shape = source.shape();
    if source_shape.channels != CHANNELS {
        return Err(PipelineError::ChannelCount {
            expected: CHANNELS,
            actual: source_shape.channels,
        });
    }

    let output_shape = config.output_shape(source_shape)?;

    let tile = plan_tile(source_shape.height, comm.size(), comm.rank())?;
    let (processed, worker_diagnostics) =
        process_tile(&source, tile, config.scale, config.boundary)?;
    drop(source);

    let image = gather_tiles(comm, &processed)?;
    let total_duration = start.elapsed();
    let workers = comm.gather(worker_diagnostics, LEADER_RANK)?;

    let (Some(image), Some(workers)) = (image, workers) else {
        return Ok(None);
    };

    if image.shape() != output_shape {
        return Err(PipelineError::ShapeMismatch {
            expected: output_shape,
            actual: image.shape(),
        });
    }

    let diagnostics = PipelineDiagnostics {
        total_duration,
        worker_count: comm.size(),
        scale: config.scale,
        boundary: config.boundary,
        source_shape,
        output_shape,
        workers,
    };
    Ok(Some(PipelineOutput { image, diagnostics }))
}

/// Run the pipeline on an in-process pool of `config.workers` threads.
///
/// # Errors
///
/// Fails fast with [`PipelineError::InvalidConfig`],
/// [`PipelineError::TooManyWorkers`] or [`PipelineError::ChannelCount`]
/// before any worker starts. If a worker fails, the whole run fails with
/// the first error in rank order that is not merely another worker's
/// disconnect.
pub fn run_local(
    source: &ImageBuffer<u8>,
    config: &PipelineConfig,
) -> Result<PipelineOutput, PipelineError> {
    config.validate(source.shape())?;
    if source.channels() != CHANNELS {
        return Err(PipelineError::ChannelCount {
            expected: CHANNELS,
            actual: source.channels(),
        });
    }

    info!(
        "running {} on {} workers (scale {}, {})",
        source.shape(),
        config.workers,
        config.scale,
        config.boundary,
    );

    let results = LocalWorld::run(config.workers, config.collective_timeout(), |comm| {
        let source = comm.is_leader().then(|| source.clone());
        run_worker(&comm, source, config)
    });

    let mut output = None;
    let mut errors = Vec::new();
    for result in results {
        match result.map_err(PipelineError::from).and_then(|r| r) {
            Ok(Some(o)) => output = Some(o),
            Ok(None) => {}
            Err(e) => errors.push(e),
        }
    }

    if !errors.is_empty() {
        let root_cause = errors
            .iter()
            .position(|e| !e.is_collateral())
            .unwrap_or(0);
        return Err(errors.swap_remove(root_cause));
    }

    let output = output.ok_or(PipelineError::MissingOutput)?;
    info!(
        "produced {} in {:.3}s",
        output.image.shape(),
        output.diagnostics.total_duration.as_secs_f64(),
    );
    Ok(output)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::cast_possible_truncation)]
mod tests {
    use super::*;
    use crate::comm::CommError;
    use crate::types::Shape;

    fn textured(height: usize, width: usize) -> ImageBuffer<u8> {
        ImageBuffer::from_fn(Shape::new(height, width, CHANNELS), |r, c, ch| {
            ((r * 37 + c * 11 + ch * 71 + (r * c) % 13) % 256) as u8
        })
    }

    #[test]
    fn halo_rows_cover_two_upsampled_rows() {
        assert_eq!(halo_rows(1), 2);
        assert_eq!(halo_rows(2), 1);
        assert_eq!(halo_rows(3), 1);
    }

    #[test]
    fn tile_local_band_is_the_tile() {
        let tile = TileDescriptor {
            rank: 1,
            start: 4,
            end: 8,
        };
        let (band, keep) = band_for(tile, 13, 2, BoundaryPolicy::TileLocal);
        assert_eq!(band, 4..8);
        assert_eq!(keep, 0..8);
    }

    #[test]
    fn halo_band_is_clipped_at_image_edges() {
        let first = TileDescriptor {
            rank: 0,
            start: 0,
            end: 4,
        };
        let (band, keep) = band_for(first, 13, 1, BoundaryPolicy::Halo);
        assert_eq!(band, 0..6);
        assert_eq!(keep, 0..4);

        let last = TileDescriptor {
            rank: 2,
            start: 8,
            end: 13,
        };
        let (band, keep) = band_for(last, 13, 2, BoundaryPolicy::Halo);
        assert_eq!(band, 7..13);
        assert_eq!(keep, 2..12);
    }

    #[test]
    fn process_tile_output_shape() {
        let src = textured(13, 5);
        let tile = plan_tile(13, 3, 2).unwrap();
        for boundary in [BoundaryPolicy::TileLocal, BoundaryPolicy::Halo] {
            let (out, diag) = process_tile(&src, tile, 2, boundary).unwrap();
            assert_eq!(out.shape(), Shape::new(10, 10, CHANNELS));
            assert_eq!(diag.output_rows, 10);
            assert_eq!(diag.rank, 2);
        }
    }

    #[test]
    fn whole_image_tile_matches_serial() {
        let src = textured(6, 7);
        let tile = plan_tile(6, 1, 0).unwrap();
        let (out, _) = process_tile(&src, tile, 2, BoundaryPolicy::TileLocal).unwrap();
        assert_eq!(out, process_serial(&src, 2).unwrap());
    }

    #[test]
    fn run_local_single_worker_equals_serial() {
        let src = textured(11, 9);
        let output = run_local(&src, &PipelineConfig::default()).unwrap();
        assert_eq!(output.image, process_serial(&src, 2).unwrap());
        assert_eq!(output.diagnostics.worker_count, 1);
        assert_eq!(output.diagnostics.workers.len(), 1);
    }

    #[test]
    fn run_local_rejects_too_many_workers_before_starting() {
        let src = textured(3, 3);
        let config = PipelineConfig {
            workers: 4,
            ..PipelineConfig::default()
        };
        assert!(matches!(
            run_local(&src, &config),
            Err(PipelineError::TooManyWorkers {
                workers: 4,
                height: 3
            })
        ));
    }

    #[test]
    fn run_local_rejects_wrong_channel_count() {
        let src = ImageBuffer::<u8>::new(Shape::new(4, 4, 4));
        assert!(matches!(
            run_local(&src, &PipelineConfig::default()),
            Err(PipelineError::ChannelCount {
                expected: 3,
                actual: 4
            })
        ));
    }

    #[test]
    fn run_worker_pool_larger_than_image_fails_on_every_rank() {
        let src = textured(2, 4);
        let config = PipelineConfig::default();
        let results = LocalWorld::run(3, None, |comm| {
            let source = comm.is_leader().then(|| src.clone());
            run_worker(&comm, source, &config).map(|o| o.is_some())
        });
        for result in results {
            assert!(matches!(
                result,
                Ok(Err(PipelineError::TooManyWorkers {
                    workers: 3,
                    height: 2
                }))
            ));
        }
    }

    #[test]
    fn run_local_rejects_overflowing_scale_before_starting() {
        let src = textured(2, 2);
        let config: PipelineConfig = serde_json::from_str(r#"{"scale": 4294967296}"#).unwrap();
        let result = run_local(&src, &config);
        assert!(
            matches!(result, Err(PipelineError::InvalidConfig(_))),
            "{:?}",
            result.map(|o| o.image.shape())
        );
    }

    #[test]
    fn run_worker_rejects_overflowing_scale_on_every_rank() {
        let src = textured(4, 2);
        let config = PipelineConfig {
            scale: usize::MAX,
            ..PipelineConfig::default()
        };
        let results = LocalWorld::run(2, None, |comm| {
            let source = comm.is_leader().then(|| src.clone());
            run_worker(&comm, source, &config).map(|o| o.is_some())
        });
        for result in results {
            assert!(matches!(result, Ok(Err(PipelineError::InvalidConfig(_)))));
        }
    }

    #[test]
    fn worker_failure_surfaces_root_cause() {
        let src = textured(8, 4);
        let config = PipelineConfig::default();
        let results = LocalWorld::run(2, None, |comm| -> Result<(), PipelineError> {
            if comm.rank() == 1 {
                // A worker that dies after the opening barrier.
                comm.barrier()?;
                return Err(PipelineError::InvalidConfig("boom".to_string()));
            }
            run_worker(&comm, Some(src.clone()), &config).map(|_| ())
        });
        assert!(matches!(
            results[0],
            Ok(Err(PipelineError::Comm(CommError::Disconnected { peer: 1 })))
        ));
    }
}
