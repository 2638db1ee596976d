//! Run diagnostics: wall-clock timing for the whole run and per-worker
//! stage timings.
//!
//! Every worker measures its own stages and the leader gathers the
//! records after the tile gather. Timestamps are taken with the
//! `web-time` crate, which falls back to `std::time::Instant` on native
//! targets.
//!
//! Durations are serialized as fractional seconds (`f64`) rather than
//! serde's default `{secs, nanos}` struct, so the JSON reads directly.

use std::fmt::Write as _;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{BoundaryPolicy, Shape, TileDescriptor};

/// `Duration` fields as `f64` seconds.
mod secs_f64 {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Duration::try_from_secs_f64(f64::deserialize(d)?).map_err(serde::de::Error::custom)
    }
}

/// Stage timings recorded by one worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerDiagnostics {
    /// The worker's rank.
    pub rank: usize,
    /// Source rows the worker owned.
    pub tile: TileDescriptor,
    /// Source rows actually upsampled, including halo rows.
    pub band_rows: usize,
    /// Output rows the worker contributed.
    pub output_rows: usize,
    /// Upsampling.
    #[serde(with = "secs_f64")]
    pub upsample: Duration,
    /// Smoothing convolution.
    #[serde(with = "secs_f64")]
    pub smooth: Duration,
    /// Sharpening convolution and clamp.
    #[serde(with = "secs_f64")]
    pub sharpen: Duration,
    /// Halo crop and conversion back to 8-bit samples.
    #[serde(with = "secs_f64")]
    pub quantize: Duration,
}

impl WorkerDiagnostics {
    /// Time spent on this worker's tile, excluding communication.
    #[must_use]
    pub fn compute(&self) -> Duration {
        self.upsample + self.smooth + self.sharpen + self.quantize
    }
}

/// Diagnostics for a complete run, available at the leader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDiagnostics {
    /// Wall-clock time from the opening barrier to the end of the gather.
    #[serde(with = "secs_f64")]
    pub total_duration: Duration,
    /// Number of workers in the pool.
    pub worker_count: usize,
    /// Upsampling factor.
    pub scale: usize,
    /// Tile-edge handling used.
    pub boundary: BoundaryPolicy,
    /// Shape of the broadcast source image.
    pub source_shape: Shape,
    /// Shape of the reassembled output.
    pub output_shape: Shape,
    /// Per-worker records, in rank order.
    pub workers: Vec<WorkerDiagnostics>,
}

impl PipelineDiagnostics {
    /// The two-field record handed to the timing reporter.
    #[must_use]
    pub fn timing_record(&self) -> TimingRecord {
        TimingRecord {
            elapsed_secs: self.total_duration.as_secs_f64(),
            workers: self.worker_count,
        }
    }

    /// Human-readable multi-line report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Pipeline: {} -> {} (scale {}, {} workers, {})",
            self.source_shape, self.output_shape, self.scale, self.worker_count, self.boundary,
        );
        let _ = writeln!(
            out,
            "Total: {:.3}ms",
            self.total_duration.as_secs_f64() * 1000.0
        );
        let _ = writeln!(out, "{}", "=".repeat(72));
        let _ = writeln!(
            out,
            "{:>4} {:>11} {:>6} {:>10} {:>10} {:>10} {:>10}",
            "Rank", "Rows", "Out", "Upsample", "Smooth", "Sharpen", "Quantize",
        );
        let _ = writeln!(out, "{}", "-".repeat(72));
        for w in &self.workers {
            let _ = writeln!(
                out,
                "{:>4} {:>11} {:>6} {:>8.3}ms {:>8.3}ms {:>8.3}ms {:>8.3}ms",
                w.rank,
                format!("{}..{}", w.tile.start, w.tile.end),
                w.output_rows,
                w.upsample.as_secs_f64() * 1000.0,
                w.smooth.as_secs_f64() * 1000.0,
                w.sharpen.as_secs_f64() * 1000.0,
                w.quantize.as_secs_f64() * 1000.0,
            );
        }
        out
    }
}

/// Elapsed time and worker count for one run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimingRecord {
    /// Wall-clock seconds for the run.
    pub elapsed_secs: f64,
    /// Number of workers.
    pub workers: usize,
}

impl TimingRecord {
    /// CSV header row.
    pub const CSV_HEADER: &'static str = "ElapsedTime (s),Number of Processors";

    /// The record as a CSV data row.
    #[must_use]
    pub fn csv_row(&self) -> String {
        format!("{},{}", self.elapsed_secs, self.workers)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sample() -> PipelineDiagnostics {
        let worker = |rank: usize, start: usize, end: usize| WorkerDiagnostics {
            rank,
            tile: TileDescriptor { rank, start, end },
            band_rows: end - start,
            output_rows: (end - start) * 2,
            upsample: Duration::from_micros(250),
            smooth: Duration::from_millis(3),
            sharpen: Duration::from_millis(1),
            quantize: Duration::from_micros(100),
        };
        PipelineDiagnostics {
            total_duration: Duration::from_millis(12),
            worker_count: 2,
            scale: 2,
            boundary: BoundaryPolicy::TileLocal,
            source_shape: Shape::new(9, 4, 3),
            output_shape: Shape::new(18, 8, 3),
            workers: vec![worker(0, 0, 4), worker(1, 4, 9)],
        }
    }

    #[test]
    fn compute_sums_stages() {
        let d = sample();
        assert_eq!(d.workers[0].compute(), Duration::from_micros(4350));
    }

    #[test]
    fn timing_record_csv() {
        let record = sample().timing_record();
        assert_eq!(record.workers, 2);
        assert_eq!(record.csv_row(), "0.012,2");
        assert_eq!(
            TimingRecord::CSV_HEADER,
            "ElapsedTime (s),Number of Processors"
        );
    }

    #[test]
    fn report_lists_every_worker() {
        let report = sample().report();
        assert!(report.contains("9x4x3 -> 18x8x3"));
        assert!(report.contains("0..4"));
        assert!(report.contains("4..9"));
    }

    #[test]
    fn json_roundtrip() {
        let d = sample();
        let json = serde_json::to_string(&d).unwrap();
        let back: PipelineDiagnostics = serde_json::from_str(&json).unwrap();
        assert_eq!(back.worker_count, d.worker_count);
        assert_eq!(back.output_shape, d.output_shape);
        assert_eq!(back.workers.len(), 2);
        assert_eq!(back.workers[1].tile, d.workers[1].tile);
        // Fractional seconds may lose a nanosecond either way.
        let drift = back.total_duration.abs_diff(d.total_duration);
        assert!(drift <= Duration::from_nanos(1), "drift {drift:?}");
    }

    #[test]
    fn negative_duration_is_rejected() {
        let json = serde_json::to_string(&sample())
            .unwrap()
            .replacen("\"total_duration\":0.012", "\"total_duration\":-1.0", 1);
        assert!(serde_json::from_str::<PipelineDiagnostics>(&json).is_err());
    }
}
