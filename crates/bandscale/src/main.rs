//! bandscale: upscale and filter an image on a pool of workers.
//!
//! Decodes the input into HSV, broadcasts it to `--workers` threads that
//! each upsample, smooth and sharpen one horizontal band, gathers the
//! bands back, and writes the result as RGB. Prints per-worker stage
//! timings and optionally writes the two-column timing CSV.
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin bandscale -- [OPTIONS] --output <OUTPUT> <INPUT>
//! ```
//!
//! Set `RUST_LOG=debug` to see every stage and collective.

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use bandscale_pipeline::{BoundaryPolicy, PipelineConfig, PipelineDiagnostics, WorkerDiagnostics};
use clap::{Parser, ValueEnum};

/// Upscale an image on a pool of workers and report timings.
#[derive(Parser)]
#[command(name = "bandscale", version)]
struct Cli {
    /// Path to the input image (PNG, JPEG, BMP, WebP).
    input: PathBuf,

    /// Where to write the processed image; the extension picks the format.
    #[arg(short, long)]
    output: PathBuf,

    /// Number of workers in the pool.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_WORKERS, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    workers: usize,

    /// Integer upsampling factor.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_SCALE, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    scale: usize,

    /// Tile-edge handling in the filter stages.
    #[arg(long, value_enum, default_value_t = Boundary::TileLocal)]
    boundary: Boundary,

    /// Give up on a collective after this many milliseconds.
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Write the elapsed time and worker count of the first run to this CSV.
    #[arg(long)]
    metrics: Option<PathBuf>,

    /// Number of runs for averaging.
    #[arg(long, default_value_t = 1, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    runs: usize,

    /// Output diagnostics as JSON instead of human-readable report.
    #[arg(long)]
    json: bool,

    /// Full pipeline config as a JSON string.
    ///
    /// When provided, `--workers`, `--scale`, `--boundary` and
    /// `--timeout-ms` are ignored. The JSON must be a valid
    /// `PipelineConfig` serialization; missing fields take defaults.
    #[arg(long)]
    config_json: Option<String>,
}

/// Boundary policy selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Boundary {
    /// Filter each band in isolation; seams appear between bands.
    TileLocal,
    /// Borrow neighboring rows so the output matches a single-worker run.
    Halo,
}

/// Build a [`PipelineConfig`] from CLI arguments.
///
/// If `--config-json` is provided, the JSON is parsed directly and the
/// individual parameter flags are ignored.
fn config_from_cli(cli: &Cli) -> Result<PipelineConfig, String> {
    if let Some(ref json) = cli.config_json {
        return serde_json::from_str(json).map_err(|e| format!("Error parsing --config-json: {e}"));
    }

    Ok(PipelineConfig {
        workers: cli.workers,
        scale: cli.scale,
        boundary: match cli.boundary {
            Boundary::TileLocal => BoundaryPolicy::TileLocal,
            Boundary::Halo => BoundaryPolicy::Halo,
        },
        collective_timeout_ms: cli.timeout_ms,
    })
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    env_logger::init();

    let config = match config_from_cli(&cli) {
        Ok(c) => c,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };

    let source = match bandscale_io::load_hsv(&cli.input) {
        Ok(image) => image,
        Err(e) => {
            eprintln!("Error loading {}: {e}", cli.input.display());
            return ExitCode::FAILURE;
        }
    };

    eprintln!(
        "Original size (width x height): ({}, {})",
        source.width(),
        source.height(),
    );
    eprintln!("Config: {config:#?}");
    eprintln!("Runs: {}", cli.runs);
    eprintln!();

    let mut all_diagnostics = Vec::with_capacity(cli.runs);

    for run in 0..cli.runs {
        if cli.runs > 1 {
            eprintln!("--- Run {}/{} ---", run + 1, cli.runs);
        }

        let output = match bandscale_pipeline::run_local(&source, &config) {
            Ok(output) => output,
            Err(e) => {
                eprintln!("Pipeline error: {e}");
                return ExitCode::FAILURE;
            }
        };

        if cli.json {
            match serde_json::to_string_pretty(&output.diagnostics) {
                Ok(json) => println!("{json}"),
                Err(e) => {
                    eprintln!("Error serializing diagnostics: {e}");
                    return ExitCode::FAILURE;
                }
            }
        } else {
            println!("{}", output.diagnostics.report());
        }

        // Write the image and metrics on the first run only.
        if run == 0 {
            eprintln!(
                "New size (width x height): ({}, {})",
                output.image.width(),
                output.image.height(),
            );
            if let Err(e) = bandscale_io::save_rgb(&output.image, &cli.output) {
                eprintln!("Error writing {}: {e}", cli.output.display());
                return ExitCode::FAILURE;
            }
            eprintln!("Image written to {}", cli.output.display());

            if let Some(ref metrics_path) = cli.metrics {
                let record = output.diagnostics.timing_record();
                match bandscale_io::save_timing_csv(metrics_path, &record) {
                    Ok(()) => eprintln!(
                        "Performance metrics written: {:.4} seconds with {} workers.",
                        record.elapsed_secs, record.workers,
                    ),
                    Err(e) => {
                        eprintln!("Error writing metrics to {}: {e}", metrics_path.display());
                    }
                }
            }
        }

        all_diagnostics.push(output.diagnostics);

        if cli.runs > 1 {
            eprintln!();
        }
    }

    if cli.runs > 1 {
        print_multi_run_summary(&all_diagnostics);
    }

    ExitCode::SUCCESS
}

/// Min, mean and max of a series of durations, in milliseconds.
#[derive(Debug, PartialEq)]
struct Spread {
    min: f64,
    mean: f64,
    max: f64,
}

impl Spread {
    #[allow(clippy::cast_precision_loss)]
    fn of(durations: impl IntoIterator<Item = Duration>) -> Option<Self> {
        let ms: Vec<f64> = durations
            .into_iter()
            .map(|d| d.as_secs_f64() * 1000.0)
            .collect();
        let min = ms.iter().copied().reduce(f64::min)?;
        let max = ms.iter().copied().reduce(f64::max)?;
        let mean = ms.iter().sum::<f64>() / ms.len() as f64;
        Some(Self { min, mean, max })
    }
}

/// Print wall-clock and slowest-worker compute spreads across runs.
///
/// Whatever the wall clock spends beyond the slowest worker's compute is
/// waiting in collectives.
fn print_multi_run_summary(all_diagnostics: &[PipelineDiagnostics]) {
    println!();
    println!("Summary ({} runs)", all_diagnostics.len());

    let rows = [
        (
            "Wall clock",
            Spread::of(all_diagnostics.iter().map(|d| d.total_duration)),
        ),
        (
            "Slowest worker compute",
            Spread::of(
                all_diagnostics
                    .iter()
                    .filter_map(|d| d.workers.iter().map(WorkerDiagnostics::compute).max()),
            ),
        ),
    ];
    for (label, spread) in rows {
        if let Some(Spread { min, mean, max }) = spread {
            println!("{label:<24} min={min:.3}ms  mean={mean:.3}ms  max={max:.3}ms");
        }
    }
}
