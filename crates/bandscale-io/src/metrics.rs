//! Timing report: a two-line CSV with a header and one data row.
//!
//! ```text
//! ElapsedTime (s),Number of Processors
//! 0.0123,4
//! ```
//!
//! Lines end in CRLF as RFC 4180 prescribes. The file is overwritten on
//! every run.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use bandscale_pipeline::TimingRecord;
use log::info;

use crate::IoError;

const LINE_END: &str = "\r\n";

/// Write the header and `record` to `writer`.
///
/// # Errors
///
/// Returns [`IoError::Io`] if the writer fails.
pub fn write_timing_csv<W: Write>(writer: &mut W, record: &TimingRecord) -> Result<(), IoError> {
    write!(writer, "{}{LINE_END}", TimingRecord::CSV_HEADER)?;
    write!(writer, "{}{LINE_END}", record.csv_row())?;
    Ok(())
}

/// Create (or truncate) the file at `path` and write the report to it.
///
/// # Errors
///
/// Returns [`IoError::Io`] if the file cannot be created or written.
pub fn save_timing_csv(path: &Path, record: &TimingRecord) -> Result<(), IoError> {
    let mut writer = BufWriter::new(File::create(path)?);
    write_timing_csv(&mut writer, record)?;
    writer.flush()?;
    info!(
        "timing written to {}: {:.4}s with {} workers",
        path.display(),
        record.elapsed_secs,
        record.workers,
    );
    Ok(())
}
