//! Output formatting and persistence for run summaries.
//!
//! Supports JSON logging and CSV append.

use anyhow::Result;
use tracing::{debug, info};

use crate::stats::RunSummary;
use csv::WriterBuilder;
use std::fs::OpenOptions;
use std::path::Path;

/// Logs a run summary as a single JSON line.
pub fn print_json(summary: &RunSummary) -> Result<()> {
    info!("{}", serde_json::to_string(summary)?);
    Ok(())
}

/// Appends a [`RunSummary`] as a row to a CSV file.
///
/// Creates the file with headers if it does not already exist.
pub fn append_record(path: &str, summary: &RunSummary) -> Result<()> {
    let file_exists = Path::new(path).exists();
    debug!(path, file_exists, "Appending CSV record");

    let file = OpenOptions::new().append(true).create(true).open(path)?;

    let mut writer = WriterBuilder::new()
        .has_headers(!file_exists) // IMPORTANT when appending
        .from_writer(file);

    writer.serialize(summary)?;
    writer.flush()?;

    Ok(())
}
