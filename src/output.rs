//! Output formatting and persistence for cleaned trip batches.
//!
//! Supports pretty-printing, JSON serialization, and header-once CSV append.
//! The sink expects the canonical column set name-for-name; the serde
//! derive on [`TripRecord`] guarantees that.

use std::fs::{self, OpenOptions};

use csv::WriterBuilder;
use tracing::{debug, info};

use crate::error::{IngestError, Result};
use crate::schema::TripRecord;

/// Logs a cleaned batch using Rust's debug pretty-print format.
pub fn print_pretty(rows: &[TripRecord]) {
    debug!("{:#?}", rows);
}

/// Logs a cleaned batch as pretty-printed JSON.
pub fn print_json(rows: &[TripRecord]) -> anyhow::Result<()> {
    info!("{}", serde_json::to_string_pretty(rows)?);
    Ok(())
}

/// Appends a cleaned batch to the sink CSV, writing headers only when the
/// file is absent or empty. An empty batch is a no-op: it must not create a
/// headerless file that later appends would fill with unlabeled rows.
pub fn append_batch(path: &str, rows: &[TripRecord]) -> Result<()> {
    if rows.is_empty() {
        debug!(path, "Empty batch, nothing to append");
        return Ok(());
    }

    let needs_headers = fs::metadata(path).map_or(true, |m| m.len() == 0);
    debug!(path, needs_headers, rows = rows.len(), "Appending batch to sink");

    let file = OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .map_err(|e| IngestError::SinkWrite(e.into()))?;

    let mut writer = WriterBuilder::new()
        .has_headers(needs_headers) // IMPORTANT when appending
        .from_writer(file);

    for row in rows {
        writer
            .serialize(row)
            .map_err(|e| IngestError::SinkWrite(e.into()))?;
    }
    writer.flush().map_err(|e| IngestError::SinkWrite(e.into()))?;

    Ok(())
}
