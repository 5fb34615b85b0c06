//! CLI entry point for the bike-sharing trip ingestion tool.
//!
//! Provides subcommands for processing individual export files, folding
//! cleaned batches into the historical snapshot, and bulk-ingesting a
//! directory of exports.

use anyhow::Result;
use bss_ingest::{
    error::IngestError,
    merge::merge_batch,
    normalize::read_batch,
    output::append_batch,
    schema::TripRecord,
    snapshot::{self, SnapshotLock},
    validate::validate_batch,
};
use clap::{Parser, Subcommand};
use std::ffi::OsStr;
use std::path::Path;
use tracing::{error, info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "bss_ingest")]
#[command(about = "Ingests bike-sharing trip exports into a canonical table", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Normalize and validate one export file, appending to the sink CSV
    Process {
        /// Path to the raw export file (CSV or spreadsheet)
        #[arg(value_name = "FILE")]
        source: String,

        /// Sink CSV file to append cleaned rows to
        #[arg(short, long, default_value = "trips.csv")]
        output: String,
    },
    /// Fold a cleaned export into the deduplicated historical snapshot
    Merge {
        /// Path to the raw export file (CSV or spreadsheet)
        #[arg(value_name = "FILE")]
        source: String,

        /// Local snapshot CSV path (ignored when --s3-bucket is set)
        #[arg(long, default_value = "merged_cleaned_data.csv")]
        snapshot: String,

        /// Optional: S3 bucket holding the snapshot object
        #[arg(long)]
        s3_bucket: Option<String>,

        /// S3 object key for the snapshot
        #[arg(long, default_value = "cleaned_data/merged_cleaned_data.csv")]
        s3_key: String,
    },
    /// Process every export file in a directory, skipping unsupported files
    IngestDir {
        /// Directory containing raw export files
        #[arg(value_name = "DIR")]
        input_dir: String,

        /// Sink CSV file to append cleaned rows to
        #[arg(short, long, default_value = "trips.csv")]
        output: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/bss_ingest.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("bss_ingest.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse().unwrap()));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse().unwrap()));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Process { source, output } => {
            if let Some(rows) = clean_file(&source)? {
                append_batch(&output, &rows)?;
                info!(rows = rows.len(), output = %output, "Loaded rows into sink");
            }
        }
        Commands::Merge {
            source,
            snapshot,
            s3_bucket,
            s3_key,
        } => {
            merge_file(&source, &snapshot, s3_bucket.as_deref(), &s3_key).await?;
        }
        Commands::IngestDir { input_dir, output } => {
            ingest_dir(&input_dir, &output)?;
        }
    }

    Ok(())
}

/// Runs normalize + validate for one export file. `Ok(None)` when the file
/// type is unsupported, so batch callers can skip it without aborting.
#[tracing::instrument(fields(file = %source))]
fn clean_file(source: &str) -> Result<Option<Vec<TripRecord>>> {
    let records = match read_batch(source) {
        Ok(records) => records,
        Err(IngestError::UnsupportedFileType(name)) => {
            warn!(file = %name, "Unsupported file type, skipping");
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    };

    let report = validate_batch(records);
    if report.dropped > 0 {
        warn!(
            dropped = report.dropped,
            "Dropped rows with invalid timestamps"
        );
    }
    info!(rows = report.rows.len(), dropped = report.dropped, "Export cleaned");

    Ok(Some(report.rows))
}

/// Cleans one export and folds it into the snapshot, locally or in S3,
/// holding the lost-update guard across the read-modify-write cycle.
#[tracing::instrument(skip(s3_bucket, s3_key), fields(file = %source))]
async fn merge_file(
    source: &str,
    snapshot_path: &str,
    s3_bucket: Option<&str>,
    s3_key: &str,
) -> Result<()> {
    let Some(batch) = clean_file(source)? else {
        return Ok(());
    };

    if let Some(bucket) = s3_bucket {
        let config = aws_config::load_from_env().await;
        let s3 = aws_sdk_s3::Client::new(&config);

        let (prior, etag) = match snapshot::load_snapshot_s3(&s3, bucket, s3_key).await? {
            Some(prior) => (Some(prior.rows), prior.etag),
            None => (None, None),
        };
        let prior_len = prior.as_ref().map_or(0, Vec::len);

        let result = merge_batch(prior, batch);
        snapshot::write_snapshot_s3(&s3, bucket, s3_key, &result.rows, etag.as_deref()).await?;

        info!(
            prior = prior_len,
            next = result.rows.len(),
            duplicates_removed = result.duplicates_removed,
            bucket,
            key = s3_key,
            "Snapshot merged"
        );
    } else {
        let path = Path::new(snapshot_path);
        let _lock = SnapshotLock::acquire(path)?;

        let prior = snapshot::load_snapshot(path)?;
        let prior_len = prior.as_ref().map_or(0, Vec::len);

        let result = merge_batch(prior, batch);
        snapshot::write_snapshot(path, &result.rows)?;

        info!(
            prior = prior_len,
            next = result.rows.len(),
            duplicates_removed = result.duplicates_removed,
            snapshot = snapshot_path,
            "Snapshot merged"
        );
    }

    Ok(())
}

/// Processes every file in a directory. Unsupported files are skipped and
/// per-file format failures are counted without aborting the batch.
#[tracing::instrument(fields(input_dir, output))]
fn ingest_dir(input_dir: &str, output: &str) -> Result<()> {
    let mut processed = 0usize;
    let mut skipped = 0usize;
    let mut failed = 0usize;

    for entry in std::fs::read_dir(input_dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(source) = path.to_str() else {
            continue;
        };

        match clean_file(source) {
            Ok(Some(rows)) => {
                append_batch(output, &rows)?;
                processed += 1;
            }
            Ok(None) => skipped += 1,
            Err(e) => {
                error!(file = source, error = %e, "Failed to ingest file");
                failed += 1;
            }
        }
    }

    info!(processed, skipped, failed, output, "Directory ingest complete");
    Ok(())
}
