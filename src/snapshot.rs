//! Snapshot store: whole-object read and write of the deduplicated history,
//! locally or in S3.
//!
//! A merge is a read-modify-write cycle over a shared resource, so both
//! backends guard against lost updates: the local file with an exclusive
//! lock file held for the cycle, the S3 object with conditional writes
//! keyed on the ETag observed at read time. A concurrent merge fails loudly
//! instead of silently overwriting the other run's contribution.

use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::anyhow;
use aws_sdk_s3::primitives::ByteStream;
use tracing::{debug, info};

use crate::error::{IngestError, Result};
use crate::schema::TripRecord;

fn snapshot_io(err: impl Into<anyhow::Error>) -> IngestError {
    IngestError::SnapshotIo(err.into())
}

/// Reads the local snapshot CSV. `Ok(None)` when no snapshot exists yet.
pub fn load_snapshot(path: &Path) -> Result<Option<Vec<TripRecord>>> {
    if !path.exists() {
        return Ok(None);
    }

    let mut rdr = csv::Reader::from_path(path).map_err(snapshot_io)?;
    let mut rows = Vec::new();
    for result in rdr.deserialize() {
        rows.push(result.map_err(snapshot_io)?);
    }

    debug!(path = %path.display(), rows = rows.len(), "Snapshot loaded");
    Ok(Some(rows))
}

/// Replaces the local snapshot CSV with the given rows.
pub fn write_snapshot(path: &Path, rows: &[TripRecord]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path).map_err(snapshot_io)?;
    for row in rows {
        writer.serialize(row).map_err(snapshot_io)?;
    }
    writer.flush().map_err(snapshot_io)?;

    info!(path = %path.display(), rows = rows.len(), "Snapshot written");
    Ok(())
}

/// Exclusive guard around a local snapshot read-modify-write cycle, backed
/// by a `create_new` lock file next to the snapshot. Released on drop.
pub struct SnapshotLock {
    lock_path: PathBuf,
}

impl SnapshotLock {
    pub fn acquire(snapshot_path: &Path) -> Result<Self> {
        let lock_path = snapshot_path.with_extension("lock");
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
        {
            Ok(_) => {
                debug!(lock = %lock_path.display(), "Snapshot lock acquired");
                Ok(Self { lock_path })
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(snapshot_io(anyhow!(
                "snapshot {} is locked by another ingestion run",
                snapshot_path.display()
            ))),
            Err(e) => Err(snapshot_io(e)),
        }
    }
}

impl Drop for SnapshotLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.lock_path);
    }
}

/// Prior snapshot rows plus the ETag the subsequent write is conditioned on.
pub struct S3Snapshot {
    pub rows: Vec<TripRecord>,
    pub etag: Option<String>,
}

/// Reads the snapshot object from S3. `Ok(None)` when the object does not
/// exist yet.
pub async fn load_snapshot_s3(
    client: &aws_sdk_s3::Client,
    bucket: &str,
    key: &str,
) -> Result<Option<S3Snapshot>> {
    let resp = match client.get_object().bucket(bucket).key(key).send().await {
        Ok(resp) => resp,
        Err(err) => {
            let err = err.into_service_error();
            if err.is_no_such_key() {
                return Ok(None);
            }
            return Err(snapshot_io(err));
        }
    };

    let etag = resp.e_tag().map(str::to_string);
    let bytes = resp.body.collect().await.map_err(snapshot_io)?.into_bytes();
    let rows = rows_from_csv(&bytes)?;

    debug!(bucket, key, rows = rows.len(), "Snapshot loaded from S3");
    Ok(Some(S3Snapshot { rows, etag }))
}

/// Writes the next snapshot to S3 as a conditional put: `If-Match` against
/// the ETag seen at read time, or `If-None-Match: *` for the first write.
pub async fn write_snapshot_s3(
    client: &aws_sdk_s3::Client,
    bucket: &str,
    key: &str,
    rows: &[TripRecord],
    prior_etag: Option<&str>,
) -> Result<()> {
    let body = rows_to_csv(rows)?;

    let mut req = client
        .put_object()
        .bucket(bucket)
        .key(key)
        .content_type("text/csv")
        .body(ByteStream::from(body));
    req = match prior_etag {
        Some(etag) => req.if_match(etag),
        None => req.if_none_match("*"),
    };
    req.send()
        .await
        .map_err(|e| snapshot_io(e.into_service_error()))?;

    info!(bucket, key, rows = rows.len(), "Snapshot written to S3");
    Ok(())
}

fn rows_to_csv(rows: &[TripRecord]) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    {
        let mut writer = csv::Writer::from_writer(&mut buf);
        for row in rows {
            writer.serialize(row).map_err(snapshot_io)?;
        }
        writer.flush().map_err(snapshot_io)?;
    }
    Ok(buf)
}

fn rows_from_csv(bytes: &[u8]) -> Result<Vec<TripRecord>> {
    let mut rdr = csv::Reader::from_reader(bytes);
    let mut rows = Vec::new();
    for result in rdr.deserialize() {
        rows.push(result.map_err(snapshot_io)?);
    }
    Ok(rows)
}
