//! Incremental merge of cleaned batches into the historical snapshot.
//!
//! Uniqueness is structural: a row is a duplicate iff every canonical field
//! matches another row in the combined set. Duplicate detection is keyed by
//! the full row content, so the operation stays idempotent across repeated,
//! overlapping ingestion runs.

use std::collections::HashSet;

use chrono::NaiveDateTime;
use tracing::debug;

use crate::schema::TripRecord;

/// The next snapshot plus how many exact duplicates were folded away.
pub struct MergeResult {
    pub rows: Vec<TripRecord>,
    pub duplicates_removed: usize,
}

/// Hashable key covering every canonical field. Floats are compared by bit
/// pattern, which is exact for values round-tripped through the snapshot CSV.
#[derive(PartialEq, Eq, Hash)]
struct RowKey {
    date_dep: NaiveDateTime,
    date_ret: NaiveDateTime,
    bike_id: Option<i64>,
    dep_station_label: Option<String>,
    ret_station_label: Option<String>,
    formula_label: Option<String>,
    covered_distance_bits: Option<u64>,
    duration_bits: Option<u64>,
    is_ebike: Option<bool>,
}

fn row_key(row: &TripRecord) -> RowKey {
    RowKey {
        date_dep: row.date_dep,
        date_ret: row.date_ret,
        bike_id: row.bike_id,
        dep_station_label: row.dep_station_label.clone(),
        ret_station_label: row.ret_station_label.clone(),
        formula_label: row.formula_label.clone(),
        covered_distance_bits: row.covered_distance.map(f64::to_bits),
        duration_bits: row.duration.map(f64::to_bits),
        is_ebike: row.is_ebike,
    }
}

/// Folds a cleaned batch into the prior snapshot.
///
/// With no prior snapshot the batch becomes the snapshot unchanged. Otherwise
/// the result is prior rows then batch rows with exact duplicates removed,
/// first occurrence kept, so row order is deterministic.
pub fn merge_batch(prior: Option<Vec<TripRecord>>, batch: Vec<TripRecord>) -> MergeResult {
    let Some(prior) = prior else {
        debug!(rows = batch.len(), "No prior snapshot, batch becomes the snapshot");
        return MergeResult {
            rows: batch,
            duplicates_removed: 0,
        };
    };

    let mut seen: HashSet<RowKey> = HashSet::with_capacity(prior.len() + batch.len());
    let mut rows = Vec::new();
    let mut duplicates_removed = 0usize;

    for row in prior.into_iter().chain(batch) {
        if seen.insert(row_key(&row)) {
            rows.push(row);
        } else {
            duplicates_removed += 1;
        }
    }

    debug!(rows = rows.len(), duplicates_removed, "Snapshot merged");
    MergeResult {
        rows,
        duplicates_removed,
    }
}
