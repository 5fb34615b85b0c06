//! Row-level timestamp validation.
//!
//! One exact format is accepted; a row whose departure or return value is
//! missing or does not parse is removed entirely, never coerced to a
//! sentinel. Drops are counted for observability rather than raised.

use chrono::NaiveDateTime;
use tracing::debug;

use crate::schema::{NormalizedRecord, TIMESTAMP_FORMAT, TripRecord};

/// Outcome of validating one normalized batch.
pub struct ValidationReport {
    pub rows: Vec<TripRecord>,
    pub dropped: usize,
}

/// Parses both timestamp columns of every record under the fixed format,
/// dropping any row where either parse fails. Pure transformation, no I/O.
pub fn validate_batch(records: Vec<NormalizedRecord>) -> ValidationReport {
    let mut rows = Vec::new();
    let mut dropped = 0usize;

    for record in records {
        match parse_timestamps(&record) {
            Some((date_dep, date_ret)) => rows.push(TripRecord {
                date_dep,
                date_ret,
                bike_id: record.bike_id,
                dep_station_label: record.dep_station_label,
                ret_station_label: record.ret_station_label,
                formula_label: record.formula_label,
                covered_distance: record.covered_distance,
                duration: record.duration,
                is_ebike: record.is_ebike,
            }),
            None => {
                dropped += 1;
                debug!(
                    date_dep = ?record.date_dep,
                    date_ret = ?record.date_ret,
                    "Dropping row with missing or malformed timestamp"
                );
            }
        }
    }

    ValidationReport { rows, dropped }
}

/// A missing value fails exactly like a malformed one.
fn parse_timestamps(record: &NormalizedRecord) -> Option<(NaiveDateTime, NaiveDateTime)> {
    let dep = NaiveDateTime::parse_from_str(record.date_dep.as_deref()?, TIMESTAMP_FORMAT).ok()?;
    let ret = NaiveDateTime::parse_from_str(record.date_ret.as_deref()?, TIMESTAMP_FORMAT).ok()?;
    Some((dep, ret))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(dep: Option<&str>, ret: Option<&str>) -> NormalizedRecord {
        NormalizedRecord {
            date_dep: dep.map(str::to_string),
            date_ret: ret.map(str::to_string),
            bike_id: Some(42),
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_pair_is_retained_and_parsed() {
        let report = validate_batch(vec![record(
            Some("2024-01-01 10:00:00"),
            Some("2024-01-01 10:20:00"),
        )]);

        assert_eq!(report.dropped, 0);
        assert_eq!(report.rows.len(), 1);
        let row = &report.rows[0];
        assert_eq!(
            row.date_dep.format(TIMESTAMP_FORMAT).to_string(),
            "2024-01-01 10:00:00"
        );
        assert_eq!(
            row.date_ret.format(TIMESTAMP_FORMAT).to_string(),
            "2024-01-01 10:20:00"
        );
        assert_eq!(row.bike_id, Some(42));
    }

    #[test]
    fn test_malformed_departure_drops_row() {
        let report = validate_batch(vec![
            record(Some("not-a-date"), Some("2024-01-01 10:20:00")),
            record(Some("2024-01-01 10:00:00"), Some("2024-01-01 10:20:00")),
        ]);

        assert_eq!(report.dropped, 1);
        assert_eq!(report.rows.len(), 1);
    }

    #[test]
    fn test_missing_return_drops_row() {
        let report = validate_batch(vec![record(Some("2024-01-01 10:00:00"), None)]);
        assert_eq!(report.dropped, 1);
        assert!(report.rows.is_empty());
    }

    #[test]
    fn test_alternate_iso_variant_is_rejected() {
        // Only the exact format is accepted; a T separator fails
        let report = validate_batch(vec![record(
            Some("2024-01-01T10:00:00"),
            Some("2024-01-01 10:20:00"),
        )]);
        assert_eq!(report.dropped, 1);
    }

    #[test]
    fn test_empty_batch() {
        let report = validate_batch(Vec::new());
        assert_eq!(report.dropped, 0);
        assert!(report.rows.is_empty());
    }
}
