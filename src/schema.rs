//! Canonical trip schema and the column alias table.
//!
//! Every export vintage is reconciled into the same fixed column set,
//! whatever the source system called its columns.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// The single timestamp format accepted across the pipeline.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Every raw column name observed across export vintages, mapped to its
/// canonical field. Several spellings of the membership column map to
/// `formula_label`, including a misspelling that ships in real files.
/// New variants get added here, never in the parsing code.
pub static COLUMN_ALIASES: &[(&str, &str)] = &[
    ("Departure", "date_dep"),
    ("Return", "date_ret"),
    ("Bike", "bike_id"),
    ("Departure station", "dep_station_label"),
    ("Return station", "ret_station_label"),
    ("Membership type", "formula_label"),
    ("Memebership type", "formula_label"),
    ("Membership Type", "formula_label"),
    ("Formula", "formula_label"),
    ("Covered distance (m)", "covered_distance"),
    ("Duration (sec.)", "duration"),
    ("Electric bike", "is_ebike"),
];

/// Canonical output columns, in the order they are emitted.
pub static CANONICAL_FIELDS: &[&str] = &[
    "date_dep",
    "date_ret",
    "bike_id",
    "dep_station_label",
    "ret_station_label",
    "formula_label",
    "covered_distance",
    "duration",
    "is_ebike",
];

/// Looks up the canonical field for a raw column header, if one is known.
pub fn canonical_field(raw: &str) -> Option<&'static str> {
    COLUMN_ALIASES
        .iter()
        .find(|(alias, _)| *alias == raw)
        .map(|(_, field)| *field)
}

/// A trip row after column reconciliation but before timestamp validation.
/// Timestamps are still raw strings; `None` means the cell was absent or
/// empty in the source file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedRecord {
    pub date_dep: Option<String>,
    pub date_ret: Option<String>,
    pub bike_id: Option<i64>,
    pub dep_station_label: Option<String>,
    pub ret_station_label: Option<String>,
    pub formula_label: Option<String>,
    pub covered_distance: Option<f64>,
    pub duration: Option<f64>,
    pub is_ebike: Option<bool>,
}

/// A fully cleaned trip row. Both timestamps are guaranteed to have parsed
/// under [`TIMESTAMP_FORMAT`]. Immutable once created; rows are either
/// appended to the sink or folded into the historical snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripRecord {
    #[serde(with = "timestamp_format")]
    pub date_dep: NaiveDateTime,
    #[serde(with = "timestamp_format")]
    pub date_ret: NaiveDateTime,
    pub bike_id: Option<i64>,
    pub dep_station_label: Option<String>,
    pub ret_station_label: Option<String>,
    pub formula_label: Option<String>,
    pub covered_distance: Option<f64>,
    pub duration: Option<f64>,
    pub is_ebike: Option<bool>,
}

/// Serde adapter keeping snapshot/sink CSVs in the fixed timestamp format
/// rather than chrono's default ISO-8601 rendering.
pub mod timestamp_format {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    use super::TIMESTAMP_FORMAT;

    pub fn serialize<S>(dt: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&dt.format(TIMESTAMP_FORMAT).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&s, TIMESTAMP_FORMAT).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_membership_spellings_all_map_to_formula_label() {
        for raw in [
            "Membership type",
            "Memebership type",
            "Membership Type",
            "Formula",
        ] {
            assert_eq!(canonical_field(raw), Some("formula_label"));
        }
    }

    #[test]
    fn test_unknown_header_is_not_canonical() {
        assert_eq!(canonical_field("Departure temperature (°C)"), None);
        assert_eq!(canonical_field("departure"), None); // case-sensitive
    }

    #[test]
    fn test_every_alias_targets_a_canonical_field() {
        for (_, field) in COLUMN_ALIASES {
            assert!(
                CANONICAL_FIELDS.contains(field),
                "alias target {field} missing from canonical set"
            );
        }
    }

    #[test]
    fn test_canonical_field_count() {
        assert_eq!(CANONICAL_FIELDS.len(), 9);
    }
}
