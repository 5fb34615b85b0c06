//! Schema normalization: raw export files in, canonical trip rows out.
//!
//! The file extension selects the parser (delimited text via `csv`,
//! spreadsheets via `calamine`); both paths feed the same header
//! reconciliation against the alias table.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::Path;

use calamine::{Data, DataType, Reader, open_workbook_auto};
use tracing::debug;

use crate::error::{IngestError, Result};
use crate::schema::{NormalizedRecord, TIMESTAMP_FORMAT, canonical_field};

/// Supported source parsers, keyed off the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Csv,
    Spreadsheet,
}

/// Classifies a file by the first three characters of its extension, so
/// `xls`, `xlsx` and `xlsm` all select the spreadsheet parser.
pub fn file_kind(path: &str) -> Option<FileKind> {
    let ext = Path::new(path)
        .extension()
        .and_then(OsStr::to_str)?
        .to_ascii_lowercase();
    if ext.starts_with("csv") {
        Some(FileKind::Csv)
    } else if ext.starts_with("xls") {
        Some(FileKind::Spreadsheet)
    } else {
        None
    }
}

/// Reads a raw export file and normalizes it to the canonical column set.
///
/// # Errors
///
/// [`IngestError::UnsupportedFileType`] for extensions no parser handles
/// (recoverable, skip the file); [`IngestError::FileFormat`] when a file of
/// a supported kind cannot be read.
pub fn read_batch(path: &str) -> Result<Vec<NormalizedRecord>> {
    match file_kind(path) {
        Some(FileKind::Csv) => read_csv(path),
        Some(FileKind::Spreadsheet) => read_spreadsheet(path),
        None => Err(IngestError::UnsupportedFileType(path.to_string())),
    }
}

fn read_csv(path: &str) -> Result<Vec<NormalizedRecord>> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|e| IngestError::file_format(path, e))?;

    let headers: Vec<String> = rdr
        .headers()
        .map_err(|e| IngestError::file_format(path, e))?
        .iter()
        .map(str::to_string)
        .collect();

    let mut rows = Vec::new();
    for record in rdr.records() {
        let record = record.map_err(|e| IngestError::file_format(path, e))?;
        rows.push(record.iter().map(str::to_string).collect());
    }

    debug!(path, rows = rows.len(), "CSV export read");
    Ok(normalize_rows(&headers, rows))
}

fn read_spreadsheet(path: &str) -> Result<Vec<NormalizedRecord>> {
    let mut workbook = open_workbook_auto(path).map_err(|e| IngestError::file_format(path, e))?;

    let sheet = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| IngestError::file_format(path, "workbook has no sheets"))?;
    let range = workbook
        .worksheet_range(&sheet)
        .map_err(|e| IngestError::file_format(path, e))?;

    let mut rows_iter = range.rows();
    let headers: Vec<String> = match rows_iter.next() {
        Some(header_row) => header_row.iter().map(cell_to_string).collect(),
        None => return Ok(Vec::new()),
    };
    let rows: Vec<Vec<String>> = rows_iter
        .map(|row| row.iter().map(cell_to_string).collect())
        .collect();

    debug!(path, sheet = %sheet, rows = rows.len(), "Spreadsheet export read");
    Ok(normalize_rows(&headers, rows))
}

/// Renders a spreadsheet cell the way the CSV exports spell the same value:
/// datetime cells in the fixed timestamp format, integral floats without a
/// trailing `.0` (bike ids come out of Excel as floats).
fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::DateTime(_) => cell
            .as_datetime()
            .map(|dt| dt.format(TIMESTAMP_FORMAT).to_string())
            .unwrap_or_default(),
        Data::Float(f) if f.fract() == 0.0 && f.is_finite() => format!("{}", *f as i64),
        other => other.to_string(),
    }
}

/// Reconciles raw headers against the alias table and coerces each row into
/// a [`NormalizedRecord`]. Unrecognized columns are dropped; a canonical
/// field claimed by two raw headers keeps the first occurrence. Absent
/// columns (the electric-bike flag in older vintages) stay unknown.
pub fn normalize_rows(headers: &[String], rows: Vec<Vec<String>>) -> Vec<NormalizedRecord> {
    let mut index: HashMap<&'static str, usize> = HashMap::new();
    for (i, name) in headers.iter().enumerate() {
        if let Some(field) = canonical_field(name.trim()) {
            index.entry(field).or_insert(i);
        }
    }

    rows.into_iter()
        .map(|row| {
            let cell = |field: &str| -> Option<&str> {
                index
                    .get(field)
                    .and_then(|&i| row.get(i))
                    .map(|s| s.trim())
                    .filter(|s| !s.is_empty())
            };

            NormalizedRecord {
                date_dep: cell("date_dep").map(str::to_string),
                date_ret: cell("date_ret").map(str::to_string),
                bike_id: cell("bike_id").and_then(parse_bike_id),
                dep_station_label: cell("dep_station_label").map(str::to_string),
                ret_station_label: cell("ret_station_label").map(str::to_string),
                formula_label: cell("formula_label").map(str::to_string),
                covered_distance: cell("covered_distance").and_then(|s| s.parse().ok()),
                duration: cell("duration").and_then(|s| s.parse().ok()),
                is_ebike: cell("is_ebike").and_then(parse_tri_state),
            }
        })
        .collect()
}

/// Coerces an identifier stored as text into an integer. Spreadsheet exports
/// store ids as floats (`"4321.0"`); anything non-numeric becomes null.
fn parse_bike_id(s: &str) -> Option<i64> {
    if let Ok(n) = s.parse::<i64>() {
        return Some(n);
    }
    s.parse::<f64>()
        .ok()
        .filter(|f| f.is_finite() && f.fract() == 0.0)
        .map(|f| f as i64)
}

/// Tri-state boolean cast: unknown stays unknown, never false.
fn parse_tri_state(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::fs;

    fn temp_path(name: &str) -> String {
        format!("{}/{}", env::temp_dir().display(), name)
    }

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn row(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_file_kind_prefix_matching() {
        assert_eq!(file_kind("trips.csv"), Some(FileKind::Csv));
        assert_eq!(file_kind("trips.CSV"), Some(FileKind::Csv));
        assert_eq!(file_kind("trips.xls"), Some(FileKind::Spreadsheet));
        assert_eq!(file_kind("trips.xlsx"), Some(FileKind::Spreadsheet));
        assert_eq!(file_kind("trips.json"), None);
        assert_eq!(file_kind("trips"), None);
    }

    #[test]
    fn test_unsupported_extension_is_recoverable() {
        let err = read_batch("trips.parquet").unwrap_err();
        assert!(matches!(err, IngestError::UnsupportedFileType(_)));
    }

    #[test]
    fn test_unreadable_csv_is_file_format_error() {
        // A directory with a .csv name selects the CSV parser but cannot be read
        let path = temp_path("bss_ingest_test_dir.csv");
        let _ = fs::remove_dir(&path);
        fs::create_dir(&path).unwrap();

        let err = read_batch(&path).unwrap_err();
        assert!(matches!(err, IngestError::FileFormat { .. }));

        fs::remove_dir(&path).unwrap();
    }

    #[test]
    fn test_corrupt_spreadsheet_is_file_format_error() {
        let path = temp_path("bss_ingest_test_corrupt.xlsx");
        fs::write(&path, b"this is not a workbook").unwrap();

        let err = read_batch(&path).unwrap_err();
        assert!(matches!(err, IngestError::FileFormat { .. }));

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_read_csv_normalizes_aliases() {
        let path = temp_path("bss_ingest_test_aliases.csv");
        fs::write(
            &path,
            "Departure,Return,Bike,Departure station,Return station,Memebership type,Covered distance (m),Duration (sec.)\n\
             2024-01-01 10:00:00,2024-01-01 10:20:00,42,Central Station,Harbour,Season pass,3200,1200\n",
        )
        .unwrap();

        let records = read_batch(&path).unwrap();
        assert_eq!(records.len(), 1);
        let rec = &records[0];
        assert_eq!(rec.date_dep.as_deref(), Some("2024-01-01 10:00:00"));
        assert_eq!(rec.bike_id, Some(42));
        assert_eq!(rec.formula_label.as_deref(), Some("Season pass"));
        assert_eq!(rec.covered_distance, Some(3200.0));
        assert_eq!(rec.duration, Some(1200.0));
        // Electric bike column absent in this vintage: unknown, never false
        assert_eq!(rec.is_ebike, None);

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_unrecognized_columns_are_dropped() {
        let records = normalize_rows(
            &headers(&["Departure", "Air temperature (degC)", "Return"]),
            vec![row(&["2024-01-01 10:00:00", "21.5", "2024-01-01 10:20:00"])],
        );
        assert_eq!(records[0].date_dep.as_deref(), Some("2024-01-01 10:00:00"));
        assert_eq!(records[0].date_ret.as_deref(), Some("2024-01-01 10:20:00"));
        // Nothing from the temperature column leaks into the canonical row
        assert_eq!(records[0].covered_distance, None);
    }

    #[test]
    fn test_duplicate_membership_headers_first_wins() {
        let records = normalize_rows(
            &headers(&["Membership type", "Formula"]),
            vec![row(&["Season pass", "Day ticket"])],
        );
        assert_eq!(records[0].formula_label.as_deref(), Some("Season pass"));
    }

    #[test]
    fn test_bike_id_coercion() {
        assert_eq!(parse_bike_id("42"), Some(42));
        assert_eq!(parse_bike_id("-7"), Some(-7));
        assert_eq!(parse_bike_id("4321.0"), Some(4321));
        assert_eq!(parse_bike_id("4321.5"), None);
        assert_eq!(parse_bike_id("bike 42"), None);
        assert_eq!(parse_bike_id("N/A"), None);
    }

    #[test]
    fn test_bike_id_whitespace_is_trimmed_before_coercion() {
        let records = normalize_rows(
            &headers(&["Bike"]),
            vec![row(&["  42  "]), row(&["broken"]), row(&[""])],
        );
        assert_eq!(records[0].bike_id, Some(42));
        assert_eq!(records[1].bike_id, None);
        assert_eq!(records[2].bike_id, None);
    }

    #[test]
    fn test_ebike_tri_state() {
        let records = normalize_rows(
            &headers(&["Electric bike"]),
            vec![
                row(&["True"]),
                row(&["FALSE"]),
                row(&["1"]),
                row(&["0"]),
                row(&[""]),
                row(&["maybe"]),
            ],
        );
        let flags: Vec<_> = records.iter().map(|r| r.is_ebike).collect();
        assert_eq!(
            flags,
            vec![Some(true), Some(false), Some(true), Some(false), None, None]
        );
    }

    #[test]
    fn test_cell_to_string_renders_integral_floats_as_ids() {
        assert_eq!(cell_to_string(&Data::Float(4321.0)), "4321");
        assert_eq!(cell_to_string(&Data::Float(12.5)), "12.5");
        assert_eq!(cell_to_string(&Data::Empty), "");
        assert_eq!(cell_to_string(&Data::String("Harbour".into())), "Harbour");
    }
}
