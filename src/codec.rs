//! CSV encoding and decoding helpers
//!
//! All tabular artifacts in the pipeline are CSV with a single header row.
//! Column order is the row map's key order; scalar values pass through as
//! text while composite values (arrays, objects) are flattened to their JSON
//! representation.

use std::path::Path;

use crate::error::Result;
use crate::types::{FailedRow, Row};

/// Flatten a JSON value to its CSV cell text
pub fn flatten_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        composite => composite.to_string(),
    }
}

/// Serialize rows to CSV bytes
///
/// Headers come from the first row's keys; later rows contribute cells in
/// header order, with missing keys rendered empty. An empty slice produces
/// empty output (no header row).
pub fn write_rows(rows: &[Row]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());

    let Some(first) = rows.first() else {
        return Ok(Vec::new());
    };
    let headers: Vec<&String> = first.keys().collect();
    writer.write_record(headers.iter().map(|h| h.as_str()))?;

    for row in rows {
        let record: Vec<String> = headers
            .iter()
            .map(|h| row.get(*h).map(flatten_value).unwrap_or_default())
            .collect();
        writer.write_record(&record)?;
    }

    writer
        .into_inner()
        .map_err(|e| crate::error::Error::Other(format!("CSV flush failed: {e}")))
}

/// Serialize failed rows to CSV bytes with `origin_row` and `error` columns appended
pub fn write_failed_rows(rows: &[FailedRow]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());

    let Some(first) = rows.first() else {
        return Ok(Vec::new());
    };
    let headers: Vec<&String> = first.row.keys().collect();
    let mut header_record: Vec<&str> = headers.iter().map(|h| h.as_str()).collect();
    header_record.push("origin_row");
    header_record.push("error");
    writer.write_record(&header_record)?;

    for failed in rows {
        let mut record: Vec<String> = headers
            .iter()
            .map(|h| failed.row.get(*h).map(flatten_value).unwrap_or_default())
            .collect();
        record.push(failed.origin_row.to_string());
        record.push(failed.error.clone());
        writer.write_record(&record)?;
    }

    writer
        .into_inner()
        .map_err(|e| crate::error::Error::Other(format!("CSV flush failed: {e}")))
}

/// Parse CSV bytes into rows of string values
pub fn read_rows(bytes: &[u8]) -> Result<Vec<Row>> {
    let mut reader = csv::Reader::from_reader(bytes);
    let headers = reader.headers()?.clone();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let mut row = Row::new();
        for (header, field) in headers.iter().zip(record.iter()) {
            row.insert(
                header.to_string(),
                serde_json::Value::String(field.to_string()),
            );
        }
        rows.push(row);
    }
    Ok(rows)
}

/// Read the header row of a CSV file
pub fn read_file_headers(path: &Path) -> Result<Vec<String>> {
    let mut reader = csv::Reader::from_path(path)?;
    Ok(reader.headers()?.iter().map(str::to_string).collect())
}

/// Count data rows (excluding the header) in a CSV file
pub fn count_data_rows(path: &Path) -> Result<u64> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut count = 0u64;
    for record in reader.records() {
        record?;
        count += 1;
    }
    Ok(count)
}

/// Read the data row slice `[offset, offset + limit)` from a CSV file
pub fn read_row_range(path: &Path, offset: u64, limit: usize) -> Result<Vec<Row>> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();

    let mut rows = Vec::with_capacity(limit);
    for record in reader.records().skip(offset as usize).take(limit) {
        let record = record?;
        let mut row = Row::new();
        for (header, field) in headers.iter().zip(record.iter()) {
            row.insert(
                header.to_string(),
                serde_json::Value::String(field.to_string()),
            );
        }
        rows.push(row);
    }
    Ok(rows)
}

/// Concatenate CSV tables in order, keeping a single header row
///
/// The first non-empty part contributes the header; data records from every
/// part follow in the order given. Parts must share a column layout.
pub fn concat_tables(parts: &[Vec<u8>]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    let mut header_written = false;

    for part in parts {
        if part.is_empty() {
            continue;
        }
        let mut reader = csv::Reader::from_reader(part.as_slice());
        if !header_written {
            writer.write_record(reader.headers()?)?;
            header_written = true;
        }
        for record in reader.records() {
            writer.write_record(&record?)?;
        }
    }

    writer
        .into_inner()
        .map_err(|e| crate::error::Error::Other(format!("CSV flush failed: {e}")))
}
