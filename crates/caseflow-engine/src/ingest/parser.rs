//! CSV parsing for uploaded case files
//!
//! Parsing is strict: the header must carry the required canonical columns,
//! and each data row either normalizes into a [`CanonicalCase`] or is
//! reported as a row-level failure for the pipeline's error budget. Vendor
//! column-mapping heuristics live upstream of this boundary.

use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

use crate::error::{EngineError, EngineResult};

use super::models::CanonicalCase;

/// Columns every upload must provide.
pub const REQUIRED_COLUMNS: &[&str] = &["case_number", "claimant", "respondent", "filed_date"];

/// One data row from the uploaded file
#[derive(Debug, Clone)]
pub struct ParsedRow {
    /// 0-based data row index (header excluded)
    pub row_index: i32,
    /// Raw column values as read from the file, retained for retry
    pub raw: JsonValue,
    /// Normalized record, or why the row was rejected
    pub result: Result<CanonicalCase, String>,
}

/// Parse an uploaded CSV file into rows.
///
/// File-level problems (unreadable header, missing required columns) are
/// errors; row-level problems are data carried in the returned rows.
pub fn parse_case_csv(bytes: &[u8]) -> EngineResult<Vec<ParsedRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(bytes);

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| EngineError::Validation(format!("unreadable CSV header: {}", e)))?
        .iter()
        .map(|h| h.trim().to_lowercase())
        .collect();

    for required in REQUIRED_COLUMNS {
        if !headers.iter().any(|h| h == required) {
            return Err(EngineError::Validation(format!(
                "missing required column '{}'",
                required
            )));
        }
    }

    let mut rows = Vec::new();

    for (row_index, record) in reader.records().enumerate() {
        let row_index = row_index as i32;

        match record {
            Ok(record) => {
                let fields: BTreeMap<String, String> = headers
                    .iter()
                    .zip(record.iter())
                    .map(|(name, value)| (name.clone(), value.to_string()))
                    .collect();

                let raw = serde_json::to_value(&fields).unwrap_or(JsonValue::Null);
                let result = CanonicalCase::from_fields(&fields);

                rows.push(ParsedRow {
                    row_index,
                    raw,
                    result,
                });
            },
            Err(e) => {
                rows.push(ParsedRow {
                    row_index,
                    raw: JsonValue::Null,
                    result: Err(format!("unparseable row: {}", e)),
                });
            },
        }
    }

    Ok(rows)
}

/// Re-run the row transformation on raw fields retained from a previous
/// parse. Used by reconciliation retries.
pub fn reparse_raw_row(raw: &JsonValue) -> Result<CanonicalCase, String> {
    let fields: BTreeMap<String, String> = match raw {
        JsonValue::Object(map) => map
            .iter()
            .map(|(name, value)| {
                let value = match value {
                    JsonValue::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (name.clone(), value)
            })
            .collect(),
        _ => return Err("no raw fields retained for this row".to_string()),
    };

    CanonicalCase::from_fields(&fields)
}
