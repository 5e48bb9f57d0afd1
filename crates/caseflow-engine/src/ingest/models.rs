//! Ingest data models

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use uuid::Uuid;

use caseflow_common::idempotency::row_dedupe_key;

/// Import run (batch) lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ImportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportStatus::Pending => "pending",
            ImportStatus::Processing => "processing",
            ImportStatus::Completed => "completed",
            ImportStatus::Failed => "failed",
        }
    }
}

impl From<String> for ImportStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "pending" => ImportStatus::Pending,
            "processing" => ImportStatus::Processing,
            "completed" => ImportStatus::Completed,
            "failed" => ImportStatus::Failed,
            _ => ImportStatus::Pending,
        }
    }
}

impl std::fmt::Display for ImportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An import run row from the database
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ImportRun {
    pub id: Uuid,
    pub file_hash: String,
    pub file_name: String,
    pub status: String,
    pub row_count_expected: Option<i32>,
    pub row_count_inserted: i32,
    pub row_count_skipped: i32,
    pub error_detail: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ImportRun {
    pub fn status(&self) -> ImportStatus {
        ImportStatus::from(self.status.clone())
    }
}

/// Outcome of one `import_file` call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportResult {
    pub batch_id: Uuid,
    pub status: ImportStatus,
    /// Rows found in the source file, valid or not
    pub expected: i32,
    /// Rows newly committed
    pub inserted: i32,
    /// Rows absorbed by dedupe (identical logical content already stored)
    pub skipped: i32,
    /// Rows recorded as discrepancies instead of committed
    pub discrepancies: i32,
    /// True when the file hash resolved to a previously imported batch
    pub duplicate: bool,
}

/// A normalized case row ready for commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalCase {
    pub case_number: String,
    pub claimant: String,
    pub respondent: String,
    pub filed_date: NaiveDate,
    /// Remaining columns, carried through untyped
    pub extra: BTreeMap<String, String>,
}

impl CanonicalCase {
    /// Build from raw column values, enforcing the required-field contract.
    pub fn from_fields(fields: &BTreeMap<String, String>) -> Result<Self, String> {
        let required = |name: &str| -> Result<String, String> {
            match fields.get(name).map(|v| v.trim()) {
                Some(value) if !value.is_empty() => Ok(value.to_string()),
                _ => Err(format!("missing required field '{}'", name)),
            }
        };

        let case_number = required("case_number")?;
        let claimant = required("claimant")?;
        let respondent = required("respondent")?;
        let filed_date_raw = required("filed_date")?;

        let filed_date = NaiveDate::parse_from_str(&filed_date_raw, "%Y-%m-%d")
            .map_err(|_| format!("invalid filed_date '{}': expected YYYY-MM-DD", filed_date_raw))?;

        let extra = fields
            .iter()
            .filter(|(name, value)| {
                !matches!(
                    name.as_str(),
                    "case_number" | "claimant" | "respondent" | "filed_date"
                ) && !value.trim().is_empty()
            })
            .map(|(name, value)| (name.clone(), value.trim().to_string()))
            .collect();

        Ok(Self {
            case_number,
            claimant,
            respondent,
            filed_date,
            extra,
        })
    }

    /// Content-derived identity over the canonical fields.
    ///
    /// The same logical record produces the same key regardless of column
    /// order, whitespace, or casing in the source file.
    pub fn dedupe_key(&self) -> String {
        let filed = self.filed_date.format("%Y-%m-%d").to_string();
        row_dedupe_key(&[
            ("case_number", self.case_number.as_str()),
            ("claimant", self.claimant.as_str()),
            ("respondent", self.respondent.as_str()),
            ("filed_date", filed.as_str()),
        ])
    }

    /// JSONB representation stored on the committed record.
    pub fn record_data(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_from_fields_valid() {
        let case = CanonicalCase::from_fields(&fields(&[
            ("case_number", "CV-2026-001"),
            ("claimant", "Acme Corp"),
            ("respondent", "Beta LLC"),
            ("filed_date", "2026-03-15"),
            ("county", "Travis"),
            ("amount", ""),
        ]))
        .unwrap();

        assert_eq!(case.case_number, "CV-2026-001");
        assert_eq!(case.filed_date, NaiveDate::from_ymd_opt(2026, 3, 15).unwrap());
        assert_eq!(case.extra.get("county").map(String::as_str), Some("Travis"));
        assert!(!case.extra.contains_key("amount"));
    }

    #[test]
    fn test_from_fields_missing_required() {
        let err = CanonicalCase::from_fields(&fields(&[
            ("case_number", "CV-2026-001"),
            ("claimant", "  "),
            ("respondent", "Beta LLC"),
            ("filed_date", "2026-03-15"),
        ]))
        .unwrap_err();

        assert!(err.contains("claimant"));
    }

    #[test]
    fn test_from_fields_bad_date() {
        let err = CanonicalCase::from_fields(&fields(&[
            ("case_number", "CV-2026-001"),
            ("claimant", "Acme Corp"),
            ("respondent", "Beta LLC"),
            ("filed_date", "03/15/2026"),
        ]))
        .unwrap_err();

        assert!(err.contains("filed_date"));
    }

    #[test]
    fn test_dedupe_key_ignores_noise() {
        let a = CanonicalCase::from_fields(&fields(&[
            ("case_number", "CV-2026-001"),
            ("claimant", "Acme Corp"),
            ("respondent", "Beta LLC"),
            ("filed_date", "2026-03-15"),
        ]))
        .unwrap();

        let b = CanonicalCase::from_fields(&fields(&[
            ("case_number", "CV-2026-001"),
            ("claimant", "ACME   CORP"),
            ("respondent", "beta llc"),
            ("filed_date", "2026-03-15"),
            ("county", "Travis"),
        ]))
        .unwrap();

        // Extra columns and case/whitespace noise do not change identity.
        assert_eq!(a.dedupe_key(), b.dedupe_key());
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            ImportStatus::Pending,
            ImportStatus::Processing,
            ImportStatus::Completed,
            ImportStatus::Failed,
        ] {
            assert_eq!(ImportStatus::from(status.as_str().to_string()), status);
        }
    }
}
