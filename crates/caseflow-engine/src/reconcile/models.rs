//! Reconciliation data models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Discrepancy lifecycle status
///
/// `resolved` and `dismissed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscrepancyStatus {
    Open,
    Retrying,
    Resolved,
    Dismissed,
}

impl DiscrepancyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscrepancyStatus::Open => "open",
            DiscrepancyStatus::Retrying => "retrying",
            DiscrepancyStatus::Resolved => "resolved",
            DiscrepancyStatus::Dismissed => "dismissed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DiscrepancyStatus::Resolved | DiscrepancyStatus::Dismissed)
    }
}

impl From<String> for DiscrepancyStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "open" => DiscrepancyStatus::Open,
            "retrying" => DiscrepancyStatus::Retrying,
            "resolved" => DiscrepancyStatus::Resolved,
            "dismissed" => DiscrepancyStatus::Dismissed,
            _ => DiscrepancyStatus::Open,
        }
    }
}

impl std::fmt::Display for DiscrepancyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A dead-lettered row or batch-level drift record
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Discrepancy {
    pub id: Uuid,
    pub batch_id: Uuid,
    pub row_index: Option<i32>,
    pub error_type: String,
    pub detail: Option<String>,
    pub raw_row: Option<JsonValue>,
    pub status: String,
    pub dismiss_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Discrepancy {
    pub fn status(&self) -> DiscrepancyStatus {
        DiscrepancyStatus::from(self.status.clone())
    }
}

/// Filter for the dead-letter queue view
#[derive(Debug, Clone, Default)]
pub struct DiscrepancyFilter {
    pub status: Option<DiscrepancyStatus>,
    pub error_type: Option<String>,
    pub batch_id: Option<Uuid>,
    pub limit: Option<i64>,
}

/// Result of verifying one batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchVerification {
    pub batch_id: Uuid,
    /// Rows the source file declared
    pub expected: i64,
    /// Rows actually stored for the batch
    pub actual: i64,
    /// `actual / expected`, clamped to [0, 1]
    pub integrity_score: f64,
}

impl BatchVerification {
    pub fn new(batch_id: Uuid, expected: i64, actual: i64) -> Self {
        let integrity_score = if expected <= 0 {
            1.0
        } else {
            (actual as f64 / expected as f64).clamp(0.0, 1.0)
        };

        Self {
            batch_id,
            expected,
            actual,
            integrity_score,
        }
    }
}

/// Result of retrying a discrepancy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome {
    /// The row transformation succeeded; the record is committed (or was
    /// already present) and the discrepancy is resolved.
    Resolved,
    /// The transformation failed again; the discrepancy stays open.
    StillFailing(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            DiscrepancyStatus::Open,
            DiscrepancyStatus::Retrying,
            DiscrepancyStatus::Resolved,
            DiscrepancyStatus::Dismissed,
        ] {
            assert_eq!(DiscrepancyStatus::from(status.as_str().to_string()), status);
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(DiscrepancyStatus::Resolved.is_terminal());
        assert!(DiscrepancyStatus::Dismissed.is_terminal());
        assert!(!DiscrepancyStatus::Open.is_terminal());
        assert!(!DiscrepancyStatus::Retrying.is_terminal());
    }

    #[test]
    fn test_integrity_score_clamped() {
        let batch_id = Uuid::new_v4();
        assert_eq!(BatchVerification::new(batch_id, 100, 95).integrity_score, 0.95);
        assert_eq!(BatchVerification::new(batch_id, 100, 120).integrity_score, 1.0);
        assert_eq!(BatchVerification::new(batch_id, 0, 0).integrity_score, 1.0);
        assert_eq!(BatchVerification::new(batch_id, 100, 0).integrity_score, 0.0);
    }
}
