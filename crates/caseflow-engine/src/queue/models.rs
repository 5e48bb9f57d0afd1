//! Job queue data models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use caseflow_common::idempotency::job_dedup_key;

use crate::error::{EngineError, EngineResult};

/// Job lifecycle status
///
/// `pending → processing → {completed | pending (retry) | failed}`; no
/// transition skips `processing`, and every return to `pending` carries an
/// incremented attempt counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl From<String> for JobStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "pending" => JobStatus::Pending,
            "processing" => JobStatus::Processing,
            "completed" => JobStatus::Completed,
            "failed" => JobStatus::Failed,
            _ => JobStatus::Pending,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Typed job payloads, validated at the enqueue boundary.
///
/// The serialized form is tagged with `kind`, which doubles as the
/// `job_type` column, so a handler never has to trust an untyped dictionary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobPayload {
    /// Promote a committed batch and emit its downstream side effects.
    ProcessBatch { batch_id: Uuid, file_hash: String },
    /// Render a case document through the document pipeline.
    GenerateDocument { case_ref: String, template: String },
    /// Push a case status change to an external system of record.
    SyncCaseStatus { case_ref: String, target: String },
}

impl JobPayload {
    pub fn job_type(&self) -> &'static str {
        match self {
            JobPayload::ProcessBatch { .. } => "process_batch",
            JobPayload::GenerateDocument { .. } => "generate_document",
            JobPayload::SyncCaseStatus { .. } => "sync_case_status",
        }
    }

    /// The fields that define "the same unit of work". Timestamps and retry
    /// bookkeeping never appear here.
    pub fn semantic(&self) -> JsonValue {
        // The payload variants carry only semantic fields, so the dedupe
        // identity is the canonical rendering of the payload itself.
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }

    pub fn dedup_key(&self) -> String {
        job_dedup_key(self.job_type(), &self.semantic())
    }
}

/// All job types known to the engine, for workers that serve everything.
pub const ALL_JOB_TYPES: &[&str] = &["process_batch", "generate_document", "sync_case_status"];

/// A job row from the database
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Job {
    pub id: Uuid,
    pub job_type: String,
    pub payload: JsonValue,
    pub dedup_key: String,
    pub priority: i32,
    pub status: String,
    pub attempts: i32,
    pub max_attempts: i32,
    pub run_at: DateTime<Utc>,
    pub locked_at: Option<DateTime<Utc>>,
    pub locked_by: Option<String>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn status(&self) -> JobStatus {
        JobStatus::from(self.status.clone())
    }

    /// Decode the stored payload back into its typed form.
    pub fn typed_payload(&self) -> EngineResult<JobPayload> {
        serde_json::from_value(self.payload.clone()).map_err(|e| {
            EngineError::Validation(format!(
                "Job {} carries an undecodable {} payload: {}",
                self.id, self.job_type, e
            ))
        })
    }
}

/// Parameters for enqueueing a job
#[derive(Debug, Clone)]
pub struct NewJob {
    pub payload: JobPayload,
    pub priority: i32,
    pub run_at: Option<DateTime<Utc>>,
    pub max_attempts: Option<i32>,
}

impl NewJob {
    pub fn new(payload: JobPayload) -> Self {
        Self {
            payload,
            priority: 0,
            run_at: None,
            max_attempts: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Defer the job until `run_at`.
    pub fn with_run_at(mut self, run_at: DateTime<Utc>) -> Self {
        self.run_at = Some(run_at);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

/// Result of an enqueue call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnqueuedJob {
    pub id: Uuid,
    /// False when an equivalent job already existed and its id was returned.
    pub created: bool,
}

/// Queue depth per job type and status
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct QueueDepth {
    pub job_type: String,
    pub status: String,
    pub count: i64,
}

/// Worker liveness row
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WorkerHeartbeat {
    pub worker_id: String,
    pub worker_type: String,
    pub hostname: String,
    pub status: String,
    pub last_seen_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_round_trip() {
        for status in [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(JobStatus::from(status.as_str().to_string()), status);
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
    }

    #[test]
    fn test_payload_tags_match_job_type() {
        let payload = JobPayload::GenerateDocument {
            case_ref: "CV-2026-001".to_string(),
            template: "summons".to_string(),
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["kind"], json!(payload.job_type()));
    }

    #[test]
    fn test_payload_round_trip() {
        let payload = JobPayload::ProcessBatch {
            batch_id: Uuid::new_v4(),
            file_hash: "abc123".to_string(),
        };
        let value = serde_json::to_value(&payload).unwrap();
        let back: JobPayload = serde_json::from_value(value).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn test_dedup_key_stable_per_unit_of_work() {
        let a = JobPayload::SyncCaseStatus {
            case_ref: "CV-2026-001".to_string(),
            target: "court_portal".to_string(),
        };
        let b = a.clone();
        assert_eq!(a.dedup_key(), b.dedup_key());

        let c = JobPayload::SyncCaseStatus {
            case_ref: "CV-2026-002".to_string(),
            target: "court_portal".to_string(),
        };
        assert_ne!(a.dedup_key(), c.dedup_key());
    }

    #[test]
    fn test_new_job_builder() {
        let job = NewJob::new(JobPayload::GenerateDocument {
            case_ref: "CV-2026-001".to_string(),
            template: "summons".to_string(),
        })
        .with_priority(10)
        .with_max_attempts(3);

        assert_eq!(job.priority, 10);
        assert_eq!(job.max_attempts, Some(3));
        assert!(job.run_at.is_none());
    }
}
