//! Audit event data models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Default number of audit events returned per query
pub const DEFAULT_AUDIT_QUERY_LIMIT: i64 = 100;

/// Subsystem an audit event originates from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditDomain {
    Ingest,
    Queue,
    Outbox,
    Reconcile,
}

impl AuditDomain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ingest => "ingest",
            Self::Queue => "queue",
            Self::Outbox => "outbox",
            Self::Reconcile => "reconcile",
        }
    }
}

impl std::fmt::Display for AuditDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A lifecycle event to be recorded
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub domain: AuditDomain,
    /// Lifecycle stage within the domain (e.g. "import", "claim", "delivery")
    pub stage: String,
    /// What happened at that stage (e.g. "started", "committed", "failed")
    pub event: String,
    /// Ties every event of one logical flow together
    pub correlation_id: Uuid,
    pub metadata: Option<JsonValue>,
}

impl AuditEvent {
    pub fn new(
        domain: AuditDomain,
        stage: impl Into<String>,
        event: impl Into<String>,
        correlation_id: Uuid,
    ) -> Self {
        Self {
            domain,
            stage: stage.into(),
            event: event.into(),
            correlation_id,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: JsonValue) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Audit event as stored in the database
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct StoredAuditEvent {
    pub id: Uuid,
    pub domain: String,
    pub stage: String,
    pub event: String,
    pub correlation_id: Uuid,
    pub metadata: Option<JsonValue>,
    pub recorded_at: DateTime<Utc>,
}
