//! Database queries for the audit trail

use sqlx::PgPool;
use uuid::Uuid;

use super::models::{AuditEvent, StoredAuditEvent, DEFAULT_AUDIT_QUERY_LIMIT};
use crate::error::EngineResult;

/// Append one event to the audit trail.
pub async fn insert_event(pool: &PgPool, event: &AuditEvent) -> EngineResult<()> {
    sqlx::query(
        r#"
        INSERT INTO audit_events (domain, stage, event, correlation_id, metadata)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(event.domain.as_str())
    .bind(&event.stage)
    .bind(&event.event)
    .bind(event.correlation_id)
    .bind(&event.metadata)
    .execute(pool)
    .await?;

    Ok(())
}

/// Recent events for one correlation id, newest first.
pub async fn recent_events(
    pool: &PgPool,
    correlation_id: Uuid,
    limit: Option<i64>,
) -> EngineResult<Vec<StoredAuditEvent>> {
    let events = sqlx::query_as::<_, StoredAuditEvent>(
        r#"
        SELECT id, domain, stage, event, correlation_id, metadata, recorded_at
        FROM audit_events
        WHERE correlation_id = $1
        ORDER BY recorded_at DESC
        LIMIT $2
        "#,
    )
    .bind(correlation_id)
    .bind(limit.unwrap_or(DEFAULT_AUDIT_QUERY_LIMIT))
    .fetch_all(pool)
    .await?;

    Ok(events)
}
