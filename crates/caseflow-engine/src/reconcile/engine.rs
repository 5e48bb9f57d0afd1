//! Reconciliation engine
//!
//! Audits committed batches for drift between what the source file declared
//! and what the store holds, maintains the discrepancy dead-letter queue,
//! and runs the retry/dismiss remediation workflows.

use serde_json::json;
use sqlx::PgPool;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audit::{AuditDomain, AuditEvent, AuditSink};
use crate::config::ReconcileConfig;
use crate::error::{EngineError, EngineResult};
use crate::ingest::reparse_raw_row;

use super::models::{BatchVerification, Discrepancy, DiscrepancyFilter, RetryOutcome};

/// Error type recorded for rows that vanished between ingest stages.
pub const ERROR_TYPE_ROW_COUNT_MISMATCH: &str = "row_count_mismatch";

/// Drift detection and remediation over committed batches
pub struct ReconcileEngine {
    pool: PgPool,
    audit: AuditSink,
    config: ReconcileConfig,
}

impl ReconcileEngine {
    pub fn new(pool: PgPool, audit: AuditSink, config: ReconcileConfig) -> Self {
        Self {
            pool,
            audit,
            config,
        }
    }

    /// Compare a batch's declared row count against rows actually stored.
    pub async fn verify_batch(&self, batch_id: Uuid) -> EngineResult<BatchVerification> {
        let row: Option<(Option<i32>,)> =
            sqlx::query_as("SELECT row_count_expected FROM import_runs WHERE id = $1")
                .bind(batch_id)
                .fetch_optional(&self.pool)
                .await?;

        let expected = row
            .ok_or_else(|| EngineError::not_found("import run", batch_id))?
            .0
            .unwrap_or(0) as i64;

        let (actual,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM case_records WHERE batch_id = $1")
                .bind(batch_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(BatchVerification::new(batch_id, expected, actual))
    }

    /// Sweep completed batches for rows lost between ingest stages.
    ///
    /// A source row must be accounted for as stored, deduplicated, or
    /// discrepant; any shortfall opens a batch-level discrepancy (once per
    /// batch, not once per sweep). Returns the verifications of the batches
    /// found degraded.
    pub async fn audit_completed_batches(&self) -> EngineResult<Vec<BatchVerification>> {
        let drifted: Vec<(Uuid, i64, i64, i64)> = sqlx::query_as(
            r#"
            SELECT r.id,
                   COALESCE(r.row_count_expected, 0)::bigint AS expected,
                   (SELECT COUNT(*) FROM case_records c WHERE c.batch_id = r.id) AS actual,
                   r.row_count_skipped::bigint
                   + (SELECT COUNT(*) FROM discrepancies d
                      WHERE d.batch_id = r.id AND d.row_index IS NOT NULL) AS absorbed
            FROM import_runs r
            WHERE r.status = 'completed'
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut degraded = Vec::new();

        for (batch_id, expected, actual, absorbed) in drifted {
            let unaccounted = expected - actual - absorbed;
            if unaccounted <= 0 {
                continue;
            }

            let verification = BatchVerification::new(batch_id, expected, actual);
            let detail = format!(
                "{} of {} source rows are neither stored, deduplicated, nor discrepant",
                unaccounted, expected
            );

            // One open drift record per batch; repeated sweeps refresh it.
            let inserted: Option<(Uuid,)> = sqlx::query_as(
                r#"
                INSERT INTO discrepancies (batch_id, error_type, detail, status)
                SELECT $1, $2, $3, 'open'
                WHERE NOT EXISTS (
                    SELECT 1 FROM discrepancies
                    WHERE batch_id = $1 AND error_type = $2
                      AND status IN ('open', 'retrying')
                )
                RETURNING id
                "#,
            )
            .bind(batch_id)
            .bind(ERROR_TYPE_ROW_COUNT_MISMATCH)
            .bind(&detail)
            .fetch_optional(&self.pool)
            .await?;

            if let Some((discrepancy_id,)) = inserted {
                warn!(
                    batch_id = %batch_id,
                    unaccounted,
                    integrity_score = verification.integrity_score,
                    "Batch drift detected"
                );
                self.audit.record(
                    AuditEvent::new(AuditDomain::Reconcile, "sweep", "discrepancy_opened", batch_id)
                        .with_metadata(json!({
                            "discrepancy_id": discrepancy_id,
                            "unaccounted": unaccounted,
                            "integrity_score": verification.integrity_score,
                        })),
                );
            }

            degraded.push(verification);
        }

        if degraded.is_empty() {
            debug!("Reconciliation sweep found no drift");
        }

        Ok(degraded)
    }

    /// The dead-letter queue view.
    pub async fn list_discrepancies(
        &self,
        filter: DiscrepancyFilter,
    ) -> EngineResult<Vec<Discrepancy>> {
        let mut sql = String::from(
            r#"
            SELECT id, batch_id, row_index, error_type, detail, raw_row,
                   status, dismiss_reason, created_at, updated_at, resolved_at
            FROM discrepancies
            WHERE 1=1
            "#,
        );

        let mut bind_count = 0;
        if filter.status.is_some() {
            bind_count += 1;
            sql.push_str(&format!(" AND status = ${}", bind_count));
        }
        if filter.error_type.is_some() {
            bind_count += 1;
            sql.push_str(&format!(" AND error_type = ${}", bind_count));
        }
        if filter.batch_id.is_some() {
            bind_count += 1;
            sql.push_str(&format!(" AND batch_id = ${}", bind_count));
        }

        sql.push_str(" ORDER BY created_at DESC");
        bind_count += 1;
        sql.push_str(&format!(" LIMIT ${}", bind_count));

        let mut query = sqlx::query_as::<_, Discrepancy>(&sql);
        if let Some(status) = filter.status {
            query = query.bind(status.as_str());
        }
        if let Some(ref error_type) = filter.error_type {
            query = query.bind(error_type.clone());
        }
        if let Some(batch_id) = filter.batch_id {
            query = query.bind(batch_id);
        }
        query = query.bind(filter.limit.unwrap_or(100));

        Ok(query.fetch_all(&self.pool).await?)
    }

    /// Re-attempt the originating row transformation.
    ///
    /// Success commits the row (insert-or-skip) and resolves the
    /// discrepancy; another failure leaves it open with the fresh error
    /// recorded.
    pub async fn retry(&self, discrepancy_id: Uuid) -> EngineResult<RetryOutcome> {
        let discrepancy = self
            .get_discrepancy(discrepancy_id)
            .await?
            .ok_or_else(|| EngineError::not_found("discrepancy", discrepancy_id))?;

        if discrepancy.status().is_terminal() {
            return Err(EngineError::Validation(format!(
                "Discrepancy {} is already {}",
                discrepancy_id,
                discrepancy.status()
            )));
        }

        sqlx::query(
            "UPDATE discrepancies SET status = 'retrying', updated_at = NOW() WHERE id = $1",
        )
        .bind(discrepancy_id)
        .execute(&self.pool)
        .await?;

        let reparsed = match (&discrepancy.raw_row, discrepancy.row_index) {
            (Some(raw), Some(_)) => reparse_raw_row(raw),
            _ => Err("no raw row retained for this discrepancy".to_string()),
        };

        match reparsed {
            Ok(case) => {
                let mut tx = self.pool.begin().await?;

                let result = sqlx::query(
                    r#"
                    INSERT INTO case_records (batch_id, row_index, dedupe_key, record_data)
                    VALUES ($1, $2, $3, $4)
                    ON CONFLICT DO NOTHING
                    "#,
                )
                .bind(discrepancy.batch_id)
                .bind(discrepancy.row_index)
                .bind(case.dedupe_key())
                .bind(case.record_data())
                .execute(&mut *tx)
                .await?;

                let newly_inserted = result.rows_affected() == 1;
                if newly_inserted {
                    sqlx::query(
                        r#"
                        UPDATE import_runs
                        SET row_count_inserted = row_count_inserted + 1
                        WHERE id = $1
                        "#,
                    )
                    .bind(discrepancy.batch_id)
                    .execute(&mut *tx)
                    .await?;
                }

                sqlx::query(
                    r#"
                    UPDATE discrepancies
                    SET status = 'resolved', resolved_at = NOW(), updated_at = NOW()
                    WHERE id = $1
                    "#,
                )
                .bind(discrepancy_id)
                .execute(&mut *tx)
                .await?;

                tx.commit().await?;

                info!(
                    discrepancy_id = %discrepancy_id,
                    batch_id = %discrepancy.batch_id,
                    newly_inserted,
                    "Discrepancy resolved by retry"
                );
                self.audit.record(
                    AuditEvent::new(
                        AuditDomain::Reconcile,
                        "dlq",
                        "resolved",
                        discrepancy.batch_id,
                    )
                    .with_metadata(json!({
                        "discrepancy_id": discrepancy_id,
                        "newly_inserted": newly_inserted,
                    })),
                );

                Ok(RetryOutcome::Resolved)
            },
            Err(reason) => {
                sqlx::query(
                    r#"
                    UPDATE discrepancies
                    SET status = 'open', detail = $2, updated_at = NOW()
                    WHERE id = $1
                    "#,
                )
                .bind(discrepancy_id)
                .bind(&reason)
                .execute(&self.pool)
                .await?;

                debug!(
                    discrepancy_id = %discrepancy_id,
                    reason = %reason,
                    "Retry failed, discrepancy stays open"
                );
                self.audit.record(
                    AuditEvent::new(
                        AuditDomain::Reconcile,
                        "dlq",
                        "retry_failed",
                        discrepancy.batch_id,
                    )
                    .with_metadata(json!({
                        "discrepancy_id": discrepancy_id,
                        "error": reason,
                    })),
                );

                Ok(RetryOutcome::StillFailing(reason))
            },
        }
    }

    /// Permanently exclude a row with an audited operator decision.
    pub async fn dismiss(&self, discrepancy_id: Uuid, reason: &str) -> EngineResult<()> {
        let discrepancy = self
            .get_discrepancy(discrepancy_id)
            .await?
            .ok_or_else(|| EngineError::not_found("discrepancy", discrepancy_id))?;

        if discrepancy.status().is_terminal() {
            return Err(EngineError::Validation(format!(
                "Discrepancy {} is already {}",
                discrepancy_id,
                discrepancy.status()
            )));
        }

        sqlx::query(
            r#"
            UPDATE discrepancies
            SET status = 'dismissed', dismiss_reason = $2,
                resolved_at = NOW(), updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(discrepancy_id)
        .bind(reason)
        .execute(&self.pool)
        .await?;

        info!(discrepancy_id = %discrepancy_id, reason, "Discrepancy dismissed");
        self.audit.record(
            AuditEvent::new(
                AuditDomain::Reconcile,
                "dlq",
                "dismissed",
                discrepancy.batch_id,
            )
            .with_metadata(json!({
                "discrepancy_id": discrepancy_id,
                "reason": reason,
            })),
        );

        Ok(())
    }

    /// Fetch one discrepancy by id.
    pub async fn get_discrepancy(
        &self,
        discrepancy_id: Uuid,
    ) -> EngineResult<Option<Discrepancy>> {
        let discrepancy = sqlx::query_as::<_, Discrepancy>(
            r#"
            SELECT id, batch_id, row_index, error_type, detail, raw_row,
                   status, dismiss_reason, created_at, updated_at, resolved_at
            FROM discrepancies
            WHERE id = $1
            "#,
        )
        .bind(discrepancy_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(discrepancy)
    }

    /// Integrity scores for every completed batch, for operator dashboards.
    pub async fn integrity_overview(&self) -> EngineResult<Vec<BatchVerification>> {
        let rows: Vec<(Uuid, i64, i64)> = sqlx::query_as(
            r#"
            SELECT r.id,
                   COALESCE(r.row_count_expected, 0)::bigint,
                   (SELECT COUNT(*) FROM case_records c WHERE c.batch_id = r.id)
            FROM import_runs r
            WHERE r.status = 'completed'
            ORDER BY r.created_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(batch_id, expected, actual)| BatchVerification::new(batch_id, expected, actual))
            .collect())
    }

    /// Sweep on an interval until shutdown is signalled.
    pub async fn run_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(
            self.config.sweep_interval_secs,
        ));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.audit_completed_batches().await {
                        warn!(error = %e, "Reconciliation sweep failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Reconciliation engine shutting down");
                        break;
                    }
                }
            }
        }
    }
}
