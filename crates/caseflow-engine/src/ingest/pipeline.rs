//! Ingest pipeline
//!
//! Turns an uploaded file into committed canonical records exactly once:
//! the file hash claims the batch, row dedupe keys absorb duplicates, and
//! the follow-up job is enqueued in the same transaction that commits the
//! rows. Row-level validation failures become discrepancies instead of
//! aborting the batch, unless their rate breaches the error budget.

use serde_json::json;
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use caseflow_common::idempotency::file_hash;

use crate::audit::{AuditDomain, AuditEvent, AuditSink};
use crate::config::IngestConfig;
use crate::error::EngineResult;
use crate::queue::{JobPayload, JobQueue, NewJob};

use super::models::{ImportResult, ImportRun, ImportStatus};
use super::parser::{parse_case_csv, ParsedRow};

/// File-to-records ingest pipeline
pub struct IngestPipeline {
    pool: PgPool,
    queue: JobQueue,
    audit: AuditSink,
    config: IngestConfig,
}

impl IngestPipeline {
    pub fn new(pool: PgPool, queue: JobQueue, audit: AuditSink, config: IngestConfig) -> Self {
        Self {
            pool,
            queue,
            audit,
            config,
        }
    }

    /// Import an uploaded file.
    ///
    /// Re-submitting byte-identical content is a success that references
    /// the prior batch (`duplicate = true`) and performs no parsing.
    pub async fn import_file(&self, bytes: &[u8], filename: &str) -> EngineResult<ImportResult> {
        let hash = file_hash(bytes);

        let created: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO import_runs (file_hash, file_name, status)
            VALUES ($1, $2, 'pending')
            ON CONFLICT (file_hash) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(&hash)
        .bind(filename)
        .fetch_optional(&self.pool)
        .await?;

        let Some((batch_id,)) = created else {
            return self.duplicate_result(&hash).await;
        };

        self.audit.record(
            AuditEvent::new(AuditDomain::Ingest, "import", "started", batch_id)
                .with_metadata(json!({ "file_name": filename, "file_hash": hash })),
        );

        sqlx::query(
            r#"
            UPDATE import_runs SET status = 'processing', started_at = NOW() WHERE id = $1
            "#,
        )
        .bind(batch_id)
        .execute(&self.pool)
        .await?;

        let rows = match parse_case_csv(bytes) {
            Ok(rows) => rows,
            Err(e) => {
                // File-level failure: nothing row-shaped to keep.
                return self.fail_batch(batch_id, 0, &format!("{}", e)).await;
            },
        };

        let total = rows.len() as i32;
        let invalid = rows.iter().filter(|r| r.result.is_err()).count() as i32;
        let failure_rate = if total > 0 {
            f64::from(invalid) * 100.0 / f64::from(total)
        } else {
            0.0
        };

        self.audit.record(
            AuditEvent::new(AuditDomain::Ingest, "import", "validated", batch_id).with_metadata(
                json!({
                    "rows": total,
                    "invalid": invalid,
                    "failure_rate_pct": failure_rate,
                }),
            ),
        );

        if total > 0 && failure_rate > self.config.error_budget_pct {
            return self.abort_over_budget(batch_id, &rows, failure_rate).await;
        }

        self.commit_batch(batch_id, &hash, &rows).await
    }

    /// Resolve a re-submitted file to its prior run.
    async fn duplicate_result(&self, hash: &str) -> EngineResult<ImportResult> {
        let run = sqlx::query_as::<_, ImportRun>(
            r#"
            SELECT id, file_hash, file_name, status, row_count_expected,
                   row_count_inserted, row_count_skipped, error_detail,
                   created_at, started_at, completed_at
            FROM import_runs
            WHERE file_hash = $1
            "#,
        )
        .bind(hash)
        .fetch_one(&self.pool)
        .await?;

        info!(batch_id = %run.id, "Duplicate file import resolved to existing batch");
        self.audit.record(
            AuditEvent::new(AuditDomain::Ingest, "import", "duplicate", run.id)
                .with_metadata(json!({ "file_hash": hash })),
        );

        Ok(ImportResult {
            batch_id: run.id,
            status: run.status(),
            expected: run.row_count_expected.unwrap_or(0),
            inserted: 0,
            skipped: 0,
            discrepancies: 0,
            duplicate: true,
        })
    }

    /// Commit valid rows, record invalid ones as discrepancies, and enqueue
    /// the follow-up job — all in one transaction.
    async fn commit_batch(
        &self,
        batch_id: Uuid,
        hash: &str,
        rows: &[ParsedRow],
    ) -> EngineResult<ImportResult> {
        let total = rows.len() as i32;
        let mut inserted = 0;
        let mut skipped = 0;
        let mut discrepancies = 0;

        let mut tx = self.pool.begin().await?;

        for row in rows {
            match &row.result {
                Ok(case) => {
                    let result = sqlx::query(
                        r#"
                        INSERT INTO case_records (batch_id, row_index, dedupe_key, record_data)
                        VALUES ($1, $2, $3, $4)
                        ON CONFLICT (dedupe_key) DO NOTHING
                        "#,
                    )
                    .bind(batch_id)
                    .bind(row.row_index)
                    .bind(case.dedupe_key())
                    .bind(case.record_data())
                    .execute(&mut *tx)
                    .await?;

                    if result.rows_affected() == 1 {
                        inserted += 1;
                    } else {
                        skipped += 1;
                    }
                },
                Err(reason) => {
                    sqlx::query(
                        r#"
                        INSERT INTO discrepancies
                            (batch_id, row_index, error_type, detail, raw_row, status)
                        VALUES ($1, $2, 'validation', $3, $4, 'open')
                        "#,
                    )
                    .bind(batch_id)
                    .bind(row.row_index)
                    .bind(reason)
                    .bind(&row.raw)
                    .execute(&mut *tx)
                    .await?;

                    discrepancies += 1;
                },
            }
        }

        sqlx::query(
            r#"
            UPDATE import_runs
            SET status = 'completed', row_count_expected = $2,
                row_count_inserted = $3, row_count_skipped = $4,
                completed_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(batch_id)
        .bind(total)
        .bind(inserted)
        .bind(skipped)
        .execute(&mut *tx)
        .await?;

        // The follow-up job exists exactly when the rows do.
        self.queue
            .enqueue_in_tx(
                &mut tx,
                NewJob::new(JobPayload::ProcessBatch {
                    batch_id,
                    file_hash: hash.to_string(),
                }),
            )
            .await?;

        tx.commit().await?;

        info!(
            batch_id = %batch_id,
            inserted,
            skipped,
            discrepancies,
            "Batch committed"
        );
        self.audit.record(
            AuditEvent::new(AuditDomain::Ingest, "import", "committed", batch_id).with_metadata(
                json!({
                    "inserted": inserted,
                    "skipped": skipped,
                    "discrepancies": discrepancies,
                }),
            ),
        );

        Ok(ImportResult {
            batch_id,
            status: ImportStatus::Completed,
            expected: total,
            inserted,
            skipped,
            discrepancies,
            duplicate: false,
        })
    }

    /// Roll the batch back entirely: zero rows commit, and every row is
    /// preserved as a discrepancy so the whole file remains available for
    /// retry investigation.
    async fn abort_over_budget(
        &self,
        batch_id: Uuid,
        rows: &[ParsedRow],
        failure_rate: f64,
    ) -> EngineResult<ImportResult> {
        let total = rows.len() as i32;
        let detail = format!(
            "validation failure rate {:.1}% exceeds error budget {:.1}%",
            failure_rate, self.config.error_budget_pct
        );

        let mut tx = self.pool.begin().await?;

        for row in rows {
            let (error_type, row_detail) = match &row.result {
                Ok(_) => ("batch_aborted", detail.clone()),
                Err(reason) => ("validation", reason.clone()),
            };

            sqlx::query(
                r#"
                INSERT INTO discrepancies
                    (batch_id, row_index, error_type, detail, raw_row, status)
                VALUES ($1, $2, $3, $4, $5, 'open')
                "#,
            )
            .bind(batch_id)
            .bind(row.row_index)
            .bind(error_type)
            .bind(&row_detail)
            .bind(&row.raw)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"
            UPDATE import_runs
            SET status = 'failed', row_count_expected = $2,
                row_count_inserted = 0, row_count_skipped = 0,
                error_detail = $3, completed_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(batch_id)
        .bind(total)
        .bind(&detail)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        warn!(batch_id = %batch_id, failure_rate, "Batch rejected over error budget");
        self.audit.record(
            AuditEvent::new(AuditDomain::Ingest, "import", "failed", batch_id)
                .with_metadata(json!({ "reason": detail, "rows": total })),
        );

        Ok(ImportResult {
            batch_id,
            status: ImportStatus::Failed,
            expected: total,
            inserted: 0,
            skipped: 0,
            discrepancies: total,
            duplicate: false,
        })
    }

    /// Mark the run failed for a file-level problem.
    async fn fail_batch(
        &self,
        batch_id: Uuid,
        total: i32,
        detail: &str,
    ) -> EngineResult<ImportResult> {
        sqlx::query(
            r#"
            UPDATE import_runs
            SET status = 'failed', row_count_expected = $2, error_detail = $3,
                completed_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(batch_id)
        .bind(total)
        .bind(detail)
        .execute(&self.pool)
        .await?;

        warn!(batch_id = %batch_id, detail, "Batch failed");
        self.audit.record(
            AuditEvent::new(AuditDomain::Ingest, "import", "failed", batch_id)
                .with_metadata(json!({ "reason": detail })),
        );

        Ok(ImportResult {
            batch_id,
            status: ImportStatus::Failed,
            expected: total,
            inserted: 0,
            skipped: 0,
            discrepancies: 0,
            duplicate: false,
        })
    }

    /// Fetch one run by id.
    pub async fn get_run(&self, batch_id: Uuid) -> EngineResult<Option<ImportRun>> {
        let run = sqlx::query_as::<_, ImportRun>(
            r#"
            SELECT id, file_hash, file_name, status, row_count_expected,
                   row_count_inserted, row_count_skipped, error_detail,
                   created_at, started_at, completed_at
            FROM import_runs
            WHERE id = $1
            "#,
        )
        .bind(batch_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(run)
    }
}
