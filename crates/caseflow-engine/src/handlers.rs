//! Built-in job handlers
//!
//! Each handler turns one job type into its business mutation plus the
//! outbox messages for its side effects, written in a single transaction.
//! Handlers are idempotent against re-execution: promotions are guarded by
//! `promoted_at`, and duplicate side effects collapse downstream via the
//! delivery idempotency key.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::json;
use sqlx::PgPool;
use tracing::info;

use crate::ingest::ImportRun;
use crate::outbox::{self, SideEffect};
use crate::queue::{Job, JobHandler, JobPayload};

/// Promotes a committed batch and emits its batch-committed notifications.
pub struct ProcessBatchHandler {
    pool: PgPool,
    /// Consumer endpoint notified when a batch lands, when registered
    webhook_url: Option<String>,
    /// Operations mailbox for import summaries, when configured
    notify_email: Option<String>,
}

impl ProcessBatchHandler {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            webhook_url: None,
            notify_email: None,
        }
    }

    pub fn with_webhook_url(mut self, url: impl Into<String>) -> Self {
        self.webhook_url = Some(url.into());
        self
    }

    pub fn with_notify_email(mut self, email: impl Into<String>) -> Self {
        self.notify_email = Some(email.into());
        self
    }
}

#[async_trait]
impl JobHandler for ProcessBatchHandler {
    fn job_type(&self) -> &'static str {
        "process_batch"
    }

    async fn run(&self, job: &Job) -> Result<()> {
        let JobPayload::ProcessBatch {
            batch_id,
            file_hash,
        } = job.typed_payload()?
        else {
            anyhow::bail!("process_batch handler received a foreign payload");
        };

        let mut tx = self.pool.begin().await.context("begin promotion")?;

        let promoted = sqlx::query(
            r#"
            UPDATE case_records
            SET promoted_at = NOW()
            WHERE batch_id = $1 AND promoted_at IS NULL
            "#,
        )
        .bind(batch_id)
        .execute(&mut *tx)
        .await
        .context("promote case records")?
        .rows_affected();

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
        .fetch_one(&mut *tx)
        .await
        .context("load import run")?;

        if let Some(url) = &self.webhook_url {
            outbox::enqueue(
                &mut tx,
                &SideEffect::Webhook {
                    url: url.clone(),
                    event: "batch.committed".to_string(),
                    body: json!({
                        "batch_id": batch_id,
                        "file_hash": file_hash,
                        "file_name": run.file_name,
                        "inserted": run.row_count_inserted,
                        "skipped": run.row_count_skipped,
                    }),
                },
                Some(batch_id),
            )
            .await?;
        }

        if let Some(to) = &self.notify_email {
            outbox::enqueue(
                &mut tx,
                &SideEffect::Email {
                    to: to.clone(),
                    subject: format!("Import {} committed", run.file_name),
                    body: format!(
                        "Batch {} committed: {} rows inserted, {} skipped.",
                        batch_id, run.row_count_inserted, run.row_count_skipped
                    ),
                },
                Some(batch_id),
            )
            .await?;
        }

        tx.commit().await.context("commit promotion")?;

        info!(batch_id = %batch_id, promoted, "Batch promoted");
        Ok(())
    }
}

/// Requests a document render through the pdf channel.
pub struct GenerateDocumentHandler {
    pool: PgPool,
}

impl GenerateDocumentHandler {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobHandler for GenerateDocumentHandler {
    fn job_type(&self) -> &'static str {
        "generate_document"
    }

    async fn run(&self, job: &Job) -> Result<()> {
        let JobPayload::GenerateDocument { case_ref, template } = job.typed_payload()? else {
            anyhow::bail!("generate_document handler received a foreign payload");
        };

        let mut tx = self.pool.begin().await?;
        outbox::enqueue(
            &mut tx,
            &SideEffect::Pdf {
                output_key: format!("documents/{}/{}.pdf", case_ref, template),
                template,
                case_ref,
            },
            Some(job.id),
        )
        .await?;
        tx.commit().await?;

        Ok(())
    }
}

/// Pushes a case status change to a partner system.
pub struct SyncCaseStatusHandler {
    pool: PgPool,
}

impl SyncCaseStatusHandler {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobHandler for SyncCaseStatusHandler {
    fn job_type(&self) -> &'static str {
        "sync_case_status"
    }

    async fn run(&self, job: &Job) -> Result<()> {
        let JobPayload::SyncCaseStatus { case_ref, target } = job.typed_payload()? else {
            anyhow::bail!("sync_case_status handler received a foreign payload");
        };

        let mut tx = self.pool.begin().await?;
        outbox::enqueue(
            &mut tx,
            &SideEffect::ExternalApi {
                endpoint: target,
                body: json!({ "case_ref": case_ref }),
            },
            Some(job.id),
        )
        .await?;
        tx.commit().await?;

        Ok(())
    }
}
