//! Durable job queue operations
//!
//! FIFO-with-priority queue over the `jobs` table. Enqueueing is idempotent
//! on `(job_type, dedup_key)`; claiming uses skip-locked selection so
//! concurrent workers partition the pending set without blocking each other
//! or ever observing the same row as claimable.

use chrono::Utc;
use serde_json::json;
use sqlx::{PgPool, Postgres, Transaction};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audit::{AuditDomain, AuditEvent, AuditSink};
use crate::config::QueueConfig;
use crate::error::{EngineError, EngineResult};

use super::models::{EnqueuedJob, Job, JobStatus, NewJob, QueueDepth, WorkerHeartbeat};

/// Handle to the durable job queue
#[derive(Clone)]
pub struct JobQueue {
    pool: PgPool,
    audit: AuditSink,
    config: QueueConfig,
}

impl JobQueue {
    pub fn new(pool: PgPool, audit: AuditSink, config: QueueConfig) -> Self {
        Self {
            pool,
            audit,
            config,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Enqueue a job, deduplicating on `(job_type, dedup_key)`.
    ///
    /// Enqueueing an equivalent unit of work twice is a no-op returning the
    /// existing id with `created = false`.
    pub async fn enqueue(&self, job: NewJob) -> EngineResult<EnqueuedJob> {
        let mut tx = self.pool.begin().await?;
        let enqueued = self.enqueue_in_tx(&mut tx, job).await?;
        tx.commit().await?;
        Ok(enqueued)
    }

    /// Enqueue inside a caller-owned transaction.
    ///
    /// Producers that must couple the job to a business mutation (the ingest
    /// pipeline committing rows, for instance) call this so the job exists
    /// exactly when the mutation does.
    pub async fn enqueue_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        job: NewJob,
    ) -> EngineResult<EnqueuedJob> {
        let job_type = job.payload.job_type();
        let dedup_key = job.payload.dedup_key();
        let payload = job.payload.semantic();
        let max_attempts = job.max_attempts.unwrap_or(self.config.max_attempts);

        let inserted: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO jobs (job_type, payload, dedup_key, priority, status, max_attempts, run_at)
            VALUES ($1, $2, $3, $4, 'pending', $5, COALESCE($6, NOW()))
            ON CONFLICT (job_type, dedup_key) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(job_type)
        .bind(&payload)
        .bind(&dedup_key)
        .bind(job.priority)
        .bind(max_attempts)
        .bind(job.run_at)
        .fetch_optional(&mut **tx)
        .await?;

        if let Some((id,)) = inserted {
            self.audit.record(
                AuditEvent::new(AuditDomain::Queue, "enqueue", "enqueued", id)
                    .with_metadata(json!({ "job_type": job_type })),
            );
            debug!(job_id = %id, job_type, "Job enqueued");
            return Ok(EnqueuedJob { id, created: true });
        }

        // The unique constraint absorbed the insert: resolve to the job that
        // already represents this unit of work.
        let (existing,): (Uuid,) = sqlx::query_as(
            r#"
            SELECT id FROM jobs WHERE job_type = $1 AND dedup_key = $2
            "#,
        )
        .bind(job_type)
        .bind(&dedup_key)
        .fetch_one(&mut **tx)
        .await?;

        debug!(job_id = %existing, job_type, "Duplicate enqueue resolved to existing job");
        Ok(EnqueuedJob {
            id: existing,
            created: false,
        })
    }

    /// Atomically claim the oldest eligible pending job of one of the given
    /// types.
    ///
    /// Exactly one concurrent caller observes any given row: candidates are
    /// selected with `FOR UPDATE SKIP LOCKED`, so an in-flight claim is
    /// invisible to other workers until committed and never blocks them.
    /// The claim stamps `locked_at`/`locked_by` and increments `attempts`.
    pub async fn claim_next(
        &self,
        job_types: &[&str],
        worker_id: &str,
    ) -> EngineResult<Option<Job>> {
        let types: Vec<String> = job_types.iter().map(|t| t.to_string()).collect();

        let job = sqlx::query_as::<_, Job>(
            r#"
            UPDATE jobs
            SET status = 'processing',
                locked_at = NOW(),
                locked_by = $1,
                attempts = attempts + 1,
                updated_at = NOW()
            WHERE id = (
                SELECT id FROM jobs
                WHERE status = 'pending' AND run_at <= NOW() AND job_type = ANY($2)
                ORDER BY priority DESC, created_at
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING id, job_type, payload, dedup_key, priority, status, attempts,
                      max_attempts, run_at, locked_at, locked_by, last_error,
                      created_at, updated_at, completed_at
            "#,
        )
        .bind(worker_id)
        .bind(&types)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(ref job) = job {
            self.audit.record(
                AuditEvent::new(AuditDomain::Queue, "claim", "claimed", job.id).with_metadata(
                    json!({
                        "job_type": job.job_type,
                        "worker_id": worker_id,
                        "attempt": job.attempts,
                    }),
                ),
            );
            debug!(job_id = %job.id, worker_id, attempt = job.attempts, "Job claimed");
        }

        Ok(job)
    }

    /// Mark a claimed job as successfully completed.
    pub async fn complete(&self, job_id: Uuid) -> EngineResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'completed', completed_at = NOW(), updated_at = NOW(),
                locked_at = NULL, locked_by = NULL, last_error = NULL
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(EngineError::Validation(format!(
                "Job {} is not in processing; completion refused",
                job_id
            )));
        }

        self.audit
            .record(AuditEvent::new(AuditDomain::Queue, "execute", "completed", job_id));
        info!(job_id = %job_id, "Job completed");

        Ok(())
    }

    /// Record a failed attempt.
    ///
    /// While attempt budget remains the job returns to `pending` with
    /// `run_at` pushed out by `backoff`; once the budget is exhausted it
    /// becomes terminally `failed` and waits for manual intervention.
    pub async fn fail(
        &self,
        job_id: Uuid,
        error: &str,
        backoff: Duration,
    ) -> EngineResult<JobStatus> {
        let next_run = Utc::now()
            + chrono::Duration::from_std(backoff)
                .unwrap_or_else(|_| chrono::Duration::seconds(0));

        let row: Option<(String, i32)> = sqlx::query_as(
            r#"
            UPDATE jobs
            SET status = CASE WHEN attempts >= max_attempts THEN 'failed' ELSE 'pending' END,
                run_at = CASE WHEN attempts >= max_attempts THEN run_at ELSE $2 END,
                last_error = $3,
                locked_at = NULL, locked_by = NULL, updated_at = NOW()
            WHERE id = $1 AND status = 'processing'
            RETURNING status, attempts
            "#,
        )
        .bind(job_id)
        .bind(next_run)
        .bind(error)
        .fetch_optional(&self.pool)
        .await?;

        let (status, attempts) = row.ok_or_else(|| {
            EngineError::Validation(format!(
                "Job {} is not in processing; failure refused",
                job_id
            ))
        })?;
        let status = JobStatus::from(status);

        match status {
            JobStatus::Failed => {
                warn!(job_id = %job_id, attempts, error, "Job failed permanently");
                self.audit.record(
                    AuditEvent::new(AuditDomain::Queue, "execute", "failed", job_id)
                        .with_metadata(json!({ "attempts": attempts, "error": error })),
                );
            },
            _ => {
                debug!(job_id = %job_id, attempts, error, "Job failed, retry scheduled");
                self.audit.record(
                    AuditEvent::new(AuditDomain::Queue, "execute", "retry_scheduled", job_id)
                        .with_metadata(json!({ "attempts": attempts, "error": error })),
                );
            },
        }

        Ok(status)
    }

    /// Upsert a worker liveness record.
    pub async fn heartbeat(
        &self,
        worker_id: &str,
        worker_type: &str,
        hostname: &str,
        status: &str,
    ) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO worker_heartbeats (worker_id, worker_type, hostname, status, last_seen_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (worker_id) DO UPDATE
            SET worker_type = EXCLUDED.worker_type,
                hostname = EXCLUDED.hostname,
                status = EXCLUDED.status,
                last_seen_at = NOW()
            "#,
        )
        .bind(worker_id)
        .bind(worker_type)
        .bind(hostname)
        .bind(status)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Fetch one job by id.
    pub async fn get_job(&self, job_id: Uuid) -> EngineResult<Option<Job>> {
        let job = sqlx::query_as::<_, Job>(
            r#"
            SELECT id, job_type, payload, dedup_key, priority, status, attempts,
                   max_attempts, run_at, locked_at, locked_by, last_error,
                   created_at, updated_at, completed_at
            FROM jobs
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(job)
    }

    /// Queue depth per job type and status, for operator dashboards.
    pub async fn depth(&self) -> EngineResult<Vec<QueueDepth>> {
        let rows = sqlx::query_as::<_, QueueDepth>(
            r#"
            SELECT job_type, status, COUNT(*) AS count
            FROM jobs
            GROUP BY job_type, status
            ORDER BY job_type, status
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Number of terminally failed jobs awaiting manual intervention.
    pub async fn failed_count(&self) -> EngineResult<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM jobs WHERE status = 'failed'")
                .fetch_one(&self.pool)
                .await?;

        Ok(count)
    }

    /// Recently seen workers, for operator dashboards.
    pub async fn workers(&self) -> EngineResult<Vec<WorkerHeartbeat>> {
        let rows = sqlx::query_as::<_, WorkerHeartbeat>(
            r#"
            SELECT worker_id, worker_type, hostname, status, last_seen_at
            FROM worker_heartbeats
            ORDER BY last_seen_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}
