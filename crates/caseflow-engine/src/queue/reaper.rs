//! Stuck-job reaper
//!
//! Workers crash mid-job; the reaper detects abandoned claims by their
//! expired lock timestamps and fails them with a diagnostic, so the queue
//! never silently leaks work. It also fails jobs that have sat `pending`
//! past a hard ceiling, which indicates the queue itself has stopped
//! draining. Each sweep records its own heartbeat, so a missing reaper is
//! itself detectable from the heartbeat table.

use serde_json::json;
use sqlx::PgPool;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audit::{AuditDomain, AuditEvent, AuditSink};
use crate::config::QueueConfig;
use crate::error::EngineResult;

/// Worker id under which the reaper reports liveness.
pub const REAPER_WORKER_ID: &str = "reaper";

/// Outcome of one reaper sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapReport {
    /// Jobs failed because their worker's lock expired mid-processing
    pub stuck_failed: u64,
    /// Jobs failed because they sat pending past the hard ceiling
    pub stale_failed: u64,
}

/// Periodic reclaimer of abandoned work
pub struct Reaper {
    pool: PgPool,
    audit: AuditSink,
    config: QueueConfig,
    hostname: String,
}

impl Reaper {
    pub fn new(pool: PgPool, audit: AuditSink, config: QueueConfig) -> Self {
        Self {
            pool,
            audit,
            config,
            hostname: hostname::get()
                .unwrap_or_else(|_| "unknown".into())
                .to_string_lossy()
                .to_string(),
        }
    }

    /// Run a single sweep.
    pub async fn run_once(&self) -> EngineResult<ReapReport> {
        let lock_timeout_secs = self.config.lock_timeout.as_secs() as i64;
        let ceiling_hours = self.config.pending_ceiling_hours;

        let stuck_message = format!(
            "reaped: lock held longer than {}s without completion; worker presumed crashed",
            lock_timeout_secs
        );

        let stuck: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            UPDATE jobs
            SET status = 'failed',
                last_error = $2,
                locked_at = NULL, locked_by = NULL, updated_at = NOW()
            WHERE status = 'processing'
              AND locked_at < NOW() - ($1 * INTERVAL '1 second')
            RETURNING id
            "#,
        )
        .bind(lock_timeout_secs)
        .bind(&stuck_message)
        .fetch_all(&self.pool)
        .await?;

        let stale_message = format!(
            "reaped: still pending after {}h; queue is not draining",
            ceiling_hours
        );

        let stale: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            UPDATE jobs
            SET status = 'failed',
                last_error = $2,
                updated_at = NOW()
            WHERE status = 'pending'
              AND created_at < NOW() - ($1 * INTERVAL '1 hour')
            RETURNING id
            "#,
        )
        .bind(ceiling_hours)
        .bind(&stale_message)
        .fetch_all(&self.pool)
        .await?;

        for (job_id,) in &stuck {
            warn!(job_id = %job_id, lock_timeout_secs, "Reaped stuck job");
            self.audit.record(
                AuditEvent::new(AuditDomain::Queue, "reap", "failed", *job_id)
                    .with_metadata(json!({ "reason": "lock_expired" })),
            );
        }
        for (job_id,) in &stale {
            warn!(job_id = %job_id, ceiling_hours, "Reaped stale pending job");
            self.audit.record(
                AuditEvent::new(AuditDomain::Queue, "reap", "failed", *job_id)
                    .with_metadata(json!({ "reason": "pending_ceiling" })),
            );
        }

        // The watchdog watches itself: every sweep leaves a liveness record.
        sqlx::query(
            r#"
            INSERT INTO worker_heartbeats (worker_id, worker_type, hostname, status, last_seen_at)
            VALUES ($1, 'reaper', $2, 'alive', NOW())
            ON CONFLICT (worker_id) DO UPDATE
            SET hostname = EXCLUDED.hostname, status = 'alive', last_seen_at = NOW()
            "#,
        )
        .bind(REAPER_WORKER_ID)
        .bind(&self.hostname)
        .execute(&self.pool)
        .await?;

        let report = ReapReport {
            stuck_failed: stuck.len() as u64,
            stale_failed: stale.len() as u64,
        };

        if report.stuck_failed > 0 || report.stale_failed > 0 {
            info!(
                stuck = report.stuck_failed,
                stale = report.stale_failed,
                "Reaper sweep reclaimed abandoned work"
            );
        } else {
            debug!("Reaper sweep found nothing to reclaim");
        }

        Ok(report)
    }

    /// Sweep on an interval until shutdown is signalled.
    pub async fn run_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker =
            tokio::time::interval(std::time::Duration::from_secs(self.config.reap_interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        warn!(error = %e, "Reaper sweep failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Reaper shutting down");
                        break;
                    }
                }
            }
        }
    }
}
