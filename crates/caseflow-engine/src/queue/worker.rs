//! Queue worker runtime
//!
//! A runner claims jobs for the job types it has handlers for, dispatches
//! them, and acknowledges the outcome through the queue's status
//! operations. Many runners may poll the same queue concurrently; the
//! skip-locked claim partitions the pending set between them.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::EngineResult;

use super::models::Job;
use super::queue::JobQueue;

/// Handler for one job type.
///
/// Handlers must be idempotent against re-execution: a crash between the
/// handler finishing and the completion being recorded causes the job to be
/// reaped and retried.
#[async_trait]
pub trait JobHandler: Send + Sync {
    fn job_type(&self) -> &'static str;

    async fn run(&self, job: &Job) -> anyhow::Result<()>;
}

/// Claim-dispatch-acknowledge loop for one worker
pub struct JobRunner {
    queue: JobQueue,
    handlers: HashMap<&'static str, Arc<dyn JobHandler>>,
    worker_id: String,
    hostname: String,
}

impl JobRunner {
    pub fn new(queue: JobQueue) -> Self {
        Self {
            queue,
            handlers: HashMap::new(),
            worker_id: format!("worker-{}", Uuid::new_v4()),
            hostname: hostname::get()
                .unwrap_or_else(|_| "unknown".into())
                .to_string_lossy()
                .to_string(),
        }
    }

    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    pub fn register(mut self, handler: Arc<dyn JobHandler>) -> Self {
        self.handlers.insert(handler.job_type(), handler);
        self
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    fn served_types(&self) -> Vec<&'static str> {
        self.handlers.keys().copied().collect()
    }

    /// Claim and process a single job. Returns false when no job was
    /// eligible.
    pub async fn run_once(&self) -> EngineResult<bool> {
        let types = self.served_types();
        if types.is_empty() {
            return Ok(false);
        }

        let Some(job) = self.queue.claim_next(&types, &self.worker_id).await? else {
            return Ok(false);
        };

        self.dispatch(&job).await?;
        Ok(true)
    }

    async fn dispatch(&self, job: &Job) -> EngineResult<()> {
        let config = self.queue.config().clone();

        let outcome = match self.handlers.get(job.job_type.as_str()) {
            Some(handler) => {
                debug!(
                    job_id = %job.id,
                    job_type = %job.job_type,
                    attempt = job.attempts,
                    "Dispatching job"
                );
                handler.run(job).await
            },
            None => Err(anyhow::anyhow!(
                "no handler registered for job type '{}'",
                job.job_type
            )),
        };

        match outcome {
            Ok(()) => self.queue.complete(job.id).await,
            Err(e) => {
                let backoff = config.retry.delay_for_attempt(job.attempts);
                let status = self
                    .queue
                    .fail(job.id, &format!("{:#}", e), backoff)
                    .await?;
                debug!(job_id = %job.id, status = %status, "Job attempt failed");
                Ok(())
            },
        }
    }

    /// Poll the queue until shutdown is signalled.
    ///
    /// Liveness is reported on a separate timer task so a long-running job
    /// does not make the worker look dead.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> EngineResult<()> {
        let config = self.queue.config().clone();
        info!(
            worker_id = %self.worker_id,
            job_types = ?self.served_types(),
            "Queue worker started"
        );

        let heartbeat_handle = self.spawn_heartbeat_task(config.heartbeat_interval_secs);

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.run_once().await {
                // Drain eagerly while work is available.
                Ok(true) => continue,
                Ok(false) => {
                    let sleep =
                        tokio::time::sleep(std::time::Duration::from_secs(config.poll_interval_secs));
                    tokio::select! {
                        _ = sleep => {}
                        _ = shutdown.changed() => {}
                    }
                },
                Err(e) => {
                    error!(worker_id = %self.worker_id, error = %e, "Worker iteration failed");
                    tokio::time::sleep(std::time::Duration::from_secs(config.poll_interval_secs))
                        .await;
                },
            }
        }

        heartbeat_handle.abort();
        let _ = self
            .queue
            .heartbeat(&self.worker_id, "queue", &self.hostname, "stopped")
            .await;
        info!(worker_id = %self.worker_id, "Queue worker stopped");

        Ok(())
    }

    fn spawn_heartbeat_task(&self, interval_secs: u64) -> tokio::task::JoinHandle<()> {
        let queue = self.queue.clone();
        let worker_id = self.worker_id.clone();
        let hostname = self.hostname.clone();

        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(std::time::Duration::from_secs(interval_secs.max(1)));
            loop {
                ticker.tick().await;
                if let Err(e) = queue
                    .heartbeat(&worker_id, "queue", &hostname, "alive")
                    .await
                {
                    warn!(worker_id = %worker_id, error = %e, "Heartbeat failed");
                }
            }
        })
    }
}
