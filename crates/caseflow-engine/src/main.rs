//! Caseflow worker daemon - main entry point
//!
//! Runs the queue workers, outbox processor, reaper, and reconciliation
//! sweep against one shared pool, with cooperative shutdown on ctrl-c.

use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};

use caseflow_common::logging::{init_logging, LogConfig};
use caseflow_engine::audit::AuditSink;
use caseflow_engine::config::Config;
use caseflow_engine::db;
use caseflow_engine::handlers::{
    GenerateDocumentHandler, ProcessBatchHandler, SyncCaseStatusHandler,
};
use caseflow_engine::outbox::{OutboxProcessor, SenderRegistry};
use caseflow_engine::queue::{JobQueue, JobRunner, Reaper};
use caseflow_engine::reconcile::ReconcileEngine;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging with configuration from environment
    let log_config = LogConfig::builder()
        .log_file_prefix("caseflow-worker".to_string())
        .filter_directives("caseflow_engine=debug,sqlx=warn".to_string())
        .build();
    let log_config = LogConfig::from_env().unwrap_or(log_config);
    init_logging(&log_config)?;

    info!("Starting Caseflow worker");

    // Load configuration
    let config = Config::load()?;

    // Initialize database connection pool and run migrations
    let pool = db::create_pool(&config.database).await?;
    sqlx::migrate!("../../migrations")
        .run(&pool)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;
    info!("Database migrations completed");

    // Audit sink: explicit lifecycle, shared by every subsystem
    let (audit, audit_task) = AuditSink::start(pool.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = Vec::new();

    // Queue workers
    let queue = JobQueue::new(pool.clone(), audit.clone(), config.queue.clone());
    let process_batch = {
        let mut handler = ProcessBatchHandler::new(pool.clone());
        if let Ok(url) = std::env::var("BATCH_WEBHOOK_URL") {
            handler = handler.with_webhook_url(url);
        }
        if let Ok(email) = std::env::var("OPS_NOTIFY_EMAIL") {
            handler = handler.with_notify_email(email);
        }
        Arc::new(handler)
    };
    let generate_document = Arc::new(GenerateDocumentHandler::new(pool.clone()));
    let sync_case_status = Arc::new(SyncCaseStatusHandler::new(pool.clone()));

    for index in 0..config.queue.worker_count {
        let runner = JobRunner::new(queue.clone())
            .with_worker_id(format!("queue-worker-{}", index))
            .register(process_batch.clone())
            .register(generate_document.clone())
            .register(sync_case_status.clone());
        let shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = runner.run(shutdown).await {
                warn!(error = %e, "Queue worker exited with error");
            }
        }));
    }
    info!(worker_count = config.queue.worker_count, "Queue workers started");

    // Outbox processor
    let senders = SenderRegistry::from_config(&config.outbox);
    let processor = OutboxProcessor::new(
        pool.clone(),
        senders,
        audit.clone(),
        config.outbox.clone(),
    );
    {
        let shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = processor.process_loop(shutdown).await {
                warn!(error = %e, "Outbox processor exited with error");
            }
        }));
    }

    // Reaper
    let reaper = Reaper::new(pool.clone(), audit.clone(), config.queue.clone());
    {
        let shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            reaper.run_loop(shutdown).await;
        }));
    }

    // Reconciliation sweep
    let reconcile = ReconcileEngine::new(pool.clone(), audit.clone(), config.reconcile.clone());
    {
        let shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            reconcile.run_loop(shutdown).await;
        }));
    }

    info!("All subsystems running; press ctrl-c to stop");
    signal::ctrl_c().await?;
    info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    let _ = futures::future::join_all(tasks).await;

    // Drop our audit handle and let the writer drain.
    drop(audit);
    drop(queue);
    let _ = audit_task.await;

    info!("Caseflow worker shut down gracefully");
    Ok(())
}
