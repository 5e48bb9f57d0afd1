//! Caseflow Engine Library
//!
//! Durable job and side-effect delivery backbone for the case-management
//! platform.
//!
//! # Overview
//!
//! Four tightly coupled subsystems over one PostgreSQL store:
//!
//! - **Job Queue** (`queue`): durable FIFO-with-priority queue with
//!   idempotent enqueue, skip-locked claiming, heartbeats, and a reaper for
//!   work abandoned by crashed workers.
//! - **Transactional Outbox** (`outbox`): side effects written in the same
//!   transaction as the business fact that requires them, then delivered
//!   at-least-once by a polling processor with per-channel handlers.
//! - **Ingest Pipeline** (`ingest`): uploads become content-hash-identified
//!   batches, rows deduplicate by content-derived keys, and the follow-up
//!   job is enqueued with the committing transaction.
//! - **Reconciliation** (`reconcile`): periodic integrity audits of
//!   committed batches and the discrepancy dead-letter queue with its
//!   retry/dismiss workflows.
//!
//! Every lifecycle transition emits a correlation-id-tagged event through
//! the `audit` module. The store is the single serialization point: all
//! mutation paths funnel through the operations these modules expose.
//!
//! # Consistency model
//!
//! Identity is content-derived everywhere (see
//! [`caseflow_common::idempotency`]): byte-identical files collapse to one
//! batch, logically identical rows to one record, equivalent jobs to one
//! queue entry. Claims use `FOR UPDATE SKIP LOCKED` so concurrent workers
//! partition pending work without blocking, and outbox dispatch happens
//! outside the claiming transaction so locks never span network I/O.
//!
//! # Example
//!
//! ```no_run
//! use caseflow_engine::audit::AuditSink;
//! use caseflow_engine::config::Config;
//! use caseflow_engine::ingest::IngestPipeline;
//! use caseflow_engine::queue::JobQueue;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let pool = caseflow_engine::db::create_pool(&config.database).await?;
//!     let (audit, _audit_task) = AuditSink::start(pool.clone());
//!
//!     let queue = JobQueue::new(pool.clone(), audit.clone(), config.queue.clone());
//!     let pipeline = IngestPipeline::new(pool, queue, audit, config.ingest.clone());
//!
//!     let result = pipeline.import_file(b"case_number,claimant,respondent,filed_date\n", "empty.csv").await?;
//!     println!("batch {} -> {:?}", result.batch_id, result.status);
//!     Ok(())
//! }
//! ```

pub mod audit;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod ingest;
pub mod outbox;
pub mod queue;
pub mod reconcile;
pub mod retry;

// Re-export commonly used types
pub use error::{EngineError, EngineResult};
pub use retry::RetryPolicy;
