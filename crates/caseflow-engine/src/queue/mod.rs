//! Durable job queue
//!
//! A FIFO-with-priority queue over the `jobs` table with idempotent
//! enqueue, skip-locked claiming, heartbeats, and a reaper for abandoned
//! work.
//!
//! # State machine
//!
//! `pending → processing → {completed | pending (retry) | failed}`
//!
//! Failed attempts with remaining budget return to `pending` with a
//! backoff-delayed `run_at`; an exhausted budget parks the job in `failed`
//! for manual intervention.

mod models;
#[allow(clippy::module_inception)]
mod queue;
mod reaper;
mod worker;

pub use models::{
    EnqueuedJob, Job, JobPayload, JobStatus, NewJob, QueueDepth, WorkerHeartbeat, ALL_JOB_TYPES,
};
pub use queue::JobQueue;
pub use reaper::{ReapReport, Reaper, REAPER_WORKER_ID};
pub use worker::{JobHandler, JobRunner};
