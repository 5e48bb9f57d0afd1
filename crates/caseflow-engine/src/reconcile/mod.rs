//! Reconciliation
//!
//! Detects rows lost between ingest stages, maintains the discrepancy
//! dead-letter queue, and runs the operator remediation workflows
//! (retry / dismiss).

mod engine;
mod models;

pub use engine::{ReconcileEngine, ERROR_TYPE_ROW_COUNT_MISMATCH};
pub use models::{
    BatchVerification, Discrepancy, DiscrepancyFilter, DiscrepancyStatus, RetryOutcome,
};
