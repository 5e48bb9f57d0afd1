//! Caseflow Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the Caseflow workspace.
//!
//! # Overview
//!
//! This crate provides functionality used across all Caseflow workspace
//! members:
//!
//! - **Error Handling**: Custom error types and result types
//! - **Idempotency**: Deterministic content hashes for batches, rows, and jobs
//! - **Logging**: Tracing subscriber bootstrap shared by all binaries
//!
//! # Example
//!
//! ```no_run
//! use caseflow_common::idempotency::file_hash;
//!
//! let digest = file_hash(b"case export 2026-07");
//! println!("Batch identity: {}", digest);
//! ```

pub mod error;
pub mod idempotency;
pub mod logging;

// Re-export commonly used types
pub use error::{CaseflowError, Result};
