//! File ingest
//!
//! Uploads become batches (import runs) identified by their content hash,
//! batches become canonical case records deduplicated by content-derived
//! keys, and committed batches enqueue their follow-up processing job
//! transactionally.

mod models;
mod parser;
mod pipeline;

pub use models::{CanonicalCase, ImportResult, ImportRun, ImportStatus};
pub use parser::{parse_case_csv, reparse_raw_row, ParsedRow, REQUIRED_COLUMNS};
pub use pipeline::IngestPipeline;
