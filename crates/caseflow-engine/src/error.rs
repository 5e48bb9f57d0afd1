//! Engine-specific error types

use thiserror::Error;

/// Result type alias for engine operations
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Engine error types
///
/// Expected lifecycle outcomes (job failure, delivery failure, validation
/// of individual rows) are surfaced through status fields and discrepancy
/// records, not through this enum. `EngineError` covers infrastructure and
/// caller-contract failures only.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Caseflow error: {0}")]
    Common(#[from] caseflow_common::CaseflowError),
}

impl EngineError {
    /// Create a not found error with resource context
    pub fn not_found(resource_type: &str, identifier: impl std::fmt::Display) -> Self {
        Self::NotFound(format!("{} '{}' not found", resource_type, identifier))
    }
}
