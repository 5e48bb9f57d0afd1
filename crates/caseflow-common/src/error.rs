//! Error types for Caseflow

use thiserror::Error;

/// Result type alias for Caseflow operations
pub type Result<T> = std::result::Result<T, CaseflowError>;

/// Main error type for Caseflow
#[derive(Error, Debug)]
pub enum CaseflowError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid field {field}: {reason}")]
    InvalidField { field: String, reason: String },

    #[error("Batch not found: {0}")]
    BatchNotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),
}
