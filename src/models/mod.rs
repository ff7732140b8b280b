pub mod entity;
pub mod job;
pub mod matching;
pub mod record;

pub use entity::*;
pub use job::*;
pub use matching::*;
pub use record::*;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ValidationErrorType {
    MissingRequiredField,
    InvalidNumber,
    InvalidDate,
    InvalidBoolean,
    InvalidSelection,
}

/// Per-row mapping failure. Recovered locally: the row is skipped and counted.
#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
#[error("row {row}: {message}")]
pub struct ValidationError {
    pub row: u64,
    pub field: Option<String>,
    pub error_type: ValidationErrorType,
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("Decode error at line {line}: {message}")]
    Decode { line: u64, message: String },

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Required fields could not be mapped: {}", unresolved.join(", "))]
    MappingAmbiguity { unresolved: Vec<String> },

    #[error("Match lookup error: {0}")]
    MatchLookup(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Chunk {chunk} exceeded the {timeout_ms}ms execution timeout")]
    ChunkTimeout { chunk: u64, timeout_ms: u64 },

    #[error("Import cancelled by user")]
    Cancelled,

    #[error("Import job not found: {0}")]
    JobNotFound(uuid::Uuid),

    #[error("Import job {0} is still active")]
    JobActive(uuid::Uuid),

    #[error("Database error: {0}")]
    Database(#[from] mongodb::error::Error),

    #[error("CSV parsing error: {0}")]
    CsvParsing(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

pub type Result<T> = std::result::Result<T, ImportError>;
