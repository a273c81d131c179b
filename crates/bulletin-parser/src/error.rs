//! Error types for bulletin extraction.

use thiserror::Error;

/// Errors that can occur during bulletin extraction.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Failed to read input file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Input file is empty")]
    EmptyInput,

    #[error("Unknown report type for entry {0}")]
    UnknownReportType(usize),

    #[error("Invalid extraction options: {0}")]
    InvalidOptions(String),
}

/// Result type for extraction operations.
pub type Result<T> = std::result::Result<T, ExtractError>;
