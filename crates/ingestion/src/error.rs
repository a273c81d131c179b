//! Error types for the ingestion crate.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during ingestion.
#[derive(Debug, Error)]
pub enum IngestionError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("bulletin extraction failed: {0}")]
    Extract(#[from] bulletin_parser::ExtractError),

    #[error(transparent)]
    Common(#[from] afd_common::AfdError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for ingestion operations.
pub type Result<T> = std::result::Result<T, IngestionError>;
