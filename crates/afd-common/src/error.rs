//! Error types shared across the AFD crates.

use thiserror::Error;

/// Result type alias using AfdError.
pub type AfdResult<T> = Result<T, AfdError>;

/// Errors raised by the shared support types.
#[derive(Debug, Error)]
pub enum AfdError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid file mask '{mask}': {message}")]
    InvalidMask { mask: String, message: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
