//! Core error types.

use thiserror::Error;

/// Core domain error.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid digest: {0}")]
    InvalidDigest(String),

    #[error("invalid reference: {0}")]
    InvalidReference(String),

    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("invalid pattern: {0}")]
    InvalidPattern(String),

    #[error("invalid state transition: {0}")]
    InvalidState(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, Error>;
