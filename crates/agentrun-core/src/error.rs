//! Error types for the core domain.

use thiserror::Error;

/// Errors surfaced by domain-level operations.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("invalid task payload: {0}")]
    InvalidPayload(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
