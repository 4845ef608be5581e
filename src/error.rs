//! Error taxonomy shared across the archive's public component APIs.
//!
//! Mirrors the five-kind taxonomy every component surfaces at its boundary:
//! validation failures are never retried, not-found is surfaced as-is,
//! downstream unavailability is retried where the caller is idempotent
//! (queue tasks), storage failures attempt compensating cleanup, and
//! anything unexpected collapses to `Internal`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ArchiveError>;

impl From<redis::RedisError> for ArchiveError {
    fn from(err: redis::RedisError) -> Self {
        ArchiveError::ServiceUnavailable(format!("redis: {err}"))
    }
}

impl From<std::io::Error> for ArchiveError {
    fn from(err: std::io::Error) -> Self {
        ArchiveError::Storage(format!("io: {err}"))
    }
}

impl From<serde_json::Error> for ArchiveError {
    fn from(err: serde_json::Error) -> Self {
        ArchiveError::Internal(anyhow::anyhow!("serde_json: {err}"))
    }
}
