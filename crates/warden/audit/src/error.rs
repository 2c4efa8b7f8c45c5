//! Error types for the audit log

use thiserror::Error;

/// Errors raised by audit stores.
#[derive(Debug, Error)]
pub enum AuditError {
    /// Underlying storage I/O failed
    #[error("audit I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An event could not be encoded or decoded
    #[error("audit serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The event could not be durably appended
    #[error("audit write failed: {0}")]
    WriteFailed(String),

    /// A required event field was not set on the builder
    #[error("incomplete audit event: {0} is required")]
    Incomplete(&'static str),

    /// Query parameters were out of range
    #[error("invalid audit query: {0}")]
    InvalidQuery(String),

    /// Persisted events do not form a valid chain
    #[error("audit chain corrupted at seq {seq}: {reason}")]
    Corrupted { seq: u64, reason: String },
}

/// Result type for audit operations
pub type Result<T> = std::result::Result<T, AuditError>;
