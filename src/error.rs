//! Error types for the artifact cache
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using CacheError
pub type Result<T> = std::result::Result<T, CacheError>;

/// Unified error type for cache operations
#[derive(Debug, Error)]
pub enum CacheError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Protocol Errors (fatal to the connection)
    // -------------------------------------------------------------------------
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Unsupported protocol version {actual} (expected {expected})")]
    VersionMismatch { expected: u32, actual: u32 },

    #[error("Transaction isolation error: {0}")]
    Isolation(String),

    // -------------------------------------------------------------------------
    // Transaction Errors (fatal to the transaction only)
    // -------------------------------------------------------------------------
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Storage exhausted: no free or evictable block of {requested} bytes")]
    StorageExhausted { requested: u64 },

    // -------------------------------------------------------------------------
    // Storage Errors
    // -------------------------------------------------------------------------
    #[error("File not found")]
    NotFound,

    #[error("Storage error: {0}")]
    Storage(String),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl CacheError {
    /// True for errors that fail a single put transaction but leave the
    /// connection usable.
    pub fn is_transaction_scoped(&self) -> bool {
        matches!(
            self,
            CacheError::Validation(_) | CacheError::StorageExhausted { .. }
        )
    }
}

impl From<bincode::Error> for CacheError {
    fn from(err: bincode::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}
