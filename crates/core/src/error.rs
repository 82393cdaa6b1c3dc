//! Error types for the watcher domain layer.
//!
//! This module defines a hierarchy of error types:
//!
//! - [`ChainError`] - Chain RPC and finality-resolution errors
//! - [`MappingError`] - Malformed raw records (distinct from "not applicable")
//! - [`DeliveryError`] - Handler/target failures
//! - [`StorageError`] - Watermark store errors
//! - [`WatcherError`] - Top-level orchestration errors
//!
//! Error conversion is automatic via `From` implementations,
//! allowing `?` to work across error boundaries.

use thiserror::Error;

// =============================================================================
// Chain Errors
// =============================================================================

/// Chain RPC and connectivity errors.
///
/// Transient variants are retried by the shared retry policy; everything
/// else surfaces immediately.
#[derive(Debug, Error)]
pub enum ChainError {
    /// Timeout or connection failure - worth retrying with backoff.
    #[error("Transient RPC failure: {0}")]
    Transient(String),

    /// The RPC endpoint returned an error response.
    #[error("RPC error: {0}")]
    Rpc(String),

    /// The RPC endpoint returned a payload we could not interpret.
    #[error("Invalid RPC response: {0}")]
    InvalidResponse(String),

    /// Finality predicate never confirmed the candidate block.
    ///
    /// Fatal for that height resolution. The unresolved block number is
    /// carried so operators can see exactly where the chain stalled.
    #[error("Finality unresolved for block {height} after {attempts} attempts")]
    FinalityUnresolved {
        /// Candidate block that never finalized.
        height: u64,
        /// Attempts consumed before giving up.
        attempts: u32,
    },
}

impl ChainError {
    /// Whether the shared retry policy should retry this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, ChainError::Transient(_))
    }
}

// =============================================================================
// Mapping Errors
// =============================================================================

/// A raw chain record that matched a discriminator but could not be mapped.
///
/// "Record is not of interest" is NOT an error - mappers return an empty
/// vec for that. These variants mean the record claimed to be the event we
/// watch for, but required data was missing or malformed.
#[derive(Debug, Error)]
pub enum MappingError {
    /// A field the canonical event requires was absent.
    #[error("Missing field '{field}' in record {tx_hash}")]
    MissingField {
        /// Name of the absent field.
        field: &'static str,
        /// Native transaction hash for log context.
        tx_hash: String,
    },

    /// The record payload had an unexpected shape.
    #[error("Malformed record {tx_hash}: {reason}")]
    Malformed { tx_hash: String, reason: String },
}

// =============================================================================
// Delivery Errors
// =============================================================================

/// Handler/target failures. Any of these blocks the watermark commit for
/// the whole range being processed.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// A target rejected a batch.
    #[error("Target '{target}' failed: {reason}")]
    Target { target: String, reason: String },

    /// Aggregate result of chunked delivery: at least one chunk failed.
    ///
    /// No event is considered delivered, even from chunks that succeeded -
    /// the entire range is retried on the next tick.
    #[error("Delivery failed: {failed} of {total} batches failed")]
    BatchFailed { failed: usize, total: usize },
}

// =============================================================================
// Storage Errors
// =============================================================================

/// Watermark store errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Failed to reach the backing store.
    #[error("Store connection error: {0}")]
    Connection(String),

    /// A read or write operation failed.
    #[error("Store query error: {0}")]
    Query(String),

    /// Compare-and-swap lost: the stored position differs from the one
    /// observed at tick start. A stale writer must not overwrite newer
    /// progress.
    #[error("Watermark conflict for job '{job_id}': expected {expected:?}")]
    Conflict {
        job_id: String,
        expected: Option<u64>,
    },
}

// =============================================================================
// Watcher Errors
// =============================================================================

/// Top-level orchestration errors.
///
/// This is the main error type returned by [`crate::services::Poller`].
/// It wraps all lower-level errors and adds watcher-specific variants.
#[derive(Debug, Error)]
pub enum WatcherError {
    /// Chain connectivity or finality error.
    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    /// Handler/target delivery error.
    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    /// Watermark store error.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Unknown source/mapper/target name at wiring time.
    ///
    /// Fatal at startup, never recoverable at runtime.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A tick exhausted its retry budget for one range.
    ///
    /// Fatal for that tick only: the watermark is unchanged and the same
    /// range is retried on the next tick.
    #[error("Range [{from},{to}] failed for job '{job_id}': {reason}")]
    RangeFailed {
        job_id: String,
        from: u64,
        to: u64,
        reason: String,
    },

    /// Graceful shutdown was requested.
    ///
    /// This is not really an error but uses the error type for control flow.
    #[error("Watcher shutdown requested")]
    ShutdownRequested,
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for watcher orchestration.
pub type WatcherResult<T> = Result<T, WatcherError>;

/// Result type for chain source operations.
pub type ChainResult<T> = Result<T, ChainError>;

/// Result type for mapping operations.
pub type MappingResult<T> = Result<T, MappingError>;

/// Result type for delivery operations.
pub type DeliveryResult<T> = Result<T, DeliveryError>;

/// Result type for watermark store operations.
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    // Test critique: la chaîne de conversion d'erreurs fonctionne
    // Permet d'utiliser ? à travers les couches
    #[test]
    fn test_error_conversion_chain() {
        let chain_err = ChainError::Rpc("rpc failed".into());
        let watcher_err: WatcherError = chain_err.into();
        assert!(watcher_err.to_string().contains("rpc failed"));

        let storage_err = StorageError::Query("db failed".into());
        let watcher_err: WatcherError = storage_err.into();
        assert!(watcher_err.to_string().contains("db failed"));
    }

    #[test]
    fn test_transient_classification() {
        assert!(ChainError::Transient("timeout".into()).is_transient());
        assert!(!ChainError::Rpc("bad method".into()).is_transient());
        assert!(
            !ChainError::FinalityUnresolved {
                height: 10,
                attempts: 5
            }
            .is_transient()
        );
    }

    // Test critique: FinalityUnresolved nomme le bloc non résolu
    #[test]
    fn test_finality_unresolved_names_block() {
        let err = ChainError::FinalityUnresolved {
            height: 123_456,
            attempts: 10,
        };
        assert!(err.to_string().contains("123456"));
    }
}
