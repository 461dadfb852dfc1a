//! Error types for the sync engine.

use storsync_protocol::{ProtocolError, StorageId};
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during a sync pass.
///
/// Per-record problems (`InvalidRecord`, `CryptoKeyFormat`) are contained by the
/// record processors and never abort a batch. Everything else aborts the current
/// pass and leaves local state at its last committed transaction.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The remote manifest changed between our read and our write.
    #[error("manifest conflict: expected {expected_version}, remote at {remote_version}")]
    Conflict {
        /// Version the write was based on.
        expected_version: u64,
        /// Version the remote store reported.
        remote_version: u64,
    },

    /// A remote record failed validation and was dropped.
    #[error("invalid record {id}: {reason}")]
    InvalidRecord {
        /// Storage id of the rejected record.
        id: StorageId,
        /// Why it was rejected.
        reason: String,
    },

    /// Key material carried by a record had the wrong shape.
    #[error("malformed key material: expected {expected} bytes, got {actual}")]
    CryptoKeyFormat {
        /// Required length.
        expected: usize,
        /// Length that was supplied.
        actual: usize,
    },

    /// A record that must always exist locally is missing, or a kind that can
    /// never be created by sync was about to be inserted.
    #[error("protocol invariant violated: {0}")]
    ProtocolInvariant(String),

    /// The local store failed.
    #[error("local store error: {0}")]
    LocalStore(String),

    /// Protocol model error.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Sync was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// Invalid state transition.
    #[error("invalid state transition from {from:?} to {to:?}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates a protocol invariant error.
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::ProtocolInvariant(message.into())
    }

    /// Returns true if the whole pass can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Conflict { .. } => true,
            _ => false,
        }
    }

    /// Returns true if the error indicates corrupted local state that needs
    /// remediation rather than a retry.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::ProtocolInvariant(_) | SyncError::LocalStore(_)
        )
    }
}
