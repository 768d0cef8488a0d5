//! Error types for the sync engine.

use deltasync_codec::CodecError;
use deltasync_core::{CoreError, RecordKey};
use deltasync_protocol::ProtocolError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
///
/// Conflicts and stale deltas are not errors; they are reported through
/// [`crate::AppliedResult`] and observers.
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

    /// A local transaction failed to commit.
    #[error("storage commit failed for {key}: {reason}")]
    StorageCommit {
        /// Record that could not be written.
        key: RecordKey,
        /// Failure reason.
        reason: String,
    },

    /// Another sync is already running on this engine.
    #[error("sync already in progress")]
    ConcurrentSyncRejected,

    /// Sync was cancelled between stages.
    #[error("sync cancelled")]
    Cancelled,

    /// Invalid or unexpected message.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Wire encoding error.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Record store error other than a commit failure.
    #[error("store error: {0}")]
    Store(CoreError),

    /// Checkpoint could not be loaded or persisted.
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] std::io::Error),

    /// Operation timed out.
    #[error("operation timed out")]
    Timeout,
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

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Timeout => true,
            _ => false,
        }
    }
}

impl From<CoreError> for SyncError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::CommitFailed { key, reason } => SyncError::StorageCommit { key, reason },
            CoreError::Codec(e) => SyncError::Codec(e),
            other => SyncError::Store(other),
        }
    }
}

impl From<ProtocolError> for SyncError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Codec(e) => SyncError::Codec(e),
            ProtocolError::Remote { code, message } => SyncError::Transport {
                message: format!("remote error {code}: {message}"),
                retryable: code >= 500,
            },
            other @ ProtocolError::UnexpectedMessage { .. } => {
                SyncError::Protocol(other.to_string())
            }
        }
    }
}
