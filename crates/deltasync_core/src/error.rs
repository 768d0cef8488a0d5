//! Error types for deltasync core.

use crate::types::RecordKey;
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised by records, schemas and record stores.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A single-record transaction could not be committed.
    #[error("commit failed for {key}: {reason}")]
    CommitFailed {
        /// The record whose commit failed.
        key: RecordKey,
        /// Reason reported by the store.
        reason: String,
    },

    /// Record not found.
    #[error("record not found: {0}")]
    NotFound(RecordKey),

    /// The record is tombstoned and cannot be edited locally.
    #[error("record is deleted: {0}")]
    RecordDeleted(RecordKey),

    /// The record's revision cannot be bumped any further.
    #[error("revision exhausted for {0}")]
    RevisionExhausted(RecordKey),

    /// The record type has not been registered.
    #[error("unknown record type: {0}")]
    UnknownRecordType(String),

    /// A record type was registered twice.
    #[error("record type already registered: {0}")]
    DuplicateRecordType(String),

    /// Field values do not match the registered schema.
    #[error("schema violation in {record_type}.{field}: {reason}")]
    SchemaViolation {
        /// Record type name.
        record_type: String,
        /// Offending field.
        field: String,
        /// What was wrong with it.
        reason: String,
    },

    /// Codec error.
    #[error("codec error: {0}")]
    Codec(#[from] deltasync_codec::CodecError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CoreError {
    /// Creates a commit failure for `key`.
    pub fn commit_failed(key: RecordKey, reason: impl Into<String>) -> Self {
        Self::CommitFailed {
            key,
            reason: reason.into(),
        }
    }

    /// Creates a schema violation error.
    pub fn schema_violation(
        record_type: impl Into<String>,
        field: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::SchemaViolation {
            record_type: record_type.into(),
            field: field.into(),
            reason: reason.into(),
        }
    }
}
