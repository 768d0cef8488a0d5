//! Protocol error types.

use deltasync_codec::CodecError;
use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while handling protocol messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Message could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// A different message type arrived than the exchange expects.
    #[error("unexpected message: expected {expected}, found type {found}")]
    UnexpectedMessage {
        /// Expected message name.
        expected: &'static str,
        /// Type code that arrived.
        found: u8,
    },

    /// The remote answered with an error message.
    #[error("remote error {code}: {message}")]
    Remote {
        /// Error code.
        code: u16,
        /// Error message.
        message: String,
    },
}
