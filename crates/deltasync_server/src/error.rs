//! Error types for the sync server.

use deltasync_codec::CodecError;
use deltasync_protocol::ProtocolError;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the sync server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Invalid request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Push exceeded the configured batch limit.
    #[error("batch too large: {size} deltas, limit {max}")]
    BatchTooLarge {
        /// Deltas in the request.
        size: usize,
        /// Configured limit.
        max: u32,
    },

    /// Request body is not a valid message.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ProtocolError> for ServerError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Codec(e) => ServerError::Codec(e),
            other => ServerError::InvalidRequest(other.to_string()),
        }
    }
}

impl ServerError {
    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ServerError::InvalidRequest(_) | ServerError::BatchTooLarge { .. } | ServerError::Codec(_)
        )
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        matches!(self, ServerError::Internal(_))
    }

    /// HTTP-style status code.
    pub fn status_code(&self) -> u16 {
        match self {
            ServerError::BatchTooLarge { .. } => 413,
            e if e.is_client_error() => 400,
            _ => 500,
        }
    }
}
