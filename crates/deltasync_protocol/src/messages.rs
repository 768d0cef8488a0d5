//! Protocol messages for pull and push.

use crate::delta::{Checkpoint, Delta, DeltaPack, PackId};
use crate::error::{ProtocolError, ProtocolResult};
use deltasync_codec::{from_cbor, to_cbor};
use deltasync_core::{RecordId, RecordKey, RecordType, Revision};
use serde::{Deserialize, Serialize};

/// A sync protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "body", rename_all = "snake_case")]
pub enum SyncMessage {
    /// Pull request.
    PullRequest(PullRequest),
    /// Pull response.
    PullResponse(PullResponse),
    /// Push request.
    PushRequest(PushRequest),
    /// Push response.
    PushResponse(PushResponse),
    /// Error reported by the remote.
    Error(ErrorMessage),
}

impl SyncMessage {
    /// Returns the message type code.
    pub fn type_code(&self) -> u8 {
        match self {
            SyncMessage::PullRequest(_) => 1,
            SyncMessage::PullResponse(_) => 2,
            SyncMessage::PushRequest(_) => 3,
            SyncMessage::PushResponse(_) => 4,
            SyncMessage::Error(_) => 15,
        }
    }

    /// Encodes to CBOR.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        Ok(to_cbor(self)?)
    }

    /// Decodes from CBOR.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid message.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        Ok(from_cbor(bytes)?)
    }

    /// Unwraps a pull response.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Remote`] for error messages and
    /// [`ProtocolError::UnexpectedMessage`] for anything else.
    pub fn into_pull_response(self) -> ProtocolResult<PullResponse> {
        match self {
            SyncMessage::PullResponse(response) => Ok(response),
            other => Err(other.unexpected("pull_response")),
        }
    }

    /// Unwraps a push response.
    ///
    /// # Errors
    ///
    /// Same as [`SyncMessage::into_pull_response`].
    pub fn into_push_response(self) -> ProtocolResult<PushResponse> {
        match self {
            SyncMessage::PushResponse(response) => Ok(response),
            other => Err(other.unexpected("push_response")),
        }
    }

    fn unexpected(self, expected: &'static str) -> ProtocolError {
        match self {
            SyncMessage::Error(error) => ProtocolError::Remote {
                code: error.code,
                message: error.message,
            },
            other => ProtocolError::UnexpectedMessage {
                expected,
                found: other.type_code(),
            },
        }
    }
}

/// Request for remote deltas newer than a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    /// Client's current checkpoint.
    pub since: Checkpoint,
    /// Maximum deltas to return.
    pub limit: u32,
}

impl PullRequest {
    /// Creates a pull request.
    pub fn new(since: Checkpoint, limit: u32) -> Self {
        Self { since, limit }
    }
}

/// Page of remote deltas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullResponse {
    /// Deltas in remote order; `source_checkpoint` is the latest one contained.
    pub pack: DeltaPack,
    /// More deltas are available past this page.
    pub has_more: bool,
}

impl PullResponse {
    /// Creates a pull response.
    pub fn new(pack: DeltaPack, has_more: bool) -> Self {
        Self { pack, has_more }
    }
}

/// Local deltas sent to the remote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushRequest {
    /// Outbound pack.
    pub pack: DeltaPack,
}

impl PushRequest {
    /// Creates a push request.
    pub fn new(pack: DeltaPack) -> Self {
        Self { pack }
    }
}

/// Remote acknowledgment of a push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushResponse {
    /// Which deltas the remote accepted.
    pub acks: AckSet,
}

impl PushResponse {
    /// Creates a push response.
    pub fn new(acks: AckSet) -> Self {
        Self { acks }
    }
}

/// Error reported by the remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    /// Error code.
    pub code: u16,
    /// Human-readable message.
    pub message: String,
}

impl ErrorMessage {
    /// Creates an error message.
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Identity and revision of one delta, as echoed in acknowledgments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeltaAck {
    /// Record type.
    pub record_type: RecordType,
    /// Record identity.
    pub id: RecordId,
    /// Revision the remote accepted.
    pub revision: Revision,
}

impl DeltaAck {
    /// Returns the record key.
    pub fn key(&self) -> RecordKey {
        RecordKey::new(self.record_type.clone(), self.id)
    }

    /// Returns true if this ack refers to `delta` at the same revision.
    pub fn matches(&self, delta: &Delta) -> bool {
        self.id == delta.id && self.record_type == delta.record_type && self.revision == delta.revision
    }
}

impl From<&Delta> for DeltaAck {
    fn from(delta: &Delta) -> Self {
        Self {
            record_type: delta.record_type.clone(),
            id: delta.id,
            revision: delta.revision,
        }
    }
}

/// A delta the remote refused, with its reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaNack {
    /// Refused delta.
    pub delta: DeltaAck,
    /// Why it was refused.
    pub reason: String,
}

/// Per-delta outcome of a push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckSet {
    /// Pack the acknowledgment refers to.
    pub pack_id: PackId,
    /// Accepted deltas.
    pub acknowledged: Vec<DeltaAck>,
    /// Refused deltas.
    pub rejected: Vec<DeltaNack>,
}

impl AckSet {
    /// Creates an empty acknowledgment for a pack.
    pub fn new(pack_id: PackId) -> Self {
        Self {
            pack_id,
            acknowledged: Vec::new(),
            rejected: Vec::new(),
        }
    }

    /// Acknowledges every delta in `pack`.
    pub fn all(pack: &DeltaPack) -> Self {
        Self {
            pack_id: pack.pack_id,
            acknowledged: pack.iter().map(DeltaAck::from).collect(),
            rejected: Vec::new(),
        }
    }

    /// Records an accepted delta.
    pub fn ack(&mut self, delta: &Delta) {
        self.acknowledged.push(DeltaAck::from(delta));
    }

    /// Records a refused delta.
    pub fn reject(&mut self, delta: &Delta, reason: impl Into<String>) {
        self.rejected.push(DeltaNack {
            delta: DeltaAck::from(delta),
            reason: reason.into(),
        });
    }

    /// Returns true if `delta` was accepted at its revision.
    pub fn contains(&self, delta: &Delta) -> bool {
        self.acknowledged.iter().any(|ack| ack.matches(delta))
    }

    /// Deltas of `pack` that this set acknowledges, in pack order.
    ///
    /// An ack for another revision of the same record does not count.
    pub fn acknowledged_deltas<'a>(&self, pack: &'a DeltaPack) -> Vec<&'a Delta> {
        if self.pack_id != pack.pack_id {
            return Vec::new();
        }
        pack.iter().filter(|delta| self.contains(delta)).collect()
    }
}
