//! # deltasync protocol
//!
//! Wire types for delta sync.
//!
//! This crate provides:
//! - [`Delta`], [`DeltaPack`] and the [`Checkpoint`] ("latest UST")
//! - Conversion between stored records and deltas
//! - Pull/push messages and per-delta acknowledgments ([`AckSet`])
//! - Conflict types and the substitutable [`ConflictResolver`]
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod conflict;
mod delta;
mod error;
mod messages;

pub use conflict::{Conflict, ConflictPolicy, ConflictResolution, ConflictResolver, Resolved};
pub use delta::{Checkpoint, Delta, DeltaOperation, DeltaPack, PackId};
pub use error::{ProtocolError, ProtocolResult};
pub use messages::{
    AckSet, DeltaAck, DeltaNack, ErrorMessage, PullRequest, PullResponse, PushRequest,
    PushResponse, SyncMessage,
};
