//! # deltasync engine
//!
//! Bidirectional delta sync between a local record store and a remote.
//!
//! This crate provides:
//! - [`DeltaExtractor`]: dirty records to an outbound [`DeltaPack`]
//! - [`DeltaApplier`]: inbound deltas, conflict-aware, one commit per record
//! - [`UndirtyCoordinator`]: clears dirty flags only at the acknowledged revision
//! - [`SyncEngine`]: the pull-then-push state machine and checkpoint owner
//! - [`SyncTransport`] with a mock and an HTTP/CBOR implementation
//!
//! ## Cycle
//!
//! ```text
//! Idle -> Pulling -> PullApplying -> Pushing -> PushAcking -> Idle
//!            \            \             \            \
//!             +------------+-------------+------------+--> Failed(stage)
//! ```
//!
//! ## Key Invariants
//!
//! - Revisions are the only ordering rule; wall clocks are never compared
//! - The checkpoint advances only after a page applies without commit failures
//! - A dirty flag is cleared only when the local revision equals the acked one
//! - Sync never removes records; deletion is a tombstone
//! - At most one cycle runs per engine
//!
//! [`DeltaPack`]: deltasync_protocol::DeltaPack

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod apply;
mod checkpoint;
mod config;
mod engine;
mod error;
mod extract;
mod http;
mod observer;
mod transport;
mod undirty;

pub use apply::{AppliedResult, DeltaApplier, RejectReason, Rejected};
pub use checkpoint::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
pub use config::{RetryConfig, SyncConfig};
pub use engine::{
    CancelHandle, PullReport, PushReport, SyncCycleResult, SyncEngine, SyncStage, SyncState,
    SyncStats,
};
pub use error::{SyncError, SyncResult};
pub use extract::DeltaExtractor;
pub use http::{HttpClient, HttpError, HttpTransport, LoopbackClient, LoopbackServer, PULL_PATH, PUSH_PATH};
pub use observer::{NoopObserver, SyncObserver};
pub use transport::{MockTransport, SyncTransport};
pub use undirty::{UndirtyCoordinator, UndirtyReport};
