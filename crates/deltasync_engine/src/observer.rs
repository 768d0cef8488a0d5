//! Extension points invoked during a sync cycle.

use crate::apply::AppliedResult;
use crate::engine::SyncState;
use crate::undirty::UndirtyReport;
use deltasync_core::RecordType;
use deltasync_protocol::Conflict;

/// Hooks the engine calls at fixed points of a cycle.
///
/// All methods default to no-ops. Observers run on the syncing thread and
/// should return quickly; they cannot veto or alter the cycle.
pub trait SyncObserver: Send + Sync {
    /// Called before dirty records of `record_type` are read for a push.
    fn before_extract(&self, _record_type: &RecordType) {}

    /// Called after an inbound pack has been applied.
    fn after_apply(&self, _result: &AppliedResult) {}

    /// Called for each conflict, after its resolution is committed.
    fn on_conflict(&self, _conflict: &Conflict) {}

    /// Called after acknowledged deltas have been undirtied.
    fn after_undirty(&self, _report: &UndirtyReport) {}

    /// Called on every state transition.
    fn on_state_change(&self, _state: SyncState) {}
}

/// Observer that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl SyncObserver for NoopObserver {}
