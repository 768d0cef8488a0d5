//! Inbound delta application.
//!
//! Each delta is committed in its own single-record transaction, in pack
//! order. The revision comparison is the only ordering rule:
//!
//! | local record            | delta revision      | outcome                     |
//! |-------------------------|---------------------|-----------------------------|
//! | absent                  | any                 | created clean               |
//! | present                 | `<=` local revision | rejected as stale           |
//! | present, clean          | `>` local revision  | fast-forwarded, stays clean |
//! | present, dirty          | `>` local revision  | conflict, resolver decides  |
//!
//! A delete delta for an absent record creates a clean tombstone, so a
//! late-arriving older insert for the same identity is rejected as stale.
//! Tombstones are sticky: a newer update does not revive a deleted record.
//! A delta at [`Revision::MAX`] is rejected outright, since neither a local
//! re-assert nor a later edit could ever supersede it.

use crate::observer::SyncObserver;
use deltasync_core::{CoreError, Record, RecordKey, RecordStore, Revision, SchemaRegistry};
use deltasync_protocol::{Conflict, ConflictResolver, Delta, DeltaPack};
use std::fmt;

/// Why an inbound delta was not applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// The local record is at the same or a newer revision.
    Stale,
    /// The local transaction failed; the delta can be retried.
    CommitFailed(String),
    /// The record type is not registered.
    UnknownType,
    /// The fields do not match the registered schema.
    SchemaViolation(String),
    /// The delta is at the highest revision, which nothing could follow.
    RevisionExhausted,
}

impl RejectReason {
    /// Returns true if re-fetching the delta could change the outcome.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RejectReason::CommitFailed(_))
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::Stale => f.write_str("stale"),
            RejectReason::CommitFailed(reason) => write!(f, "commit failed: {reason}"),
            RejectReason::UnknownType => f.write_str("unknown record type"),
            RejectReason::SchemaViolation(reason) => write!(f, "schema violation: {reason}"),
            RejectReason::RevisionExhausted => f.write_str("revision exhausted"),
        }
    }
}

/// A delta that was not applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejected {
    /// Record the delta addressed.
    pub key: RecordKey,
    /// Revision carried by the delta.
    pub revision: Revision,
    /// Why it was rejected.
    pub reason: RejectReason,
}

/// Outcome of applying one inbound pack.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppliedResult {
    /// Records written, in pack order (conflicts included).
    pub applied: Vec<RecordKey>,
    /// Deltas not applied, with reasons.
    pub rejected: Vec<Rejected>,
    /// Conflicts resolved while applying.
    pub conflicts: Vec<Conflict>,
}

impl AppliedResult {
    /// Returns true if no delta is waiting for a retry.
    ///
    /// Stale deltas and permanent rejections (unknown type, schema
    /// violation) do not count: re-fetching them cannot change the outcome.
    pub fn is_complete(&self) -> bool {
        !self.rejected.iter().any(|r| r.reason.is_retryable())
    }

    /// Identities whose commit failed and should be re-fetched.
    pub fn unapplied(&self) -> Vec<&RecordKey> {
        self.rejected
            .iter()
            .filter(|r| r.reason.is_retryable())
            .map(|r| &r.key)
            .collect()
    }

    /// Number of deltas rejected as stale.
    pub fn stale_count(&self) -> usize {
        self.rejected
            .iter()
            .filter(|r| r.reason == RejectReason::Stale)
            .count()
    }

    /// Number of failed commits.
    pub fn commit_failures(&self) -> usize {
        self.unapplied().len()
    }

    /// Merges another page's result into this one.
    pub fn extend(&mut self, other: AppliedResult) {
        self.applied.extend(other.applied);
        self.rejected.extend(other.rejected);
        self.conflicts.extend(other.conflicts);
    }
}

enum Outcome {
    Created,
    FastForward,
    Conflict(Conflict),
    Stale(Revision),
}

/// Applies inbound packs to the local store.
pub struct DeltaApplier<'a> {
    store: &'a dyn RecordStore,
    registry: &'a SchemaRegistry,
    resolver: &'a dyn ConflictResolver,
    observer: &'a dyn SyncObserver,
}

impl<'a> DeltaApplier<'a> {
    /// Creates an applier.
    pub fn new(
        store: &'a dyn RecordStore,
        registry: &'a SchemaRegistry,
        resolver: &'a dyn ConflictResolver,
        observer: &'a dyn SyncObserver,
    ) -> Self {
        Self {
            store,
            registry,
            resolver,
            observer,
        }
    }

    /// Applies every delta of `pack` in order.
    ///
    /// Commit failures are recorded per identity and do not stop the batch.
    pub fn apply(&self, pack: &DeltaPack) -> AppliedResult {
        let mut result = AppliedResult::default();

        for delta in pack {
            let key = delta.key();
            match self.apply_one(delta) {
                Ok(Outcome::Created) | Ok(Outcome::FastForward) => result.applied.push(key),
                Ok(Outcome::Conflict(conflict)) => {
                    tracing::info!(
                        record_type = %key.record_type,
                        id = %key.id,
                        local_revision = conflict.local_revision.as_u64(),
                        remote_revision = conflict.remote_revision.as_u64(),
                        resolved_revision = conflict.resolved_revision.as_u64(),
                        resolution = ?conflict.resolution,
                        "conflict resolved"
                    );
                    self.observer.on_conflict(&conflict);
                    result.conflicts.push(conflict);
                    result.applied.push(key);
                }
                Ok(Outcome::Stale(local)) => {
                    tracing::debug!(
                        record_type = %key.record_type,
                        id = %key.id,
                        revision = delta.revision.as_u64(),
                        local_revision = local.as_u64(),
                        "stale delta ignored"
                    );
                    result.rejected.push(Rejected {
                        key,
                        revision: delta.revision,
                        reason: RejectReason::Stale,
                    });
                }
                Err(reason) => {
                    tracing::warn!(
                        record_type = %key.record_type,
                        id = %key.id,
                        revision = delta.revision.as_u64(),
                        %reason,
                        "delta rejected"
                    );
                    result.rejected.push(Rejected {
                        key,
                        revision: delta.revision,
                        reason,
                    });
                }
            }
        }

        self.observer.after_apply(&result);
        result
    }

    fn apply_one(&self, delta: &Delta) -> Result<Outcome, RejectReason> {
        self.validate(delta)?;

        let mut outcome = Outcome::Created;
        self.store
            .commit(&delta.key(), &mut |current| {
                let (next, result) = self.decide(current, delta);
                outcome = result;
                next
            })
            .map_err(|e| match e {
                CoreError::CommitFailed { reason, .. } => RejectReason::CommitFailed(reason),
                other => RejectReason::CommitFailed(other.to_string()),
            })?;

        Ok(outcome)
    }

    fn validate(&self, delta: &Delta) -> Result<(), RejectReason> {
        let schema = self
            .registry
            .get(&delta.record_type)
            .ok_or(RejectReason::UnknownType)?;
        if !delta.revision.has_successor() {
            return Err(RejectReason::RevisionExhausted);
        }
        if delta.is_delete() {
            return Ok(());
        }
        schema.validate(&delta.fields).map_err(|e| match e {
            CoreError::SchemaViolation { field, reason, .. } => {
                RejectReason::SchemaViolation(format!("{field}: {reason}"))
            }
            other => RejectReason::SchemaViolation(other.to_string()),
        })
    }

    fn decide(&self, current: Option<&Record>, delta: &Delta) -> (Option<Record>, Outcome) {
        let Some(local) = current else {
            return (Some(delta.to_record()), Outcome::Created);
        };

        if delta.revision <= local.revision {
            return (None, Outcome::Stale(local.revision));
        }

        if !local.dirty {
            let mut record = delta.to_record();
            record.deleted |= local.deleted;
            return (Some(record), Outcome::FastForward);
        }

        let resolved = self.resolver.resolve(local, delta);
        let conflict = Conflict {
            key: local.key(),
            local_revision: local.revision,
            remote_revision: delta.revision,
            resolved_revision: resolved.record.revision,
            remote_deleted: delta.is_delete(),
            resolution: resolved.resolution,
        };
        (Some(resolved.record), Outcome::Conflict(conflict))
    }
}
