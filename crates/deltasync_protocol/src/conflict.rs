//! Conflict detection and resolution.
//!
//! A conflict exists when a remote delta is newer than the local record and
//! the local record carries unsynced edits. Resolution is substitutable
//! through [`ConflictResolver`]; [`ConflictPolicy`] provides the built-in
//! rules.

use crate::delta::Delta;
use deltasync_core::{now_millis, Record, RecordKey, Revision};
use serde::{Deserialize, Serialize};

/// A resolved conflict, reported to observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    /// Record involved.
    pub key: RecordKey,
    /// Local revision before resolution.
    pub local_revision: Revision,
    /// Revision of the incoming delta.
    pub remote_revision: Revision,
    /// Revision written by the resolution.
    pub resolved_revision: Revision,
    /// Remote delta was a delete.
    pub remote_deleted: bool,
    /// How it was resolved.
    pub resolution: ConflictResolution,
}

impl Conflict {
    /// Returns true if the record stays dirty after resolution.
    pub fn reasserts_local(&self) -> bool {
        self.resolution != ConflictResolution::AcceptRemote
    }
}

/// Outcome of resolving one conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConflictResolution {
    /// Local fields kept and re-sent.
    KeepLocal,
    /// Remote version taken, local edit dropped.
    AcceptRemote,
    /// Remote base with local edits layered on top, re-sent.
    Merge,
}

impl ConflictResolution {
    /// Converts to a code.
    pub fn to_code(&self) -> u8 {
        match self {
            ConflictResolution::KeepLocal => 1,
            ConflictResolution::AcceptRemote => 2,
            ConflictResolution::Merge => 3,
        }
    }

    /// Converts from a code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(ConflictResolution::KeepLocal),
            2 => Some(ConflictResolution::AcceptRemote),
            3 => Some(ConflictResolution::Merge),
            _ => None,
        }
    }
}

/// Record produced by a resolver together with how it was chosen.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    /// Record to commit.
    pub record: Record,
    /// Resolution applied.
    pub resolution: ConflictResolution,
}

/// Decides the record to store when a newer remote delta meets a dirty local
/// record.
///
/// Implementations must return a record with the same identity. A resolved
/// record that stays dirty must carry a revision strictly greater than
/// `remote.revision`, otherwise the next push would be refused as stale.
pub trait ConflictResolver: Send + Sync {
    /// Resolves `local` against `remote`.
    fn resolve(&self, local: &Record, remote: &Delta) -> Resolved;
}

/// Built-in resolution rules.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConflictPolicy {
    /// Remote field values win, locally edited fields are layered back on
    /// top, and the record stays dirty at `max(local, remote) + 1`.
    #[default]
    RemoteWinsLocalReasserts,
    /// Remote version replaces the local record; the local edit is dropped.
    RemoteWins,
    /// Local fields are kept and re-sent at `max(local, remote) + 1`.
    LocalWins,
}

impl ConflictPolicy {
    /// Converts to a code.
    pub fn to_code(&self) -> u8 {
        match self {
            ConflictPolicy::RemoteWinsLocalReasserts => 1,
            ConflictPolicy::RemoteWins => 2,
            ConflictPolicy::LocalWins => 3,
        }
    }

    /// Converts from a code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(ConflictPolicy::RemoteWinsLocalReasserts),
            2 => Some(ConflictPolicy::RemoteWins),
            3 => Some(ConflictPolicy::LocalWins),
            _ => None,
        }
    }
}

// Saturates; callers reject remote revisions without a successor first.
fn bumped(local: &Record, remote: &Delta) -> Revision {
    local
        .revision
        .max(remote.revision)
        .next()
        .unwrap_or(Revision::MAX)
}

impl ConflictResolver for ConflictPolicy {
    fn resolve(&self, local: &Record, remote: &Delta) -> Resolved {
        match self {
            ConflictPolicy::RemoteWinsLocalReasserts => {
                let mut fields = remote.fields.clone();
                for name in &local.touched {
                    match local.fields.get(name) {
                        Some(value) => {
                            fields.insert(name.clone(), value.clone());
                        }
                        None => {
                            fields.remove(name);
                        }
                    }
                }

                let mut record = local.clone();
                record.fields = fields;
                record.deleted = remote.is_delete() || local.deleted;
                record.revision = bumped(local, remote);
                record.dirty = true;
                record.synced_revision = Some(remote.revision);
                record.updated_at = now_millis();
                Resolved {
                    record,
                    resolution: ConflictResolution::Merge,
                }
            }
            ConflictPolicy::RemoteWins => Resolved {
                record: remote.to_record(),
                resolution: ConflictResolution::AcceptRemote,
            },
            ConflictPolicy::LocalWins => {
                let mut record = local.clone();
                record.revision = bumped(local, remote);
                record.dirty = true;
                record.synced_revision = Some(remote.revision);
                record.touched = local.fields.keys().cloned().collect();
                record.updated_at = now_millis();
                Resolved {
                    record,
                    resolution: ConflictResolution::KeepLocal,
                }
            }
        }
    }
}
