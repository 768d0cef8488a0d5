//! Synchronized records.

use crate::id::RecordId;
use crate::types::{now_millis, RecordKey, RecordType, Revision};
use deltasync_codec::{Fields, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One instance of a registered record type.
///
/// # Sync metadata
///
/// - `revision` is bumped on every local mutation
/// - `dirty` is true iff the record has local changes the remote has not
///   acknowledged
/// - `deleted` is the logical tombstone; tombstones stay in the store and
///   keep syncing until a retention pass purges them
/// - `synced_revision` is the last revision the remote is known to hold,
///   `None` for records that have never been acknowledged
/// - `touched` names the fields edited locally since the last acknowledgment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Record type.
    pub record_type: RecordType,
    /// Stable identity.
    pub id: RecordId,
    /// Logical clock.
    pub revision: Revision,
    /// Field values.
    pub fields: Fields,
    /// Unsynced local changes exist.
    pub dirty: bool,
    /// Logical deletion flag.
    pub deleted: bool,
    /// Last revision acknowledged by or received from the remote.
    pub synced_revision: Option<Revision>,
    /// Fields edited locally since the last acknowledgment.
    pub touched: BTreeSet<String>,
    /// Last modification time in milliseconds (informational).
    pub updated_at: i64,
}

impl Record {
    /// Creates a new locally-authored record at revision 1, dirty.
    pub fn new(record_type: impl Into<RecordType>, fields: Fields) -> Self {
        Self::with_id(record_type, RecordId::new(), fields)
    }

    /// Creates a new locally-authored record with a caller-chosen ID.
    pub fn with_id(record_type: impl Into<RecordType>, id: RecordId, fields: Fields) -> Self {
        let touched = fields.keys().cloned().collect();
        Self {
            record_type: record_type.into(),
            id,
            revision: Revision::new(1),
            fields,
            dirty: true,
            deleted: false,
            synced_revision: None,
            touched,
            updated_at: now_millis(),
        }
    }

    /// Creates a record that originated on the remote and is already in sync.
    pub fn from_remote(
        record_type: impl Into<RecordType>,
        id: RecordId,
        revision: Revision,
        fields: Fields,
        deleted: bool,
        updated_at: i64,
    ) -> Self {
        Self {
            record_type: record_type.into(),
            id,
            revision,
            fields,
            dirty: false,
            deleted,
            synced_revision: Some(revision),
            touched: BTreeSet::new(),
            updated_at,
        }
    }

    /// Returns the record's key.
    pub fn key(&self) -> RecordKey {
        RecordKey::new(self.record_type.clone(), self.id)
    }

    /// Returns a field value.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Returns true if the record is not tombstoned.
    pub fn is_live(&self) -> bool {
        !self.deleted
    }

    /// Returns true if the remote has never acknowledged this record.
    pub fn is_new(&self) -> bool {
        self.synced_revision.is_none()
    }

    /// Sets one field as a local mutation.
    ///
    /// Bumps the revision and marks the record dirty. Setting a field to its
    /// current value is not a mutation.
    pub fn set_field(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        if self.fields.get(&name) == Some(&value) {
            return;
        }
        self.fields.insert(name.clone(), value);
        self.touched.insert(name);
        self.touch();
    }

    /// Replaces the field map as a single local mutation.
    ///
    /// Only fields whose values actually differ are recorded as touched.
    /// Returns true if anything changed.
    pub fn replace_fields(&mut self, fields: Fields) -> bool {
        let changed = changed_fields(&self.fields, &fields);
        if changed.is_empty() {
            return false;
        }
        self.fields = fields;
        self.touched.extend(changed);
        self.touch();
        true
    }

    /// Tombstones the record as a local mutation.
    ///
    /// Returns false if it was already deleted.
    pub fn mark_deleted(&mut self) -> bool {
        if self.deleted {
            return false;
        }
        self.deleted = true;
        self.touch();
        true
    }

    /// Records that the remote holds this record at its current revision.
    pub fn mark_synced(&mut self) {
        self.dirty = false;
        self.synced_revision = Some(self.revision);
        self.touched.clear();
    }

    // Saturates at Revision::MAX; LocalMutations refuses edits there.
    fn touch(&mut self) {
        self.revision = self.revision.next().unwrap_or(Revision::MAX);
        self.dirty = true;
        self.updated_at = now_millis();
    }
}

/// Names of fields that differ between `before` and `after`, including
/// fields present on only one side.
pub fn changed_fields(before: &Fields, after: &Fields) -> BTreeSet<String> {
    let mut changed: BTreeSet<String> = after
        .iter()
        .filter(|(name, value)| before.get(*name) != Some(*value))
        .map(|(name, _)| name.clone())
        .collect();
    changed.extend(
        before
            .keys()
            .filter(|name| !after.contains_key(*name))
            .cloned(),
    );
    changed
}
