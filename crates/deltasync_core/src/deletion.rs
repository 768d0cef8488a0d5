//! Logical deletion.
//!
//! Sync never removes a record. Deleting sets `deleted` and bumps the
//! revision (see [`Record::mark_deleted`]); the tombstone then travels as a
//! `delete` delta like any other change. Physical removal belongs to a
//! retention pass, which can use [`purgeable`] to find tombstones whose
//! deletion the remote already holds.

use crate::error::CoreResult;
use crate::record::Record;
use crate::store::{RecordStore, Visibility};
use crate::types::{RecordKey, RecordType};

/// Returns true if `record` is a tombstone the remote has acknowledged at
/// its current revision.
pub fn is_purgeable(record: &Record) -> bool {
    record.deleted && !record.dirty && record.synced_revision == Some(record.revision)
}

/// All tombstones of a type.
///
/// # Errors
///
/// Propagates store read errors.
pub fn tombstones<S: RecordStore + ?Sized>(
    store: &S,
    record_type: &RecordType,
) -> CoreResult<Vec<Record>> {
    Ok(store
        .scan(record_type, Visibility::IncludeDeleted)?
        .into_iter()
        .filter(|r| r.deleted)
        .collect())
}

/// Keys of tombstones whose deletion has fully propagated.
///
/// # Errors
///
/// Propagates store read errors.
pub fn purgeable<S: RecordStore + ?Sized>(
    store: &S,
    record_type: &RecordType,
) -> CoreResult<Vec<RecordKey>> {
    Ok(tombstones(store, record_type)?
        .iter()
        .filter(|r| is_purgeable(r))
        .map(Record::key)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryRecordStore;
    use crate::store::LocalMutations;
    use deltasync_codec::Fields;

    #[test]
    fn unsynced_tombstone_is_not_purgeable() {
        let store = MemoryRecordStore::new();
        let note = RecordType::from("Note");
        let record = store.create("Note", Fields::new()).unwrap();
        store.destroy(&record.key()).unwrap();

        assert_eq!(tombstones(&store, &note).unwrap().len(), 1);
        assert!(purgeable(&store, &note).unwrap().is_empty());
    }

    #[test]
    fn acknowledged_tombstone_is_purgeable() {
        let store = MemoryRecordStore::new();
        let note = RecordType::from("Note");
        let record = store.create("Note", Fields::new()).unwrap();
        let mut tombstone = store.destroy(&record.key()).unwrap();
        tombstone.mark_synced();
        store.put(tombstone).unwrap();

        assert_eq!(purgeable(&store, &note).unwrap(), vec![record.key()]);
    }

    #[test]
    fn live_record_is_never_purgeable() {
        let mut record = Record::new("Note", Fields::new());
        record.mark_synced();
        assert!(!is_purgeable(&record));
    }
}
