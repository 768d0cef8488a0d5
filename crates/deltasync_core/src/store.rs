//! Record store adapter.

use crate::error::{CoreError, CoreResult};
use crate::record::Record;
use crate::types::{RecordKey, RecordType};
use deltasync_codec::Fields;

/// Which records a scan returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    /// Only records that are not tombstoned (normal queries).
    Live,
    /// Live records and tombstones.
    IncludeDeleted,
}

/// Local persistence for typed records.
///
/// The sync engine reads and writes exclusively through this trait and never
/// holds a record across calls. Implementations must make
/// [`RecordStore::commit`] atomic for the single record it addresses.
///
/// # Invariants
///
/// - `find_dirty` returns every record with `dirty == true`, tombstones included
/// - `scan(.., Visibility::Live)` never returns tombstones
/// - `commit` observes and replaces the record under one lock or transaction
pub trait RecordStore: Send + Sync {
    /// Looks up a record by key, tombstones included.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn find(&self, key: &RecordKey) -> CoreResult<Option<Record>>;

    /// Returns all dirty records of a type, ordered by identity.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn find_dirty(&self, record_type: &RecordType) -> CoreResult<Vec<Record>>;

    /// Returns records of a type, ordered by identity.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn scan(&self, record_type: &RecordType, visibility: Visibility) -> CoreResult<Vec<Record>>;

    /// Writes a record unconditionally.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CommitFailed`] if the write is not durable.
    fn put(&self, record: Record) -> CoreResult<()>;

    /// Atomic read-modify-write of one record.
    ///
    /// `mutation` sees the current record (or `None`) and returns the record
    /// to store, or `None` to leave the store unchanged. Returns whatever was
    /// written.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CommitFailed`] if the transaction cannot commit;
    /// in that case nothing is written.
    fn commit(
        &self,
        key: &RecordKey,
        mutation: &mut dyn FnMut(Option<&Record>) -> Option<Record>,
    ) -> CoreResult<Option<Record>>;

    /// Counts records of a type.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn count(&self, record_type: &RecordType, visibility: Visibility) -> CoreResult<usize> {
        Ok(self.scan(record_type, visibility)?.len())
    }
}

/// Application-side mutations that keep sync metadata correct.
///
/// Every method runs as one [`RecordStore::commit`], so revision bumps and
/// the dirty flag are written together with the field change.
pub trait LocalMutations: RecordStore {
    /// Creates a new local record (revision 1, dirty).
    ///
    /// # Errors
    ///
    /// Propagates store commit failures.
    fn create(&self, record_type: impl Into<RecordType>, fields: Fields) -> CoreResult<Record> {
        let record = Record::new(record_type, fields);
        self.put(record.clone())?;
        Ok(record)
    }

    /// Edits the fields of a live record.
    ///
    /// The revision is bumped once if any field changed; an edit that leaves
    /// every value as it was is not a mutation.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] or [`CoreError::RecordDeleted`] if the
    /// record cannot be edited, or a commit failure.
    fn modify<F>(&self, key: &RecordKey, edit: F) -> CoreResult<Record>
    where
        F: FnOnce(&mut Fields),
    {
        let mut edit = Some(edit);
        let mut outcome: CoreResult<Record> = Err(CoreError::NotFound(key.clone()));

        self.commit(key, &mut |current| {
            let current = current?;
            if current.deleted {
                outcome = Err(CoreError::RecordDeleted(key.clone()));
                return None;
            }
            if !current.revision.has_successor() {
                outcome = Err(CoreError::RevisionExhausted(key.clone()));
                return None;
            }
            let mut record = current.clone();
            let mut fields = record.fields.clone();
            if let Some(edit) = edit.take() {
                edit(&mut fields);
            }
            let changed = record.replace_fields(fields);
            outcome = Ok(record.clone());
            changed.then_some(record)
        })?;

        outcome
    }

    /// Logically deletes a record.
    ///
    /// Deleting a tombstone is a no-op that returns it unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] or a commit failure.
    fn destroy(&self, key: &RecordKey) -> CoreResult<Record> {
        let mut outcome: CoreResult<Record> = Err(CoreError::NotFound(key.clone()));

        self.commit(key, &mut |current| {
            let current = current?;
            if !current.deleted && !current.revision.has_successor() {
                outcome = Err(CoreError::RevisionExhausted(key.clone()));
                return None;
            }
            let mut record = current.clone();
            let changed = record.mark_deleted();
            outcome = Ok(record.clone());
            changed.then_some(record)
        })?;

        outcome
    }
}

impl<S: RecordStore + ?Sized> LocalMutations for S {}
