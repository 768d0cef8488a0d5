//! In-memory record store.

use crate::error::{CoreError, CoreResult};
use crate::id::RecordId;
use crate::record::Record;
use crate::store::{RecordStore, Visibility};
use crate::types::{RecordKey, RecordType};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};

/// An in-memory [`RecordStore`].
///
/// Suitable for:
/// - Unit and integration tests
/// - Ephemeral replicas that don't need persistence
///
/// Each `commit` runs under the table write lock, which makes it atomic for
/// the record it touches. Commit failures can be injected per record to
/// exercise partial-failure paths.
///
/// # Example
///
/// ```rust
/// use deltasync_core::{Fields, LocalMutations, MemoryRecordStore, RecordStore, RecordType};
///
/// let store = MemoryRecordStore::new();
/// let record = store.create("Note", Fields::new()).unwrap();
/// assert!(record.dirty);
/// assert_eq!(store.find_dirty(&RecordType::from("Note")).unwrap().len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    tables: RwLock<HashMap<RecordType, BTreeMap<RecordId, Record>>>,
    failing: RwLock<HashSet<RecordId>>,
}

impl MemoryRecordStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent write to `id` fail until cleared.
    pub fn fail_commits_for(&self, id: RecordId) {
        self.failing.write().insert(id);
    }

    /// Removes all injected failures.
    pub fn clear_failures(&self) {
        self.failing.write().clear();
    }

    /// Physically removes a record.
    ///
    /// Reserved for retention passes over tombstones; sync never calls it.
    /// Returns the removed record.
    pub fn purge(&self, key: &RecordKey) -> Option<Record> {
        self.tables
            .write()
            .get_mut(&key.record_type)
            .and_then(|table| table.remove(&key.id))
    }

    /// Total number of stored records across all types, tombstones included.
    pub fn len(&self) -> usize {
        self.tables.read().values().map(BTreeMap::len).sum()
    }

    /// Returns true if the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_writable(&self, key: &RecordKey) -> CoreResult<()> {
        if self.failing.read().contains(&key.id) {
            return Err(CoreError::commit_failed(key.clone(), "injected failure"));
        }
        Ok(())
    }
}

impl RecordStore for MemoryRecordStore {
    fn find(&self, key: &RecordKey) -> CoreResult<Option<Record>> {
        Ok(self
            .tables
            .read()
            .get(&key.record_type)
            .and_then(|table| table.get(&key.id))
            .cloned())
    }

    fn find_dirty(&self, record_type: &RecordType) -> CoreResult<Vec<Record>> {
        Ok(self
            .tables
            .read()
            .get(record_type)
            .map(|table| table.values().filter(|r| r.dirty).cloned().collect())
            .unwrap_or_default())
    }

    fn scan(&self, record_type: &RecordType, visibility: Visibility) -> CoreResult<Vec<Record>> {
        Ok(self
            .tables
            .read()
            .get(record_type)
            .map(|table| {
                table
                    .values()
                    .filter(|r| visibility == Visibility::IncludeDeleted || r.is_live())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn put(&self, record: Record) -> CoreResult<()> {
        self.check_writable(&record.key())?;
        self.tables
            .write()
            .entry(record.record_type.clone())
            .or_default()
            .insert(record.id, record);
        Ok(())
    }

    fn commit(
        &self,
        key: &RecordKey,
        mutation: &mut dyn FnMut(Option<&Record>) -> Option<Record>,
    ) -> CoreResult<Option<Record>> {
        let mut tables = self.tables.write();
        let table = tables.entry(key.record_type.clone()).or_default();

        let Some(next) = mutation(table.get(&key.id)) else {
            return Ok(None);
        };
        if next.id != key.id || next.record_type != key.record_type {
            return Err(CoreError::commit_failed(
                key.clone(),
                format!("mutation returned a different record: {}", next.key()),
            ));
        }
        self.check_writable(key)?;

        table.insert(key.id, next.clone());
        Ok(Some(next))
    }
}
