//! Clearing dirty flags after acknowledgment.

use crate::observer::SyncObserver;
use deltasync_core::{RecordKey, RecordStore};
use deltasync_protocol::Delta;

/// What an undirty pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UndirtyReport {
    /// Records marked clean.
    pub cleared: Vec<RecordKey>,
    /// Records left dirty because they changed after extraction.
    pub retained: Vec<RecordKey>,
    /// Acknowledged records no longer in the store.
    pub missing: Vec<RecordKey>,
    /// Records whose undirty commit failed; they stay dirty and resend.
    pub failed: Vec<RecordKey>,
}

impl UndirtyReport {
    /// Merges another chunk's report into this one.
    pub fn extend(&mut self, other: UndirtyReport) {
        self.cleared.extend(other.cleared);
        self.retained.extend(other.retained);
        self.missing.extend(other.missing);
        self.failed.extend(other.failed);
    }
}

enum Outcome {
    Cleared,
    Retained,
    Missing,
}

/// Marks acknowledged records as synced.
///
/// A record is cleared only if its current revision equals the acknowledged
/// delta's revision. A local edit made during the round trip bumps the
/// revision, so that record stays dirty and the next push sends the newer
/// state.
pub struct UndirtyCoordinator<'a> {
    store: &'a dyn RecordStore,
    observer: &'a dyn SyncObserver,
}

impl<'a> UndirtyCoordinator<'a> {
    /// Creates a coordinator.
    pub fn new(store: &'a dyn RecordStore, observer: &'a dyn SyncObserver) -> Self {
        Self { store, observer }
    }

    /// Undirties the records behind `acknowledged`.
    pub fn undirty<'d, I>(&self, acknowledged: I) -> UndirtyReport
    where
        I: IntoIterator<Item = &'d Delta>,
    {
        let mut report = UndirtyReport::default();

        for delta in acknowledged {
            let key = delta.key();
            let mut outcome = Outcome::Missing;

            let committed = self.store.commit(&key, &mut |current| {
                let Some(local) = current else {
                    outcome = Outcome::Missing;
                    return None;
                };
                if local.revision != delta.revision {
                    outcome = Outcome::Retained;
                    return None;
                }
                outcome = Outcome::Cleared;
                if !local.dirty && local.synced_revision == Some(local.revision) {
                    return None;
                }
                let mut record = local.clone();
                record.mark_synced();
                Some(record)
            });

            match (committed, outcome) {
                (Err(e), _) => {
                    tracing::warn!(
                        record_type = %key.record_type,
                        id = %key.id,
                        error = %e,
                        "undirty commit failed"
                    );
                    report.failed.push(key);
                }
                (Ok(_), Outcome::Cleared) => report.cleared.push(key),
                (Ok(_), Outcome::Retained) => {
                    tracing::debug!(
                        record_type = %key.record_type,
                        id = %key.id,
                        acknowledged = delta.revision.as_u64(),
                        "record changed during round trip, left dirty"
                    );
                    report.retained.push(key);
                }
                (Ok(_), Outcome::Missing) => report.missing.push(key),
            }
        }

        self.observer.after_undirty(&report);
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::NoopObserver;
    use deltasync_core::{Fields, LocalMutations, MemoryRecordStore, Record, Revision, Value};

    fn title(t: &str) -> Fields {
        let mut fields = Fields::new();
        fields.insert("title".into(), Value::from(t));
        fields
    }

    #[test]
    fn clears_matching_revision() {
        let store = MemoryRecordStore::new();
        let record = store.create("Book", title("Dune")).unwrap();
        let sent = Delta::from_record(&record);

        let report = UndirtyCoordinator::new(&store, &NoopObserver).undirty([&sent]);
        assert_eq!(report.cleared, vec![record.key()]);

        let stored = store.find(&record.key()).unwrap().unwrap();
        assert!(!stored.dirty);
        assert_eq!(stored.revision, Revision::new(1));
        assert_eq!(stored.synced_revision, Some(Revision::new(1)));
        assert!(stored.touched.is_empty());
    }

    #[test]
    fn keeps_record_edited_during_round_trip() {
        let store = MemoryRecordStore::new();
        let record = store.create("Book", title("Dune")).unwrap();
        store.modify(&record.key(), |f| {
            f.insert("title".into(), Value::from("v2"));
        })
        .unwrap();
        let sent = Delta::from_record(&store.find(&record.key()).unwrap().unwrap());
        store.modify(&record.key(), |f| {
            f.insert("title".into(), Value::from("v3"));
        })
        .unwrap();

        let report = UndirtyCoordinator::new(&store, &NoopObserver).undirty([&sent]);
        assert_eq!(report.retained, vec![record.key()]);

        let stored = store.find(&record.key()).unwrap().unwrap();
        assert!(stored.dirty);
        assert_eq!(stored.revision, Revision::new(3));
    }

    #[test]
    fn missing_and_failed_records() {
        let store = MemoryRecordStore::new();
        let ghost = Delta::from_record(&Record::new("Book", title("x")));

        let record = store.create("Book", title("Dune")).unwrap();
        store.fail_commits_for(record.id);
        let sent = Delta::from_record(&record);

        let report = UndirtyCoordinator::new(&store, &NoopObserver).undirty([&ghost, &sent]);
        assert_eq!(report.missing, vec![ghost.key()]);
        assert_eq!(report.failed, vec![record.key()]);
        assert!(store.find(&record.key()).unwrap().unwrap().dirty);
    }

    #[test]
    fn repeated_ack_is_harmless() {
        let store = MemoryRecordStore::new();
        let record = store.create("Book", title("Dune")).unwrap();
        let sent = Delta::from_record(&record);
        let coordinator = UndirtyCoordinator::new(&store, &NoopObserver);

        coordinator.undirty([&sent]);
        let again = coordinator.undirty([&sent]);
        assert_eq!(again.cleared, vec![record.key()]);
        assert!(!store.find(&record.key()).unwrap().unwrap().dirty);
    }
}
