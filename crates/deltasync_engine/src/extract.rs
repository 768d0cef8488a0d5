//! Outbound delta extraction.

use crate::error::SyncResult;
use crate::observer::SyncObserver;
use deltasync_core::{RecordStore, SchemaRegistry};
use deltasync_protocol::{Checkpoint, Delta, DeltaPack};
use uuid::Uuid;

/// Builds outbound packs from dirty records.
///
/// Extraction is read-only: dirty flags are cleared only by the
/// [`crate::UndirtyCoordinator`] after the remote acknowledges a delta.
pub struct DeltaExtractor<'a> {
    store: &'a dyn RecordStore,
    registry: &'a SchemaRegistry,
    observer: &'a dyn SyncObserver,
}

impl<'a> DeltaExtractor<'a> {
    /// Creates an extractor over `store` for the types in `registry`.
    pub fn new(
        store: &'a dyn RecordStore,
        registry: &'a SchemaRegistry,
        observer: &'a dyn SyncObserver,
    ) -> Self {
        Self {
            store,
            registry,
            observer,
        }
    }

    /// Collects one delta per dirty record, tombstones included.
    ///
    /// Types are visited in registration order, records in identity order.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn extract(&self, checkpoint: Checkpoint, origin: Uuid) -> SyncResult<DeltaPack> {
        let mut pack = DeltaPack::new(checkpoint).from_origin(origin);

        for record_type in self.registry.record_types() {
            self.observer.before_extract(record_type);
            let dirty = self.store.find_dirty(record_type)?;
            tracing::debug!(
                record_type = %record_type,
                dirty = dirty.len(),
                "extracting deltas"
            );
            for record in &dirty {
                pack.push(Delta::from_record(record));
            }
        }

        Ok(pack)
    }
}
