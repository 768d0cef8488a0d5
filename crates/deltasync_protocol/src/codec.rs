//! Conversion between stored records and wire deltas.

use crate::delta::{Delta, DeltaOperation};
use deltasync_core::Record;

impl Delta {
    /// Builds the outbound delta for a local record.
    ///
    /// Tombstones always produce [`DeltaOperation::Delete`]. Otherwise the
    /// operation is [`DeltaOperation::Insert`] until the remote has
    /// acknowledged the record once, then [`DeltaOperation::Update`].
    pub fn from_record(record: &Record) -> Self {
        let operation = if record.deleted {
            DeltaOperation::Delete
        } else if record.is_new() {
            DeltaOperation::Insert
        } else {
            DeltaOperation::Update
        };

        Self {
            id: record.id,
            record_type: record.record_type.clone(),
            operation,
            revision: record.revision,
            fields: record.fields.clone(),
            timestamp: record.updated_at,
        }
    }

    /// Materializes a remote delta as a clean local record.
    pub fn to_record(&self) -> Record {
        Record::from_remote(
            self.record_type.clone(),
            self.id,
            self.revision,
            self.fields.clone(),
            self.is_delete(),
            self.timestamp,
        )
    }
}

impl From<&Record> for Delta {
    fn from(record: &Record) -> Self {
        Delta::from_record(record)
    }
}
