//! Deltas and delta packs.

use deltasync_codec::Fields;
use deltasync_core::{RecordId, RecordKey, RecordType, Revision};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Kind of change a delta describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaOperation {
    /// First time the remote sees this record.
    Insert,
    /// Change to a record the remote already holds.
    Update,
    /// Logical deletion.
    Delete,
}

impl DeltaOperation {
    /// Converts to a numeric code.
    pub fn to_code(&self) -> u8 {
        match self {
            DeltaOperation::Insert => 1,
            DeltaOperation::Update => 2,
            DeltaOperation::Delete => 3,
        }
    }

    /// Converts from a numeric code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(DeltaOperation::Insert),
            2 => Some(DeltaOperation::Update),
            3 => Some(DeltaOperation::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for DeltaOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DeltaOperation::Insert => "insert",
            DeltaOperation::Update => "update",
            DeltaOperation::Delete => "delete",
        })
    }
}

/// One record's change, as transmitted.
///
/// Deltas always carry a full field snapshot; there is no field-level merge
/// on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    /// Record identity.
    pub id: RecordId,
    /// Record type.
    pub record_type: RecordType,
    /// Change kind.
    pub operation: DeltaOperation,
    /// Revision of the record this delta was taken from.
    pub revision: Revision,
    /// Full field snapshot.
    pub fields: Fields,
    /// Mutation time on the authoring replica, in milliseconds.
    pub timestamp: i64,
}

impl Delta {
    /// Returns the record key.
    pub fn key(&self) -> RecordKey {
        RecordKey::new(self.record_type.clone(), self.id)
    }

    /// Returns true for delete deltas.
    pub fn is_delete(&self) -> bool {
        self.operation == DeltaOperation::Delete
    }
}

/// Logical timestamp of the last fully-applied remote state ("latest UST").
///
/// Zero means nothing has been pulled yet; pulling from zero is a full resync.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Checkpoint(pub u64);

impl Checkpoint {
    /// The initial checkpoint.
    pub const ZERO: Checkpoint = Checkpoint(0);

    /// Creates a checkpoint.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ust:{}", self.0)
    }
}

/// Identity of a delta pack, used by the remote to recognize redelivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackId(Uuid);

impl PackId {
    /// Creates a fresh random pack ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PackId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An ordered batch of deltas for one direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaPack {
    /// Pack identity.
    pub pack_id: PackId,
    /// Device that authored an outbound pack; `None` for remote packs.
    pub origin: Option<Uuid>,
    /// For inbound packs, the latest remote checkpoint the pack covers.
    /// For outbound packs, the checkpoint the client had when extracting.
    pub source_checkpoint: Checkpoint,
    /// Deltas in application order.
    pub deltas: Vec<Delta>,
}

impl DeltaPack {
    /// Creates an empty pack.
    pub fn new(source_checkpoint: Checkpoint) -> Self {
        Self {
            pack_id: PackId::new(),
            origin: None,
            source_checkpoint,
            deltas: Vec::new(),
        }
    }

    /// Creates a pack from deltas.
    pub fn with_deltas(source_checkpoint: Checkpoint, deltas: Vec<Delta>) -> Self {
        Self {
            deltas,
            ..Self::new(source_checkpoint)
        }
    }

    /// Sets the authoring device.
    #[must_use]
    pub fn from_origin(mut self, origin: Uuid) -> Self {
        self.origin = Some(origin);
        self
    }

    /// Appends a delta.
    pub fn push(&mut self, delta: Delta) {
        self.deltas.push(delta);
    }

    /// Number of deltas.
    pub fn len(&self) -> usize {
        self.deltas.len()
    }

    /// Returns true if the pack has no deltas.
    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }

    /// Iterates over deltas in order.
    pub fn iter(&self) -> std::slice::Iter<'_, Delta> {
        self.deltas.iter()
    }

    /// Groups deltas by record type, types in order of first appearance.
    pub fn by_type(&self) -> Vec<(&RecordType, Vec<&Delta>)> {
        let mut groups: Vec<(&RecordType, Vec<&Delta>)> = Vec::new();
        for delta in &self.deltas {
            match groups.iter_mut().find(|(t, _)| *t == &delta.record_type) {
                Some((_, group)) => group.push(delta),
                None => groups.push((&delta.record_type, vec![delta])),
            }
        }
        groups
    }

    /// Splits into packs of at most `size` deltas, each with its own pack ID.
    ///
    /// A `size` of zero is treated as one.
    pub fn chunks(&self, size: usize) -> Vec<DeltaPack> {
        self.deltas
            .chunks(size.max(1))
            .map(|chunk| DeltaPack {
                pack_id: PackId::new(),
                origin: self.origin,
                source_checkpoint: self.source_checkpoint,
                deltas: chunk.to_vec(),
            })
            .collect()
    }
}

impl<'a> IntoIterator for &'a DeltaPack {
    type Item = &'a Delta;
    type IntoIter = std::slice::Iter<'a, Delta>;

    fn into_iter(self) -> Self::IntoIter {
        self.deltas.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deltasync_codec::{Decode, Encode, Value};

    fn delta(record_type: &str, revision: u64) -> Delta {
        let mut fields = Fields::new();
        fields.insert("n".into(), Value::from(revision as i64));
        Delta {
            id: RecordId::new(),
            record_type: record_type.into(),
            operation: DeltaOperation::Update,
            revision: Revision::new(revision),
            fields,
            timestamp: 1_700_000_000_000,
        }
    }

    #[test]
    fn operation_codes() {
        for op in [
            DeltaOperation::Insert,
            DeltaOperation::Update,
            DeltaOperation::Delete,
        ] {
            assert_eq!(DeltaOperation::from_code(op.to_code()), Some(op));
        }
        assert_eq!(DeltaOperation::from_code(0), None);
        assert_eq!(DeltaOperation::Delete.to_string(), "delete");
    }

    #[test]
    fn pack_wire_roundtrip() {
        let origin = Uuid::new_v4();
        let mut pack = DeltaPack::new(Checkpoint::new(42)).from_origin(origin);
        pack.push(delta("Book", 3));
        let mut tombstone = delta("Author", 9);
        tombstone.operation = DeltaOperation::Delete;
        pack.push(tombstone);

        let decoded = DeltaPack::decode(&pack.encode().unwrap()).unwrap();
        assert_eq!(decoded, pack);
        assert!(decoded.deltas[1].is_delete());
    }

    #[test]
    fn by_type_keeps_first_appearance_order() {
        let pack = DeltaPack::with_deltas(
            Checkpoint::ZERO,
            vec![delta("Book", 1), delta("Author", 1), delta("Book", 2)],
        );

        let groups = pack.by_type();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0.as_str(), "Book");
        assert_eq!(groups[0].1.len(), 2);
        assert_eq!(groups[1].0.as_str(), "Author");
    }

    #[test]
    fn chunks_get_fresh_ids() {
        let pack = DeltaPack::with_deltas(
            Checkpoint::new(5),
            (1..=5).map(|r| delta("Book", r)).collect(),
        );

        let chunks = pack.chunks(2);
        assert_eq!(chunks.iter().map(DeltaPack::len).collect::<Vec<_>>(), vec![2, 2, 1]);
        assert_ne!(chunks[0].pack_id, chunks[1].pack_id);
        assert!(chunks.iter().all(|c| c.source_checkpoint == Checkpoint::new(5)));

        assert_eq!(pack.chunks(0).len(), 5);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;
        use std::collections::HashSet;

        fn pack_of(types: &[usize]) -> DeltaPack {
            let names = ["Book", "Author", "Shelf"];
            DeltaPack::with_deltas(
                Checkpoint::new(11),
                types
                    .iter()
                    .enumerate()
                    .map(|(i, t)| delta(names[*t], i as u64 + 1))
                    .collect(),
            )
            .from_origin(Uuid::nil())
        }

        proptest! {
            #[test]
            fn chunks_preserve_order_and_bounds(
                types in prop::collection::vec(0usize..3, 0..40),
                size in 0usize..12,
            ) {
                let pack = pack_of(&types);
                let chunks = pack.chunks(size);

                let rejoined: Vec<Delta> = chunks.iter().flat_map(|c| c.deltas.clone()).collect();
                prop_assert_eq!(&rejoined, &pack.deltas);

                let ids: HashSet<PackId> = chunks.iter().map(|c| c.pack_id).collect();
                prop_assert_eq!(ids.len(), chunks.len());
                for chunk in &chunks {
                    prop_assert!(!chunk.is_empty());
                    prop_assert!(chunk.len() <= size.max(1));
                    prop_assert_eq!(chunk.origin, pack.origin);
                    prop_assert_eq!(chunk.source_checkpoint, pack.source_checkpoint);
                }
            }

            #[test]
            fn by_type_partitions_the_pack(types in prop::collection::vec(0usize..3, 0..40)) {
                let pack = pack_of(&types);
                let groups = pack.by_type();

                let total: usize = groups.iter().map(|(_, g)| g.len()).sum();
                prop_assert_eq!(total, pack.len());

                let distinct: HashSet<&RecordType> = groups.iter().map(|(t, _)| *t).collect();
                prop_assert_eq!(distinct.len(), groups.len());

                for (record_type, group) in &groups {
                    prop_assert!(group.iter().all(|d| &d.record_type == *record_type));
                    // Each group keeps pack order.
                    let revisions: Vec<u64> = group.iter().map(|d| d.revision.as_u64()).collect();
                    let mut sorted = revisions.clone();
                    sorted.sort_unstable();
                    prop_assert_eq!(revisions, sorted);
                }
            }
        }
    }
}
