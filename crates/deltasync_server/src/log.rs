//! Server-side delta log.

use deltasync_core::RecordKey;
use deltasync_protocol::{AckSet, Checkpoint, Delta, DeltaOperation, DeltaPack, PackId};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, VecDeque};

/// A page read from the log.
#[derive(Debug, Clone)]
pub struct LogPage {
    /// Deltas in UST order.
    pub deltas: Vec<Delta>,
    /// UST of the last delta in the page, or the requested position if empty.
    pub checkpoint: Checkpoint,
    /// True if deltas beyond this page exist.
    pub has_more: bool,
}

struct LogState {
    /// Current delta per record, keyed by the UST it was stamped with.
    entries: BTreeMap<u64, Delta>,
    /// Record key to the UST of its current entry.
    latest: HashMap<RecordKey, u64>,
    /// Last UST handed out.
    ust: u64,
    /// Ack sets of recently applied packs.
    packs: HashMap<PackId, AckSet>,
    /// Pack IDs in arrival order, for eviction.
    pack_order: VecDeque<PackId>,
}

/// Server-side delta log.
///
/// The log keeps only the latest delta per record. Every accepted change is
/// stamped with a fresh, strictly increasing update sequence number (UST),
/// so a client that pulls everything after its checkpoint sees the current
/// state of each record changed since then.
pub struct DeltaLog {
    state: RwLock<LogState>,
    pack_history: usize,
}

impl DeltaLog {
    /// Creates an empty log remembering up to `pack_history` pack IDs.
    pub fn new(pack_history: usize) -> Self {
        Self {
            state: RwLock::new(LogState {
                entries: BTreeMap::new(),
                latest: HashMap::new(),
                ust: 0,
                packs: HashMap::new(),
                pack_order: VecDeque::new(),
            }),
            pack_history,
        }
    }

    /// Returns the last UST handed out.
    pub fn latest_ust(&self) -> Checkpoint {
        Checkpoint::new(self.state.read().ust)
    }

    /// Returns the number of records held.
    pub fn len(&self) -> usize {
        self.state.read().latest.len()
    }

    /// Returns true if no record has been accepted.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the current delta for a record.
    pub fn get(&self, key: &RecordKey) -> Option<Delta> {
        let state = self.state.read();
        state
            .latest
            .get(key)
            .and_then(|ust| state.entries.get(ust))
            .cloned()
    }

    /// Returns up to `limit` deltas stamped after `since`.
    pub fn deltas_since(&self, since: Checkpoint, limit: u32) -> LogPage {
        let state = self.state.read();
        let mut range = state.entries.range(since.as_u64().saturating_add(1)..);

        let mut deltas = Vec::new();
        let mut checkpoint = since;
        for (ust, delta) in range.by_ref().take(limit as usize) {
            deltas.push(delta.clone());
            checkpoint = Checkpoint::new(*ust);
        }

        LogPage {
            deltas,
            checkpoint,
            has_more: range.next().is_some(),
        }
    }

    /// Applies a pushed pack and returns its ack set.
    ///
    /// A pack ID seen before gets the ack set it got the first time. Each
    /// delta is then judged against the stored revision of its record:
    ///
    /// | pushed vs stored          | outcome                                  |
    /// |---------------------------|------------------------------------------|
    /// | no stored record          | accepted                                 |
    /// | higher                    | accepted                                 |
    /// | equal, same content       | acked, not re-stamped                    |
    /// | equal, different content  | rejected; stored record bumped one       |
    /// | lower                     | rejected                                 |
    ///
    /// A delta at the highest possible revision is always rejected.
    pub fn append(&self, pack: &DeltaPack) -> AckSet {
        let mut state = self.state.write();

        if let Some(acks) = state.packs.get(&pack.pack_id) {
            tracing::debug!(pack = %pack.pack_id, "redelivered pack, returning stored acks");
            return acks.clone();
        }

        let mut acks = AckSet::new(pack.pack_id);
        for delta in pack {
            if !delta.revision.has_successor() {
                acks.reject(delta, "revision exhausted");
                continue;
            }
            let key = delta.key();
            let stored = state
                .latest
                .get(&key)
                .and_then(|ust| state.entries.get(ust))
                .cloned();

            match stored {
                None => {
                    let mut accepted = delta.clone();
                    if !accepted.is_delete() {
                        accepted.operation = DeltaOperation::Insert;
                    }
                    state.stamp(key, accepted);
                    acks.ack(delta);
                }
                Some(stored) if delta.revision > stored.revision => {
                    let mut accepted = delta.clone();
                    accepted.operation = if stored.is_delete() || delta.is_delete() {
                        DeltaOperation::Delete
                    } else {
                        DeltaOperation::Update
                    };
                    state.stamp(key, accepted);
                    acks.ack(delta);
                }
                Some(stored) if delta.revision == stored.revision => {
                    if same_content(delta, &stored) {
                        acks.ack(delta);
                    } else {
                        tracing::info!(
                            record = %delta.id,
                            revision = %delta.revision,
                            "revision collision, bumping stored record"
                        );
                        if let Some(next) = stored.revision.next() {
                            let mut bumped = stored;
                            bumped.revision = next;
                            state.stamp(key, bumped);
                        }
                        acks.reject(delta, "revision collision");
                    }
                }
                Some(stored) => {
                    acks.reject(
                        delta,
                        format!("remote has newer revision {}", stored.revision),
                    );
                }
            }
        }

        state.remember(pack.pack_id, acks.clone(), self.pack_history);
        acks
    }
}

impl Default for DeltaLog {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl LogState {
    fn stamp(&mut self, key: RecordKey, delta: Delta) {
        self.ust += 1;
        if let Some(previous) = self.latest.insert(key, self.ust) {
            self.entries.remove(&previous);
        }
        self.entries.insert(self.ust, delta);
    }

    fn remember(&mut self, pack_id: PackId, acks: AckSet, capacity: usize) {
        if capacity == 0 {
            return;
        }
        while self.pack_order.len() >= capacity {
            if let Some(evicted) = self.pack_order.pop_front() {
                self.packs.remove(&evicted);
            }
        }
        self.pack_order.push_back(pack_id);
        self.packs.insert(pack_id, acks);
    }
}

fn same_content(a: &Delta, b: &Delta) -> bool {
    a.is_delete() == b.is_delete() && a.fields == b.fields
}
