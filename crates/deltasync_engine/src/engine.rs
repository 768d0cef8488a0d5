//! Sync orchestrator state machine.

use crate::apply::{AppliedResult, DeltaApplier};
use crate::checkpoint::{CheckpointStore, MemoryCheckpointStore};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::extract::DeltaExtractor;
use crate::observer::{NoopObserver, SyncObserver};
use crate::transport::SyncTransport;
use crate::undirty::{UndirtyCoordinator, UndirtyReport};
use deltasync_core::{RecordSchema, RecordStore, RecordType, SchemaRegistry};
use deltasync_protocol::{Checkpoint, ConflictPolicy, ConflictResolver, DeltaNack, DeltaPack};
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Stage of a cycle, used to report where a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncStage {
    /// Fetching remote deltas.
    Pull,
    /// Applying fetched deltas and advancing the checkpoint.
    PullApply,
    /// Extracting and transmitting local deltas.
    Push,
    /// Undirtying acknowledged deltas.
    PushAck,
}

/// The current state of the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncState {
    /// No cycle running.
    Idle,
    /// Fetching remote deltas.
    Pulling,
    /// Applying remote deltas.
    PullApplying,
    /// Extracting and sending local deltas.
    Pushing,
    /// Processing the remote acknowledgment.
    PushAcking,
    /// The last cycle stopped on an unrecoverable error in `stage`.
    Failed(SyncStage),
}

impl SyncState {
    /// Returns true if a cycle is running.
    pub fn is_active(&self) -> bool {
        self.stage().is_some()
    }

    /// Returns true if a new cycle can start from this state.
    pub fn can_start_sync(&self) -> bool {
        matches!(self, SyncState::Idle | SyncState::Failed(_))
    }

    /// Stage corresponding to an active state.
    pub fn stage(&self) -> Option<SyncStage> {
        match self {
            SyncState::Pulling => Some(SyncStage::Pull),
            SyncState::PullApplying => Some(SyncStage::PullApply),
            SyncState::Pushing => Some(SyncStage::Push),
            SyncState::PushAcking => Some(SyncStage::PushAck),
            SyncState::Idle | SyncState::Failed(_) => None,
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncState::Idle => f.write_str("idle"),
            SyncState::Pulling => f.write_str("pulling"),
            SyncState::PullApplying => f.write_str("pull-applying"),
            SyncState::Pushing => f.write_str("pushing"),
            SyncState::PushAcking => f.write_str("push-acking"),
            SyncState::Failed(stage) => write!(f, "failed({stage:?})"),
        }
    }
}

/// Statistics about sync operations.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Total number of full cycles completed.
    pub cycles_completed: u64,
    /// Total number of deltas pulled.
    pub deltas_pulled: u64,
    /// Total number of deltas acknowledged by the remote.
    pub deltas_pushed: u64,
    /// Total number of conflicts resolved.
    pub conflicts_resolved: u64,
    /// Total number of stale deltas ignored.
    pub stale_deltas: u64,
    /// Total number of failed record commits.
    pub commit_failures: u64,
    /// Total number of retries by [`SyncEngine::sync_with_retry`].
    pub retries: u64,
    /// Time of the last completed cycle.
    pub last_sync_time: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Outcome of a pull.
#[derive(Debug, Clone, Default)]
pub struct PullReport {
    /// Pages fetched.
    pub pages: u32,
    /// Deltas received.
    pub pulled: u64,
    /// Combined apply outcome of all pages.
    pub applied: AppliedResult,
    /// Checkpoint before the pull.
    pub checkpoint_before: Checkpoint,
    /// Checkpoint after the pull.
    pub checkpoint_after: Checkpoint,
}

impl PullReport {
    /// Returns true if every fetched delta was applied or permanently settled.
    pub fn is_complete(&self) -> bool {
        self.applied.is_complete()
    }
}

/// Outcome of a push.
#[derive(Debug, Clone, Default)]
pub struct PushReport {
    /// Deltas extracted.
    pub extracted: u64,
    /// Deltas the remote acknowledged.
    pub pushed: u64,
    /// Deltas the remote refused; they stay dirty.
    pub refused: Vec<DeltaNack>,
    /// Combined undirty outcome of all chunks.
    pub undirty: UndirtyReport,
}

/// Result of a full sync cycle.
#[derive(Debug, Clone)]
pub struct SyncCycleResult {
    /// Pull half.
    pub pull: PullReport,
    /// Push half.
    pub push: PushReport,
    /// Duration of the cycle.
    pub duration: Duration,
}

impl SyncCycleResult {
    /// Returns true if nothing is left to retry from this cycle.
    pub fn is_complete(&self) -> bool {
        self.pull.is_complete()
            && self.push.refused.is_empty()
            && self.push.undirty.failed.is_empty()
    }
}

/// Handle that cancels the running cycle from another thread.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    /// Requests cancellation at the next stage boundary.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }
}

struct FlightGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> FlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> SyncResult<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| SyncError::ConcurrentSyncRejected)?;
        Ok(Self { flag })
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Drives sync cycles for one record store.
///
/// The engine is an explicit context: it owns the transport, the checkpoint
/// store, the schema registry and the hooks, and borrows the record store
/// through [`RecordStore`]. At most one cycle runs at a time; a concurrent
/// call returns [`SyncError::ConcurrentSyncRejected`]. Application writes to
/// the store may continue during a cycle.
pub struct SyncEngine<T: SyncTransport> {
    config: SyncConfig,
    store: Arc<dyn RecordStore>,
    transport: T,
    checkpoints: Box<dyn CheckpointStore>,
    registry: RwLock<SchemaRegistry>,
    resolver: Arc<dyn ConflictResolver>,
    observer: Arc<dyn SyncObserver>,
    state: RwLock<SyncState>,
    stats: RwLock<SyncStats>,
    in_flight: AtomicBool,
    cancelled: Arc<AtomicBool>,
}

impl<T: SyncTransport> SyncEngine<T> {
    /// Creates an engine with an in-memory checkpoint, the default conflict
    /// policy and no registered types.
    pub fn new(config: SyncConfig, store: Arc<dyn RecordStore>, transport: T) -> Self {
        Self {
            config,
            store,
            transport,
            checkpoints: Box::new(MemoryCheckpointStore::new()),
            registry: RwLock::new(SchemaRegistry::new()),
            resolver: Arc::new(ConflictPolicy::default()),
            observer: Arc::new(NoopObserver),
            state: RwLock::new(SyncState::Idle),
            stats: RwLock::new(SyncStats::default()),
            in_flight: AtomicBool::new(false),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Uses `checkpoints` to persist the pull checkpoint.
    pub fn with_checkpoint_store(mut self, checkpoints: impl CheckpointStore + 'static) -> Self {
        self.checkpoints = Box::new(checkpoints);
        self
    }

    /// Replaces the schema registry.
    pub fn with_registry(mut self, registry: SchemaRegistry) -> Self {
        self.registry = RwLock::new(registry);
        self
    }

    /// Uses `resolver` for conflicts.
    pub fn with_resolver(mut self, resolver: impl ConflictResolver + 'static) -> Self {
        self.resolver = Arc::new(resolver);
        self
    }

    /// Installs an observer.
    pub fn with_observer(mut self, observer: Arc<dyn SyncObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Registers a record type for sync.
    ///
    /// # Errors
    ///
    /// Returns an error if the type is already registered.
    pub fn register(&self, schema: RecordSchema) -> SyncResult<()> {
        self.registry.write().register(schema)?;
        Ok(())
    }

    /// Registered types in registration order.
    pub fn record_types(&self) -> Vec<RecordType> {
        self.registry.read().record_types().cloned().collect()
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns the record store.
    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Returns the transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Gets the current state.
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Loads the persisted checkpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint cannot be read.
    pub fn checkpoint(&self) -> SyncResult<Checkpoint> {
        self.checkpoints.load()
    }

    /// Requests cancellation of the running cycle.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns a handle that can cancel cycles from another thread.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            flag: Arc::clone(&self.cancelled),
        }
    }

    /// Pending outbound deltas, without side effects.
    ///
    /// Observer hooks do not fire for a preview.
    ///
    /// # Errors
    ///
    /// Returns an error if the store or checkpoint cannot be read.
    pub fn get_deltas(&self) -> SyncResult<DeltaPack> {
        self.extract(&NoopObserver)
    }

    fn extract(&self, observer: &dyn SyncObserver) -> SyncResult<DeltaPack> {
        let checkpoint = self.checkpoints.load()?;
        let registry = self.registry.read();
        DeltaExtractor::new(self.store.as_ref(), &registry, observer)
            .extract(checkpoint, self.config.device_id)
    }

    /// Runs a full cycle: pull, then push.
    ///
    /// A pull with unapplied deltas does not stop the push; it only holds the
    /// checkpoint back.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::ConcurrentSyncRejected`] if a cycle is running,
    /// [`SyncError::Cancelled`] if cancelled between stages, or the transport
    /// or storage error that stopped the cycle.
    pub fn sync(&self) -> SyncResult<SyncCycleResult> {
        let start = Instant::now();
        let (pull, push) = self.run(|| {
            let pull = self.pull_stage()?;
            self.check_cancelled()?;
            let push = self.push_stage()?;
            Ok((pull, push))
        })?;

        let result = SyncCycleResult {
            pull,
            push,
            duration: start.elapsed(),
        };
        {
            let mut stats = self.stats.write();
            stats.cycles_completed += 1;
            stats.last_sync_time = Some(Instant::now());
        }
        tracing::info!(
            pulled = result.pull.pulled,
            pushed = result.push.pushed,
            conflicts = result.pull.applied.conflicts.len(),
            checkpoint = result.pull.checkpoint_after.as_u64(),
            elapsed_ms = result.duration.as_millis() as u64,
            "sync cycle complete"
        );
        Ok(result)
    }

    /// Pulls and applies remote deltas only.
    ///
    /// # Errors
    ///
    /// Same as [`SyncEngine::sync`].
    pub fn pull_sync(&self) -> SyncResult<PullReport> {
        self.run(|| self.pull_stage())
    }

    /// Extracts, sends and undirties local deltas only.
    ///
    /// # Errors
    ///
    /// Same as [`SyncEngine::sync`].
    pub fn push_sync(&self) -> SyncResult<PushReport> {
        self.run(|| self.push_stage())
    }

    /// Runs [`SyncEngine::sync`], retrying retryable errors with backoff.
    ///
    /// # Errors
    ///
    /// Returns the last error once attempts are exhausted, or the first
    /// non-retryable error.
    pub fn sync_with_retry(&self) -> SyncResult<SyncCycleResult> {
        let retry = &self.config.retry;
        let attempts = retry.attempts.max(1);

        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = retry.backoff(attempt);
                tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying sync");
                std::thread::sleep(delay);
                self.stats.write().retries += 1;
            }

            match self.sync() {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && attempt + 1 < attempts => {
                    tracing::warn!(attempt, error = %e, "sync attempt failed");
                }
                Err(e) => return Err(e),
            }
        }

        Err(SyncError::Protocol("no sync attempts made".into()))
    }

    fn run<R>(&self, body: impl FnOnce() -> SyncResult<R>) -> SyncResult<R> {
        let _guard = FlightGuard::acquire(&self.in_flight)?;
        self.cancelled.store(false, Ordering::SeqCst);

        match body() {
            Ok(value) => {
                self.set_state(SyncState::Idle);
                self.stats.write().last_error = None;
                Ok(value)
            }
            Err(SyncError::Cancelled) => {
                tracing::info!("sync cancelled");
                self.set_state(SyncState::Idle);
                Err(SyncError::Cancelled)
            }
            Err(e) => {
                let stage = self.state().stage().unwrap_or(SyncStage::Pull);
                tracing::warn!(?stage, error = %e, "sync failed");
                self.stats.write().last_error = Some(e.to_string());
                self.set_state(SyncState::Failed(stage));
                Err(e)
            }
        }
    }

    fn pull_stage(&self) -> SyncResult<PullReport> {
        let stored = self.checkpoints.load()?;
        let registered = self.record_types();
        let covered = self.checkpoints.load_covered()?;
        let uncovered: Vec<&RecordType> = registered
            .iter()
            .filter(|record_type| !covered.contains(*record_type))
            .collect();

        // Types registered after the checkpoint moved missed earlier pages.
        let mut checkpoint = stored;
        if !uncovered.is_empty() && stored > Checkpoint::ZERO {
            tracing::info!(
                checkpoint = stored.as_u64(),
                types = ?uncovered,
                "new record types registered, pulling from zero"
            );
            checkpoint = Checkpoint::ZERO;
        }
        let needs_cover = !uncovered.is_empty();

        let mut report = PullReport {
            checkpoint_before: stored,
            checkpoint_after: stored,
            ..PullReport::default()
        };
        let mut caught_up = false;

        loop {
            self.check_cancelled()?;
            self.set_state(SyncState::Pulling);
            let response = self
                .transport
                .fetch_deltas_since(checkpoint, self.config.pull_batch_size)?;
            let pack = response.pack;

            self.set_state(SyncState::PullApplying);
            let result = {
                let registry = self.registry.read();
                DeltaApplier::new(
                    self.store.as_ref(),
                    &registry,
                    self.resolver.as_ref(),
                    self.observer.as_ref(),
                )
                .apply(&pack)
            };
            let complete = result.is_complete();

            report.pages += 1;
            report.pulled += pack.len() as u64;
            {
                let mut stats = self.stats.write();
                stats.deltas_pulled += pack.len() as u64;
                stats.conflicts_resolved += result.conflicts.len() as u64;
                stats.stale_deltas += result.stale_count() as u64;
                stats.commit_failures += result.commit_failures() as u64;
            }
            report.applied.extend(result);

            if !complete {
                tracing::warn!(
                    checkpoint = checkpoint.as_u64(),
                    unapplied = report.applied.commit_failures(),
                    "pull partially applied, checkpoint held"
                );
                break;
            }

            let next = checkpoint.max(pack.source_checkpoint);
            if next > checkpoint {
                if next > report.checkpoint_after {
                    self.checkpoints.save(next)?;
                    tracing::debug!(
                        from = report.checkpoint_after.as_u64(),
                        to = next.as_u64(),
                        "checkpoint advanced"
                    );
                    report.checkpoint_after = next;
                }
                checkpoint = next;
            } else if response.has_more {
                return Err(SyncError::Protocol(format!(
                    "remote reported more deltas without advancing past {checkpoint}"
                )));
            }

            if !response.has_more {
                caught_up = true;
                break;
            }
        }

        if caught_up && needs_cover {
            self.checkpoints.save_covered(&registered)?;
        }

        Ok(report)
    }

    fn push_stage(&self) -> SyncResult<PushReport> {
        self.set_state(SyncState::Pushing);
        let pack = self.extract(self.observer.as_ref())?;
        let mut report = PushReport {
            extracted: pack.len() as u64,
            ..PushReport::default()
        };
        if pack.is_empty() {
            return Ok(report);
        }

        let undirtier = UndirtyCoordinator::new(self.store.as_ref(), self.observer.as_ref());
        for chunk in pack.chunks(self.config.push_batch_size as usize) {
            self.check_cancelled()?;
            self.set_state(SyncState::Pushing);
            let acks = self.transport.send_deltas(&chunk)?;

            self.set_state(SyncState::PushAcking);
            if acks.pack_id != chunk.pack_id {
                return Err(SyncError::Protocol(format!(
                    "acknowledgment for pack {} does not match sent pack {}",
                    acks.pack_id, chunk.pack_id
                )));
            }
            let acknowledged = acks.acknowledged_deltas(&chunk);
            let pushed = acknowledged.len() as u64;
            report.undirty.extend(undirtier.undirty(acknowledged));

            for nack in &acks.rejected {
                tracing::warn!(
                    record_type = %nack.delta.record_type,
                    id = %nack.delta.id,
                    revision = nack.delta.revision.as_u64(),
                    reason = %nack.reason,
                    "remote refused delta"
                );
            }
            report.pushed += pushed;
            report.refused.extend(acks.rejected);
            self.stats.write().deltas_pushed += pushed;
        }

        Ok(report)
    }

    fn check_cancelled(&self) -> SyncResult<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn set_state(&self, state: SyncState) {
        let previous = std::mem::replace(&mut *self.state.write(), state);
        if previous != state {
            tracing::trace!(from = %previous, to = %state, "sync state");
            self.observer.on_state_change(state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use deltasync_core::{
        Fields, LocalMutations, MemoryRecordStore, Record, RecordId, Revision, Value,
    };
    use deltasync_protocol::{Delta, DeltaOperation, PullResponse};
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;

    fn title(t: &str) -> Fields {
        let mut fields = Fields::new();
        fields.insert("title".into(), Value::from(t));
        fields
    }

    fn engine(store: Arc<MemoryRecordStore>) -> SyncEngine<MockTransport> {
        let engine = SyncEngine::new(
            SyncConfig::default().with_push_batch_size(2),
            store,
            MockTransport::new(),
        );
        engine
            .register(RecordSchema::new("Book").allow_unknown_fields())
            .unwrap();
        engine
    }

    fn remote_page(checkpoint: u64, deltas: Vec<Delta>, has_more: bool) -> PullResponse {
        PullResponse::new(
            DeltaPack::with_deltas(Checkpoint::new(checkpoint), deltas),
            has_more,
        )
    }

    fn remote_insert(id: RecordId, revision: u64) -> Delta {
        Delta {
            id,
            record_type: "Book".into(),
            operation: DeltaOperation::Insert,
            revision: Revision::new(revision),
            fields: title("remote"),
            timestamp: 0,
        }
    }

    #[test]
    fn sync_state_checks() {
        assert!(SyncState::Idle.can_start_sync());
        assert!(SyncState::Failed(SyncStage::Push).can_start_sync());
        assert!(!SyncState::Pulling.can_start_sync());
        assert!(SyncState::PushAcking.is_active());
        assert!(!SyncState::Idle.is_active());
        assert_eq!(SyncState::PullApplying.stage(), Some(SyncStage::PullApply));
    }

    #[test]
    fn initial_state() {
        let engine = engine(Arc::new(MemoryRecordStore::new()));
        assert_eq!(engine.state(), SyncState::Idle);
        assert_eq!(engine.stats().cycles_completed, 0);
        assert_eq!(engine.checkpoint().unwrap(), Checkpoint::ZERO);
        assert_eq!(engine.record_types(), vec![RecordType::from("Book")]);
    }

    #[test]
    fn created_record_is_pushed_and_undirtied() {
        let store = Arc::new(MemoryRecordStore::new());
        let engine = engine(store.clone());
        let record = store.create("Book", title("Dune")).unwrap();

        let result = engine.sync().unwrap();
        assert_eq!(result.push.pushed, 1);
        assert!(result.is_complete());
        assert_eq!(engine.state(), SyncState::Idle);

        let stored = store.find(&record.key()).unwrap().unwrap();
        assert!(!stored.dirty);
        assert_eq!(stored.revision, Revision::new(1));
        assert_eq!(engine.stats().cycles_completed, 1);
    }

    #[test]
    fn get_deltas_has_no_side_effects() {
        let store = Arc::new(MemoryRecordStore::new());
        let engine = engine(store.clone());
        let record = store.create("Book", title("Dune")).unwrap();

        let preview = engine.get_deltas().unwrap();
        assert_eq!(preview.len(), 1);
        assert_eq!(preview.origin, Some(engine.config().device_id));
        assert!(store.find(&record.key()).unwrap().unwrap().dirty);
        assert!(engine.transport().sent_packs().is_empty());
        assert_eq!(engine.state(), SyncState::Idle);
    }

    #[derive(Default)]
    struct CountExtracts(AtomicUsize);

    impl SyncObserver for CountExtracts {
        fn before_extract(&self, _record_type: &RecordType) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn preview_skips_extract_hook() {
        let store = Arc::new(MemoryRecordStore::new());
        let observer = Arc::new(CountExtracts::default());
        let engine = engine(store.clone()).with_observer(observer.clone());
        store.create("Book", title("Dune")).unwrap();

        assert_eq!(engine.get_deltas().unwrap().len(), 1);
        assert_eq!(observer.0.load(Ordering::SeqCst), 0);

        engine.push_sync().unwrap();
        assert_eq!(observer.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn paged_pull_advances_checkpoint_per_page() {
        let store = Arc::new(MemoryRecordStore::new());
        let engine = engine(store.clone());
        engine
            .transport()
            .push_pull_response(remote_page(3, vec![remote_insert(RecordId::new(), 1)], true));
        engine
            .transport()
            .push_pull_response(remote_page(5, vec![remote_insert(RecordId::new(), 1)], false));

        let report = engine.pull_sync().unwrap();
        assert_eq!(report.pages, 2);
        assert_eq!(report.pulled, 2);
        assert_eq!(report.checkpoint_after, Checkpoint::new(5));
        assert_eq!(engine.checkpoint().unwrap(), Checkpoint::new(5));
        assert_eq!(
            engine.transport().pull_requests(),
            vec![Checkpoint::ZERO, Checkpoint::new(3)]
        );
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn partial_apply_holds_checkpoint() {
        let store = Arc::new(MemoryRecordStore::new());
        let engine = engine(store.clone());
        let failing = RecordId::new();
        store.fail_commits_for(failing);
        engine.transport().push_pull_response(remote_page(
            9,
            vec![remote_insert(failing, 1), remote_insert(RecordId::new(), 1)],
            true,
        ));

        let report = engine.pull_sync().unwrap();
        assert!(!report.is_complete());
        assert_eq!(report.pages, 1);
        assert_eq!(engine.checkpoint().unwrap(), Checkpoint::ZERO);
        assert_eq!(engine.stats().commit_failures, 1);

        // Same window again once the store recovers
        store.clear_failures();
        engine.transport().push_pull_response(remote_page(
            9,
            vec![remote_insert(failing, 1), remote_insert(RecordId::new(), 1)],
            false,
        ));
        let report = engine.pull_sync().unwrap();
        assert!(report.is_complete());
        assert_eq!(engine.checkpoint().unwrap(), Checkpoint::new(9));
    }

    #[test]
    fn checkpoint_never_moves_backwards() {
        let store = Arc::new(MemoryRecordStore::new());
        let engine = engine(store).with_checkpoint_store(MemoryCheckpointStore::covering(
            Checkpoint::new(10),
            [RecordType::from("Book")],
        ));
        engine
            .transport()
            .push_pull_response(remote_page(4, vec![], false));

        engine.pull_sync().unwrap();
        assert_eq!(engine.transport().pull_requests(), vec![Checkpoint::new(10)]);
        assert_eq!(engine.checkpoint().unwrap(), Checkpoint::new(10));
    }

    #[test]
    fn late_registered_type_pulls_from_zero() {
        let store = Arc::new(MemoryRecordStore::new());
        let engine = engine(store.clone()).with_checkpoint_store(MemoryCheckpointStore::covering(
            Checkpoint::new(10),
            [RecordType::from("Book")],
        ));
        engine
            .register(RecordSchema::new("Author").allow_unknown_fields())
            .unwrap();

        let author = Delta {
            record_type: "Author".into(),
            ..remote_insert(RecordId::new(), 1)
        };
        engine
            .transport()
            .push_pull_response(remote_page(6, vec![author.clone()], false));

        let report = engine.pull_sync().unwrap();
        assert_eq!(report.pulled, 1);
        assert_eq!(report.checkpoint_after, Checkpoint::new(10));
        assert!(store.find(&author.key()).unwrap().is_some());
        assert_eq!(engine.checkpoint().unwrap(), Checkpoint::new(10));

        // Covered now; the next pull resumes from the stored checkpoint.
        engine.pull_sync().unwrap();
        assert_eq!(
            engine.transport().pull_requests(),
            vec![Checkpoint::ZERO, Checkpoint::new(10)]
        );
    }

    #[test]
    fn interrupted_rewind_is_retried() {
        let store = Arc::new(MemoryRecordStore::new());
        let engine = engine(store.clone()).with_checkpoint_store(MemoryCheckpointStore::covering(
            Checkpoint::new(10),
            [RecordType::from("Book")],
        ));
        engine
            .register(RecordSchema::new("Author").allow_unknown_fields())
            .unwrap();
        let failing = RecordId::new();
        store.fail_commits_for(failing);
        engine.transport().push_pull_response(remote_page(
            6,
            vec![Delta {
                record_type: "Author".into(),
                ..remote_insert(failing, 1)
            }],
            false,
        ));

        let report = engine.pull_sync().unwrap();
        assert!(!report.is_complete());

        store.clear_failures();
        engine.pull_sync().unwrap();
        assert_eq!(
            engine.transport().pull_requests(),
            vec![Checkpoint::ZERO, Checkpoint::ZERO]
        );
    }

    #[test]
    fn has_more_without_progress_is_a_protocol_error() {
        let engine = engine(Arc::new(MemoryRecordStore::new()));
        engine
            .transport()
            .push_pull_response(remote_page(0, vec![], true));

        let result = engine.pull_sync();
        assert!(matches!(result, Err(SyncError::Protocol(_))));
        assert_eq!(engine.state(), SyncState::Failed(SyncStage::PullApply));
    }

    #[test]
    fn push_failure_changes_nothing_locally() {
        let store = Arc::new(MemoryRecordStore::new());
        let engine = engine(store.clone());
        let record = store.create("Book", title("Dune")).unwrap();
        engine.transport().fail_next_pushes(1);

        let result = engine.sync();
        assert!(matches!(result, Err(SyncError::Transport { .. })));
        assert_eq!(engine.state(), SyncState::Failed(SyncStage::Push));
        assert!(engine.stats().last_error.is_some());
        assert!(store.find(&record.key()).unwrap().unwrap().dirty);

        engine.sync().unwrap();
        assert!(!store.find(&record.key()).unwrap().unwrap().dirty);
        assert_eq!(engine.state(), SyncState::Idle);
        assert!(engine.stats().last_error.is_none());
    }

    #[test]
    fn push_is_chunked_by_batch_size() {
        let store = Arc::new(MemoryRecordStore::new());
        let engine = engine(store.clone());
        for i in 0..5 {
            store.create("Book", title(&format!("book {i}"))).unwrap();
        }

        let report = engine.push_sync().unwrap();
        assert_eq!(report.extracted, 5);
        assert_eq!(report.pushed, 5);
        let sizes: Vec<_> = engine
            .transport()
            .sent_packs()
            .iter()
            .map(DeltaPack::len)
            .collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert!(engine.get_deltas().unwrap().is_empty());
    }

    #[test]
    fn concurrent_sync_is_rejected() {
        let engine = engine(Arc::new(MemoryRecordStore::new()));
        engine.in_flight.store(true, Ordering::SeqCst);

        assert!(matches!(engine.sync(), Err(SyncError::ConcurrentSyncRejected)));
        assert!(matches!(
            engine.pull_sync(),
            Err(SyncError::ConcurrentSyncRejected)
        ));
        assert_eq!(engine.state(), SyncState::Idle);

        engine.in_flight.store(false, Ordering::SeqCst);
        assert!(engine.sync().is_ok());
    }

    struct CancelAfterPull {
        handle: CancelHandle,
        armed: AtomicBool,
        states: Mutex<Vec<SyncState>>,
    }

    impl SyncObserver for CancelAfterPull {
        fn after_apply(&self, _result: &AppliedResult) {
            if self.armed.swap(false, Ordering::SeqCst) {
                self.handle.cancel();
            }
        }

        fn on_state_change(&self, state: SyncState) {
            self.states.lock().push(state);
        }
    }

    #[test]
    fn cancel_between_pull_and_push_keeps_checkpoint() {
        let store = Arc::new(MemoryRecordStore::new());
        let engine = engine(store.clone());
        let observer = Arc::new(CancelAfterPull {
            handle: engine.cancel_handle(),
            armed: AtomicBool::new(true),
            states: Mutex::new(Vec::new()),
        });
        let engine = engine.with_observer(observer.clone());

        let local = store.create("Book", title("pending")).unwrap();
        engine
            .transport()
            .push_pull_response(remote_page(4, vec![remote_insert(RecordId::new(), 1)], false));

        assert!(matches!(engine.sync(), Err(SyncError::Cancelled)));
        assert_eq!(engine.checkpoint().unwrap(), Checkpoint::new(4));
        assert!(store.find(&local.key()).unwrap().unwrap().dirty);
        assert!(engine.transport().sent_packs().is_empty());
        assert_eq!(engine.state(), SyncState::Idle);
        assert_eq!(
            *observer.states.lock(),
            vec![SyncState::Pulling, SyncState::PullApplying, SyncState::Idle]
        );

        // Next cycle pushes the pending record
        engine.sync().unwrap();
        assert!(!store.find(&local.key()).unwrap().unwrap().dirty);
    }

    #[test]
    fn sync_with_retry_recovers_from_transient_failure() {
        let store = Arc::new(MemoryRecordStore::new());
        let engine = SyncEngine::new(
            SyncConfig::default().with_retry(
                crate::config::RetryConfig::new(3)
                    .with_base_delay(Duration::from_millis(1))
                    .without_jitter(),
            ),
            store.clone(),
            MockTransport::new(),
        );
        engine
            .register(RecordSchema::new("Book").allow_unknown_fields())
            .unwrap();
        let record = store.create("Book", title("Dune")).unwrap();
        engine.transport().fail_next_pushes(2);

        engine.sync_with_retry().unwrap();
        assert_eq!(engine.stats().retries, 2);
        assert!(!store.find(&record.key()).unwrap().unwrap().dirty);
    }

    #[test]
    fn remote_conflict_keeps_local_edit_dirty() {
        let store = Arc::new(MemoryRecordStore::new());
        let engine = engine(store.clone());
        let mut local = Record::from_remote(
            "Book",
            RecordId::new(),
            Revision::new(4),
            title("Dune"),
            false,
            0,
        );
        local.set_field("pages", 412i64);
        store.put(local.clone()).unwrap();

        let mut incoming = remote_insert(local.id, 6);
        incoming.operation = DeltaOperation::Update;
        engine
            .transport()
            .push_pull_response(remote_page(2, vec![incoming], false));

        let report = engine.pull_sync().unwrap();
        assert_eq!(report.applied.conflicts.len(), 1);
        let stored = store.find(&local.key()).unwrap().unwrap();
        assert!(stored.dirty);
        assert!(stored.revision > Revision::new(6));
        assert_eq!(engine.stats().conflicts_resolved, 1);
    }
}
