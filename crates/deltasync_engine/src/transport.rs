//! Transport layer abstraction for sync operations.

use crate::error::{SyncError, SyncResult};
use deltasync_protocol::{AckSet, Checkpoint, DeltaPack, PullResponse};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

/// Request/response channel to the sync endpoint.
///
/// Each call is reliable and ordered, but the engine does not assume
/// exactly-once delivery: a push whose ack was lost is simply sent again.
pub trait SyncTransport: Send + Sync {
    /// Fetches remote deltas newer than `since`, at most `limit` of them.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Transport`] if the endpoint is unreachable or
    /// the response is malformed.
    fn fetch_deltas_since(&self, since: Checkpoint, limit: u32) -> SyncResult<PullResponse>;

    /// Sends an outbound pack and returns the per-delta acknowledgment.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Transport`] if the pack could not be delivered or
    /// no acknowledgment arrived.
    fn send_deltas(&self, pack: &DeltaPack) -> SyncResult<AckSet>;
}

impl<T: SyncTransport + ?Sized> SyncTransport for std::sync::Arc<T> {
    fn fetch_deltas_since(&self, since: Checkpoint, limit: u32) -> SyncResult<PullResponse> {
        (**self).fetch_deltas_since(since, limit)
    }

    fn send_deltas(&self, pack: &DeltaPack) -> SyncResult<AckSet> {
        (**self).send_deltas(pack)
    }
}

/// A scripted transport for testing.
///
/// Pull responses are served from a queue (an empty page once it runs out).
/// Pushes are acknowledged in full unless a failure is scheduled.
#[derive(Debug, Default)]
pub struct MockTransport {
    connected: AtomicBool,
    pull_responses: Mutex<VecDeque<PullResponse>>,
    pull_requests: Mutex<Vec<Checkpoint>>,
    sent: Mutex<Vec<DeltaPack>>,
    fail_pushes: Mutex<u32>,
    drop_acks: Mutex<u32>,
}

impl MockTransport {
    /// Creates a connected mock transport.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            ..Self::default()
        }
    }

    /// Queues a pull response.
    pub fn push_pull_response(&self, response: PullResponse) {
        self.pull_responses.lock().push_back(response);
    }

    /// Makes the next `count` pushes fail before reaching the remote.
    pub fn fail_next_pushes(&self, count: u32) {
        *self.fail_pushes.lock() = count;
    }

    /// Makes the next `count` pushes reach the remote but lose their ack.
    pub fn drop_next_acks(&self, count: u32) {
        *self.drop_acks.lock() = count;
    }

    /// Sets the connected state.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Returns true if connected.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Packs that reached the remote, in order.
    pub fn sent_packs(&self) -> Vec<DeltaPack> {
        self.sent.lock().clone()
    }

    /// Checkpoints the client pulled from, in order.
    pub fn pull_requests(&self) -> Vec<Checkpoint> {
        self.pull_requests.lock().clone()
    }

    fn ensure_connected(&self) -> SyncResult<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(SyncError::transport_retryable("not connected"))
        }
    }

    fn take_one(counter: &Mutex<u32>) -> bool {
        let mut remaining = counter.lock();
        if *remaining > 0 {
            *remaining -= 1;
            true
        } else {
            false
        }
    }
}

impl SyncTransport for MockTransport {
    fn fetch_deltas_since(&self, since: Checkpoint, _limit: u32) -> SyncResult<PullResponse> {
        self.ensure_connected()?;
        self.pull_requests.lock().push(since);
        Ok(self
            .pull_responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| PullResponse::new(DeltaPack::new(since), false)))
    }

    fn send_deltas(&self, pack: &DeltaPack) -> SyncResult<AckSet> {
        self.ensure_connected()?;
        if Self::take_one(&self.fail_pushes) {
            return Err(SyncError::transport_retryable("push failed"));
        }
        self.sent.lock().push(pack.clone());
        if Self::take_one(&self.drop_acks) {
            return Err(SyncError::transport_retryable("ack lost"));
        }
        Ok(AckSet::all(pack))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_transport_not_connected_error() {
        let transport = MockTransport::new();
        transport.set_connected(false);

        let result = transport.fetch_deltas_since(Checkpoint::ZERO, 10);
        assert!(matches!(result, Err(SyncError::Transport { retryable: true, .. })));
    }

    #[test]
    fn mock_transport_serves_queued_pages() {
        let transport = MockTransport::new();
        transport.push_pull_response(PullResponse::new(DeltaPack::new(Checkpoint::new(5)), true));

        let first = transport.fetch_deltas_since(Checkpoint::ZERO, 10).unwrap();
        assert!(first.has_more);
        let second = transport.fetch_deltas_since(Checkpoint::new(5), 10).unwrap();
        assert!(!second.has_more);
        assert_eq!(second.pack.source_checkpoint, Checkpoint::new(5));
        assert_eq!(
            transport.pull_requests(),
            vec![Checkpoint::ZERO, Checkpoint::new(5)]
        );
    }

    #[test]
    fn mock_transport_failures() {
        let transport = MockTransport::new();
        let pack = DeltaPack::new(Checkpoint::ZERO);

        transport.fail_next_pushes(1);
        assert!(transport.send_deltas(&pack).is_err());
        assert!(transport.sent_packs().is_empty());

        transport.drop_next_acks(1);
        assert!(transport.send_deltas(&pack).is_err());
        assert_eq!(transport.sent_packs().len(), 1);

        let acks = transport.send_deltas(&pack).unwrap();
        assert_eq!(acks.pack_id, pack.pack_id);
    }
}
