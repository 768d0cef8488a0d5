//! Main sync server.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::log::DeltaLog;
use deltasync_core::RecordKey;
use deltasync_protocol::{
    Checkpoint, Delta, DeltaPack, ErrorMessage, PullRequest, PullResponse, PushRequest,
    PushResponse, SyncMessage,
};
use std::sync::Arc;

/// Path of the pull endpoint.
pub const PULL_PATH: &str = "/deltas/pull";
/// Path of the push endpoint.
pub const PUSH_PATH: &str = "/deltas/push";

/// The reference sync remote.
///
/// Holds a [`DeltaLog`] and answers pull and push requests against it.
/// Transport is up to the caller: feed decoded messages to
/// [`handle_message`](Self::handle_message), or raw request bodies to
/// [`handle_post`](Self::handle_post).
///
/// # Example
///
/// ```
/// use deltasync_protocol::{Checkpoint, PullRequest};
/// use deltasync_server::{ServerConfig, SyncServer};
///
/// let server = SyncServer::new(ServerConfig::default());
/// let response = server.handle_pull(PullRequest::new(Checkpoint::ZERO, 10)).unwrap();
/// assert!(response.pack.is_empty());
/// ```
pub struct SyncServer {
    config: ServerConfig,
    log: Arc<DeltaLog>,
}

impl SyncServer {
    /// Creates a new sync server.
    pub fn new(config: ServerConfig) -> Self {
        let log = Arc::new(DeltaLog::new(config.pack_history));
        Self { config, log }
    }

    /// Creates a sync server over an existing log.
    pub fn with_log(config: ServerConfig, log: Arc<DeltaLog>) -> Self {
        Self { config, log }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Handles a pull request.
    pub fn handle_pull(&self, request: PullRequest) -> ServerResult<PullResponse> {
        if request.limit == 0 {
            return Err(ServerError::InvalidRequest("pull limit must be positive".into()));
        }

        let limit = request.limit.min(self.config.max_pull_batch);
        let page = self.log.deltas_since(request.since, limit);

        tracing::debug!(
            since = %request.since,
            returned = page.deltas.len(),
            has_more = page.has_more,
            "served pull"
        );

        Ok(PullResponse::new(
            DeltaPack::with_deltas(page.checkpoint, page.deltas),
            page.has_more,
        ))
    }

    /// Handles a push request.
    pub fn handle_push(&self, request: PushRequest) -> ServerResult<PushResponse> {
        let size = request.pack.len();
        if size > self.config.max_push_batch as usize {
            return Err(ServerError::BatchTooLarge {
                size,
                max: self.config.max_push_batch,
            });
        }

        let acks = self.log.append(&request.pack);

        tracing::debug!(
            pack = %request.pack.pack_id,
            acknowledged = acks.acknowledged.len(),
            rejected = acks.rejected.len(),
            "handled push"
        );

        Ok(PushResponse::new(acks))
    }

    /// Handles a sync message (dispatches to the matching handler).
    pub fn handle_message(&self, message: SyncMessage) -> ServerResult<SyncMessage> {
        match message {
            SyncMessage::PullRequest(req) => self.handle_pull(req).map(SyncMessage::PullResponse),
            SyncMessage::PushRequest(req) => self.handle_push(req).map(SyncMessage::PushResponse),
            other => Err(ServerError::InvalidRequest(format!(
                "unexpected message type {}",
                other.type_code()
            ))),
        }
    }

    /// Handles an encoded request body and returns the encoded response.
    ///
    /// Failures are answered with an encoded [`SyncMessage::Error`].
    pub fn handle_bytes(&self, body: &[u8]) -> ServerResult<Vec<u8>> {
        let response = SyncMessage::decode(body)
            .map_err(ServerError::from)
            .and_then(|message| self.handle_message(message))
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "request failed");
                SyncMessage::Error(ErrorMessage::new(e.status_code(), e.to_string()))
            });
        Ok(response.encode()?)
    }

    /// Handles an HTTP-style POST to `path`.
    pub fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String> {
        let result = match path {
            PULL_PATH | PUSH_PATH => self.handle_bytes(body),
            other => SyncMessage::Error(ErrorMessage::new(404, format!("no route for {other}")))
                .encode()
                .map_err(ServerError::from),
        };
        result.map_err(|e| e.to_string())
    }

    /// Returns the latest UST.
    pub fn current_ust(&self) -> Checkpoint {
        self.log.latest_ust()
    }

    /// Returns the number of records held.
    pub fn record_count(&self) -> usize {
        self.log.len()
    }

    /// Returns the current delta for a record.
    pub fn record(&self, key: &RecordKey) -> Option<Delta> {
        self.log.get(key)
    }

    /// Returns the underlying log.
    pub fn log(&self) -> &Arc<DeltaLog> {
        &self.log
    }
}

impl Default for SyncServer {
    fn default() -> Self {
        Self::new(ServerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deltasync_core::{now_millis, Fields, RecordId, RecordType, Revision, Value};
    use deltasync_protocol::DeltaOperation;

    fn make_delta(revision: u64) -> Delta {
        let mut fields = Fields::new();
        fields.insert("title".into(), Value::Text("Dune".into()));
        Delta {
            id: RecordId::new(),
            record_type: RecordType::new("Book"),
            operation: DeltaOperation::Insert,
            revision: Revision::new(revision),
            fields,
            timestamp: now_millis(),
        }
    }

    #[test]
    fn server_lifecycle() {
        let server = SyncServer::default();
        assert_eq!(server.current_ust(), Checkpoint::ZERO);
        assert_eq!(server.record_count(), 0);
    }

    #[test]
    fn push_then_pull() {
        let server = SyncServer::default();
        let delta = make_delta(1);
        let pack = DeltaPack::with_deltas(Checkpoint::ZERO, vec![delta.clone()]);

        let push = server.handle_push(PushRequest::new(pack.clone())).unwrap();
        assert_eq!(push.acks.pack_id, pack.pack_id);
        assert!(push.acks.contains(&delta));

        let pull = server.handle_pull(PullRequest::new(Checkpoint::ZERO, 10)).unwrap();
        assert_eq!(pull.pack.len(), 1);
        assert_eq!(pull.pack.source_checkpoint, Checkpoint::new(1));
        assert!(!pull.has_more);
        assert_eq!(server.record(&delta.key()).unwrap().revision, Revision::new(1));
    }

    #[test]
    fn pull_limit_capped_by_config() {
        let server = SyncServer::new(ServerConfig::new().with_max_pull_batch(2));
        let pack = DeltaPack::with_deltas(Checkpoint::ZERO, (0..5).map(|_| make_delta(1)).collect());
        server.handle_push(PushRequest::new(pack)).unwrap();

        let pull = server.handle_pull(PullRequest::new(Checkpoint::ZERO, 100)).unwrap();
        assert_eq!(pull.pack.len(), 2);
        assert!(pull.has_more);
    }

    #[test]
    fn zero_limit_rejected() {
        let server = SyncServer::default();
        let result = server.handle_pull(PullRequest::new(Checkpoint::ZERO, 0));
        assert!(matches!(result, Err(ServerError::InvalidRequest(_))));
    }

    #[test]
    fn push_over_limit_rejected() {
        let server = SyncServer::new(ServerConfig::new().with_max_push_batch(1));
        let pack = DeltaPack::with_deltas(Checkpoint::ZERO, vec![make_delta(1), make_delta(1)]);
        let result = server.handle_push(PushRequest::new(pack));
        assert!(matches!(result, Err(ServerError::BatchTooLarge { size: 2, max: 1 })));
        assert_eq!(server.record_count(), 0);
    }

    #[test]
    fn handle_message_dispatch() {
        let server = SyncServer::default();

        let response = server
            .handle_message(SyncMessage::PullRequest(PullRequest::new(Checkpoint::ZERO, 5)))
            .unwrap();
        assert!(matches!(response, SyncMessage::PullResponse(_)));

        let result = server.handle_message(SyncMessage::Error(ErrorMessage::new(1, "x")));
        assert!(matches!(result, Err(ServerError::InvalidRequest(_))));
    }

    #[test]
    fn post_round_trip() {
        let server = SyncServer::default();
        let pack = DeltaPack::with_deltas(Checkpoint::ZERO, vec![make_delta(1)]);
        let body = SyncMessage::PushRequest(PushRequest::new(pack)).encode().unwrap();

        let response = server.handle_post(PUSH_PATH, &body).unwrap();
        let acks = SyncMessage::decode(&response).unwrap().into_push_response().unwrap().acks;
        assert_eq!(acks.acknowledged.len(), 1);
    }

    #[test]
    fn garbage_body_answers_error_message() {
        let server = SyncServer::default();
        let response = server.handle_post(PULL_PATH, &[0xff, 0x01]).unwrap();

        match SyncMessage::decode(&response).unwrap() {
            SyncMessage::Error(err) => assert_eq!(err.code, 400),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[test]
    fn unknown_path() {
        let server = SyncServer::default();
        let response = server.handle_post("/nope", &[]).unwrap();
        match SyncMessage::decode(&response).unwrap() {
            SyncMessage::Error(err) => assert_eq!(err.code, 404),
            other => panic!("expected error, got {other:?}"),
        }
    }
}
