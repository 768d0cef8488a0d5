//! HTTP transport.
//!
//! Request and response bodies are CBOR-encoded [`SyncMessage`]s. The HTTP
//! client itself is abstracted behind [`HttpClient`] so any library (or an
//! in-process loopback) can carry the bytes. Every request carries the
//! transport's timeout; a client that runs past it answers
//! [`HttpError::Timeout`], surfaced as [`SyncError::Timeout`].

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::transport::SyncTransport;
use deltasync_protocol::{
    AckSet, Checkpoint, DeltaPack, PullRequest, PullResponse, PushRequest, SyncMessage,
};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Path of the pull endpoint.
pub const PULL_PATH: &str = "/deltas/pull";
/// Path of the push endpoint.
pub const PUSH_PATH: &str = "/deltas/push";

/// Failure of a single HTTP request.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HttpError {
    /// No response within the request timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The request failed (connection, status, I/O).
    #[error("{0}")]
    Request(String),
}

/// HTTP client abstraction.
pub trait HttpClient: Send + Sync {
    /// Sends a POST request and returns the response body.
    ///
    /// Implementations give up after `timeout` with [`HttpError::Timeout`].
    fn post(&self, url: &str, body: Vec<u8>, timeout: Duration) -> Result<Vec<u8>, HttpError>;

    /// Checks if the client is connected/healthy.
    fn is_healthy(&self) -> bool;
}

/// HTTP-based sync transport.
pub struct HttpTransport<C: HttpClient> {
    endpoint: String,
    timeout: Duration,
    client: C,
    connected: AtomicBool,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a transport for `endpoint` (e.g. `https://sync.example.com`).
    pub fn new(endpoint: impl Into<String>, client: C) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(30),
            client,
            connected: AtomicBool::new(true),
            last_error: RwLock::new(None),
        }
    }

    /// Creates a transport for the endpoint and timeout in `config`.
    pub fn from_config(config: &SyncConfig, client: C) -> Self {
        Self::new(config.endpoint.clone(), client).with_timeout(config.timeout)
    }

    /// Sets the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the per-request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns the endpoint base URL.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Returns the last transport error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// Returns true if the last request succeeded and the client is healthy.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.client.is_healthy()
    }

    /// Marks the transport as connected again after a failure.
    pub fn reconnect(&self) {
        self.connected.store(true, Ordering::SeqCst);
    }

    fn exchange(&self, path: &str, request: SyncMessage) -> SyncResult<SyncMessage> {
        if !self.client.is_healthy() {
            return Err(SyncError::transport_retryable("client unhealthy"));
        }

        let body = request.encode()?;
        let url = format!("{}{}", self.endpoint, path);
        tracing::debug!(%url, bytes = body.len(), "posting sync message");

        let response = self.client.post(&url, body, self.timeout).map_err(|e| {
            *self.last_error.write() = Some(e.to_string());
            self.connected.store(false, Ordering::SeqCst);
            match e {
                HttpError::Timeout(after) => {
                    tracing::warn!(%url, ?after, "sync request timed out");
                    SyncError::Timeout
                }
                HttpError::Request(message) => SyncError::transport_retryable(message),
            }
        })?;

        self.connected.store(true, Ordering::SeqCst);
        *self.last_error.write() = None;

        SyncMessage::decode(&response)
            .map_err(|e| SyncError::transport_fatal(format!("malformed response: {e}")))
    }
}

impl<C: HttpClient> SyncTransport for HttpTransport<C> {
    fn fetch_deltas_since(&self, since: Checkpoint, limit: u32) -> SyncResult<PullResponse> {
        let response = self.exchange(
            PULL_PATH,
            SyncMessage::PullRequest(PullRequest::new(since, limit)),
        )?;
        Ok(response.into_pull_response()?)
    }

    fn send_deltas(&self, pack: &DeltaPack) -> SyncResult<AckSet> {
        let response = self.exchange(
            PUSH_PATH,
            SyncMessage::PushRequest(PushRequest::new(pack.clone())),
        )?;
        Ok(response.into_push_response()?.acks)
    }
}

/// Servers that can answer requests in-process.
pub trait LoopbackServer: Send + Sync {
    /// Handles a POST to `path` and returns the response body.
    fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String>;
}

/// An [`HttpClient`] that routes requests straight to a [`LoopbackServer`].
///
/// The server runs on the caller's thread, so the timeout is checked once
/// the server returns.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
}

impl<S: LoopbackServer> LoopbackClient<S> {
    /// Creates a loopback client for `server`.
    pub fn new(server: S) -> Self {
        Self { server }
    }

    /// Returns the wrapped server.
    pub fn server(&self) -> &S {
        &self.server
    }
}

impl<S: LoopbackServer> HttpClient for LoopbackClient<S> {
    fn post(&self, url: &str, body: Vec<u8>, timeout: Duration) -> Result<Vec<u8>, HttpError> {
        let path = url.find("/deltas/").map(|i| &url[i..]).unwrap_or(url);
        let started = Instant::now();
        let response = self.server.handle_post(path, &body).map_err(HttpError::Request)?;
        if started.elapsed() > timeout {
            return Err(HttpError::Timeout(timeout));
        }
        Ok(response)
    }

    fn is_healthy(&self) -> bool {
        true
    }
}
