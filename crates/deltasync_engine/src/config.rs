//! Configuration for the sync engine.

use rand::Rng;
use std::time::Duration;
use uuid::Uuid;

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Device ID, stamped as the origin of outbound packs.
    pub device_id: Uuid,
    /// Base URL of the sync endpoint (used by the HTTP transport).
    pub endpoint: String,
    /// Maximum deltas requested per pull page.
    pub pull_batch_size: u32,
    /// Maximum deltas sent per push request.
    pub push_batch_size: u32,
    /// Retry configuration for [`crate::SyncEngine::sync_with_retry`].
    pub retry: RetryConfig,
    /// Request timeout.
    pub timeout: Duration,
}

impl SyncConfig {
    /// Creates a new sync configuration.
    pub fn new(device_id: Uuid, endpoint: impl Into<String>) -> Self {
        Self {
            device_id,
            endpoint: endpoint.into(),
            pull_batch_size: 100,
            push_batch_size: 100,
            retry: RetryConfig::default(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Sets the pull batch size.
    pub fn with_pull_batch_size(mut self, size: u32) -> Self {
        self.pull_batch_size = size.max(1);
        self
    }

    /// Sets the push batch size.
    pub fn with_push_batch_size(mut self, size: u32) -> Self {
        self.push_batch_size = size.max(1);
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new(Uuid::new_v4(), "")
    }
}

/// Backoff for [`crate::SyncEngine::sync_with_retry`].
///
/// A cycle never retries on its own. Between attempts the caller sleeps
/// `base_delay * 2^(retry - 1)`, capped at `max_delay`; with jitter the sleep
/// is drawn from the upper half of that window so concurrent devices spread
/// out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Total cycles tried, the first included. Zero behaves as one.
    pub attempts: u32,
    /// Sleep before the first retry.
    pub base_delay: Duration,
    /// Upper bound on any single sleep.
    pub max_delay: Duration,
    /// Randomize each sleep.
    pub jitter: bool,
}

impl RetryConfig {
    /// `attempts` cycles, starting at 100ms and capped at 30s.
    pub fn new(attempts: u32) -> Self {
        Self {
            attempts,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }

    /// A single attempt.
    pub fn no_retry() -> Self {
        Self::new(1)
    }

    /// Sets the sleep before the first retry.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Caps each sleep.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sleeps for exactly the backoff window.
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Sleep before retry number `retry` (1 for the second attempt).
    pub fn backoff(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(retry - 1).unwrap_or(u32::MAX);
        let window = self
            .base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay);

        if self.jitter && !window.is_zero() {
            let half = window / 2;
            half + half.mul_f64(rand::thread_rng().gen_range(0.0..=1.0))
        } else {
            window
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}
