//! Server configuration.

/// Configuration for the reference sync server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Maximum deltas returned per pull page.
    pub max_pull_batch: u32,
    /// Maximum deltas accepted per push request.
    pub max_push_batch: u32,
    /// Number of recent pack IDs remembered for redelivery detection.
    pub pack_history: usize,
}

impl ServerConfig {
    /// Creates a configuration with default limits.
    pub fn new() -> Self {
        Self {
            max_pull_batch: 100,
            max_push_batch: 100,
            pack_history: 1024,
        }
    }

    /// Sets the maximum pull batch size.
    pub fn with_max_pull_batch(mut self, size: u32) -> Self {
        self.max_pull_batch = size.max(1);
        self
    }

    /// Sets the maximum push batch size.
    pub fn with_max_push_batch(mut self, size: u32) -> Self {
        self.max_push_batch = size.max(1);
        self
    }

    /// Sets how many pack IDs are remembered.
    pub fn with_pack_history(mut self, packs: usize) -> Self {
        self.pack_history = packs;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}
