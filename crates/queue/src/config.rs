//! Queue configuration.

use std::time::Duration;

/// Configuration for the activity queue.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Activities fetched per store round-trip by the catch-up loader
    pub loader_page_size: usize,
    /// Delay before a stalled waiting set re-requests a catch-up load
    pub gap_retry_interval: Duration,
    /// How long `shutdown` waits for the controller before aborting it
    pub shutdown_grace: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            loader_page_size: 200,
            gap_retry_interval: Duration::from_millis(100),
            shutdown_grace: Duration::from_millis(100),
        }
    }
}

impl QueueConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the loader page size. Zero is treated as one.
    pub fn with_loader_page_size(mut self, page_size: usize) -> Self {
        self.loader_page_size = page_size.max(1);
        self
    }

    /// Set the gap retry interval.
    pub fn with_gap_retry_interval(mut self, interval: Duration) -> Self {
        self.gap_retry_interval = interval;
        self
    }

    /// Set the shutdown grace period.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }
}
