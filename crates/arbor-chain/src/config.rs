//! Chain store configuration.

use std::time::Duration;

/// Tuning knobs for the debouncing barrier.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    /// Block arrivals that force an immediate organize+validate run.
    pub clearance_level: u64,
    /// Quiet period after which a pending burst is processed anyway.
    pub barrier_timeout: Duration,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            clearance_level: 400,
            barrier_timeout: Duration::from_millis(500),
        }
    }
}
