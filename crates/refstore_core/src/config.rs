//! Store configuration.

use std::time::Duration;

/// Configuration for a [`crate::Store`] and the transactions it begins.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Whether commits run the integrity fixpoint before writing.
    pub ensure_integrity_on_commit: bool,

    /// Maximum integrity passes before a commit is aborted as non-converging.
    pub max_integrity_passes: usize,

    /// Whether new transactions write every change through immediately.
    pub auto_commit: bool,

    /// Number of change sets kept for polling.
    pub change_feed_history: usize,

    /// Queries slower than this are logged at debug level.
    pub slow_query_debug: Duration,

    /// Queries slower than this are logged at warn level.
    pub slow_query_warn: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            ensure_integrity_on_commit: true,
            max_integrity_passes: 64,
            auto_commit: false,
            change_feed_history: 10_000,
            slow_query_debug: Duration::from_millis(100),
            slow_query_warn: Duration::from_secs(1),
        }
    }
}

impl StoreConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether commits run the integrity fixpoint.
    #[must_use]
    pub const fn ensure_integrity_on_commit(mut self, value: bool) -> Self {
        self.ensure_integrity_on_commit = value;
        self
    }

    /// Sets the integrity pass ceiling. Values below one are raised to one.
    #[must_use]
    pub const fn max_integrity_passes(mut self, passes: usize) -> Self {
        self.max_integrity_passes = if passes == 0 { 1 } else { passes };
        self
    }

    /// Sets whether new transactions auto-commit.
    #[must_use]
    pub const fn auto_commit(mut self, value: bool) -> Self {
        self.auto_commit = value;
        self
    }

    /// Sets the change feed history size.
    #[must_use]
    pub const fn change_feed_history(mut self, size: usize) -> Self {
        self.change_feed_history = size;
        self
    }

    /// Sets the slow query thresholds.
    #[must_use]
    pub const fn slow_query_thresholds(mut self, debug: Duration, warn: Duration) -> Self {
        self.slow_query_debug = debug;
        self.slow_query_warn = warn;
        self
    }
}
