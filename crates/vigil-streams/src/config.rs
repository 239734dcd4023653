//! Environment-driven configuration for aggregators and notification feeds.

use std::time::Duration;

use vigil_core::defaults::{
    ENV_DEBOUNCE_MS, ENV_FETCH_BASELINES, ENV_INIT_TIMEOUT_SECS, ENV_NOTIFICATION_CAPACITY,
    INIT_TIMEOUT_SECS, NOTIFICATION_CAPACITY, RECOMPUTE_DEBOUNCE_MS,
};

/// Configuration for a [`StreamAggregator`](crate::StreamAggregator).
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Quiescence window before a recompute fires, in milliseconds.
    pub debounce_ms: u64,
    /// How long the readiness barrier may stay closed before a stuck
    /// initialization is reported, in seconds.
    pub init_timeout_secs: u64,
    /// Fetch previous-period trend baselines with one-shot queries at
    /// subscribe time instead of deriving them from live records.
    pub fetch_baselines: bool,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            debounce_ms: RECOMPUTE_DEBOUNCE_MS,
            init_timeout_secs: INIT_TIMEOUT_SECS,
            fetch_baselines: false,
        }
    }
}

impl AggregatorConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `VIGIL_DEBOUNCE_MS` | `300` | Recompute quiescence window |
    /// | `VIGIL_INIT_TIMEOUT_SECS` | `30` | Stuck-initialization timeout |
    /// | `VIGIL_FETCH_BASELINES` | `false` | Query trend baselines at subscribe |
    pub fn from_env() -> Self {
        let debounce_ms = std::env::var(ENV_DEBOUNCE_MS)
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(RECOMPUTE_DEBOUNCE_MS);

        let init_timeout_secs = std::env::var(ENV_INIT_TIMEOUT_SECS)
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(INIT_TIMEOUT_SECS)
            .max(1);

        let fetch_baselines = std::env::var(ENV_FETCH_BASELINES)
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        Self {
            debounce_ms,
            init_timeout_secs,
            fetch_baselines,
        }
    }

    /// Set the debounce window.
    pub fn with_debounce_ms(mut self, ms: u64) -> Self {
        self.debounce_ms = ms;
        self
    }

    /// Set the stuck-initialization timeout.
    pub fn with_init_timeout_secs(mut self, secs: u64) -> Self {
        self.init_timeout_secs = secs;
        self
    }

    /// Enable or disable baseline queries.
    pub fn with_fetch_baselines(mut self, enabled: bool) -> Self {
        self.fetch_baselines = enabled;
        self
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn init_timeout(&self) -> Duration {
        Duration::from_secs(self.init_timeout_secs)
    }
}

/// Configuration for a [`NotificationAggregator`](crate::NotificationAggregator).
#[derive(Debug, Clone)]
pub struct NotificationConfig {
    /// Maximum number of events kept in the feed.
    pub capacity: usize,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            capacity: NOTIFICATION_CAPACITY,
        }
    }
}

impl NotificationConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `VIGIL_NOTIFICATION_CAPACITY` | `50` | Feed capacity |
    pub fn from_env() -> Self {
        let capacity = std::env::var(ENV_NOTIFICATION_CAPACITY)
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(NOTIFICATION_CAPACITY)
            .max(1);
        Self { capacity }
    }

    /// Set the feed capacity. Zero is raised to one.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }
}
