//! Centralized default constants for the vigil engine.
//!
//! **This module is the single source of truth** for shared default values.
//! Crates reference these constants instead of defining their own magic
//! numbers. Environment variable names live next to the value they override.

// =============================================================================
// STREAM AGGREGATION
// =============================================================================

/// Quiescence window before a debounced recompute fires (milliseconds).
pub const RECOMPUTE_DEBOUNCE_MS: u64 = 300;

/// How long the readiness barrier may stay closed before the aggregator
/// reports a stuck initialization (seconds).
pub const INIT_TIMEOUT_SECS: u64 = 30;

/// Environment variable overriding [`RECOMPUTE_DEBOUNCE_MS`].
pub const ENV_DEBOUNCE_MS: &str = "VIGIL_DEBOUNCE_MS";

/// Environment variable overriding [`INIT_TIMEOUT_SECS`].
pub const ENV_INIT_TIMEOUT_SECS: &str = "VIGIL_INIT_TIMEOUT_SECS";

/// Environment variable enabling one-shot trend baseline queries.
pub const ENV_FETCH_BASELINES: &str = "VIGIL_FETCH_BASELINES";

// =============================================================================
// METRICS
// =============================================================================

/// Default number of entries in a top-N ranking.
pub const TOP_N: usize = 5;

/// Default number of buckets in a day-granularity histogram.
pub const HISTOGRAM_DAYS: u32 = 7;

/// Default number of buckets in a month-granularity histogram.
pub const HISTOGRAM_MONTHS: u32 = 12;

/// Percent change reported when the previous period is zero and the
/// current period is not.
pub const TREND_FROM_ZERO_PCT: i64 = 100;

// =============================================================================
// NOTIFICATIONS
// =============================================================================

/// Maximum number of events kept in a notification feed.
pub const NOTIFICATION_CAPACITY: usize = 50;

/// Environment variable overriding [`NOTIFICATION_CAPACITY`].
pub const ENV_NOTIFICATION_CAPACITY: &str = "VIGIL_NOTIFICATION_CAPACITY";

/// Number of alerted (id, type) keys a notification aggregator remembers
/// across its subscriptions.
pub const ALERT_HISTORY_CAPACITY: usize = 1000;

// =============================================================================
// SCOPE
// =============================================================================

/// Source-level field holding a record's partition (legion) id.
pub const PARTITION_FIELD: &str = "legion";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debounce_shorter_than_init_timeout() {
        assert!(RECOMPUTE_DEBOUNCE_MS < INIT_TIMEOUT_SECS * 1000);
    }

    #[test]
    fn test_notification_capacity_nonzero() {
        assert!(NOTIFICATION_CAPACITY > 0);
        assert!(ALERT_HISTORY_CAPACITY >= NOTIFICATION_CAPACITY);
    }

    #[test]
    fn test_trend_sentinel() {
        assert_eq!(TREND_FROM_ZERO_PCT, 100);
    }
}
