//! Period-over-period trend deltas.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use vigil_core::defaults::TREND_FROM_ZERO_PCT;
use vigil_core::temporal::sliding_windows;
use vigil_core::{Constraint, DataSource, FieldPath, Predicate, Record, Result, StreamDescriptor};

/// Percent change from `previous` to `current`.
///
/// - `previous > 0`: `round((current - previous) / previous * 100)`, halves
///   rounding toward positive infinity.
/// - `previous == 0` (or negative) and `current > 0`: `100`. This is a fixed
///   dashboard rule, not a ratio.
/// - otherwise `0`.
pub fn percent_change(previous: f64, current: f64) -> i64 {
    if previous > 0.0 {
        let ratio = (current - previous) / previous * 100.0;
        (ratio + 0.5).floor() as i64
    } else if current > 0.0 {
        TREND_FROM_ZERO_PCT
    } else {
        0
    }
}

/// Which timestamp to window on, and how wide each window is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrendSpec {
    pub field: FieldPath,
    /// Window length in seconds.
    pub window_secs: i64,
}

impl TrendSpec {
    pub fn new(field: &str, window: Duration) -> Self {
        Self {
            field: field.into(),
            window_secs: window.num_seconds(),
        }
    }

    pub fn window(&self) -> Duration {
        Duration::seconds(self.window_secs)
    }
}

/// Current vs previous window counts for one metric.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrendSample {
    pub current: f64,
    pub previous: f64,
}

impl TrendSample {
    pub fn percent(&self) -> i64 {
        percent_change(self.previous, self.current)
    }
}

/// Computes trend samples from materialized records or from a one-shot
/// baseline query.
pub struct TrendCalculator;

impl TrendCalculator {
    /// Count records in the current and previous windows ending at `now`.
    /// Records without a usable timestamp fall in neither window.
    pub fn sample(
        records: &[Record],
        spec: &TrendSpec,
        filter: &Predicate,
        now: &DateTime<Utc>,
    ) -> TrendSample {
        let ((cur_start, cur_end), (prev_start, prev_end)) = sliding_windows(now, spec.window());
        let mut sample = TrendSample {
            current: 0.0,
            previous: 0.0,
        };
        for record in records.iter().filter(|r| filter.matches(r)) {
            let Some(ts) = record.timestamp(&spec.field) else {
                continue;
            };
            if ts >= cur_start && ts < cur_end {
                sample.current += 1.0;
            } else if ts >= prev_start && ts < prev_end {
                sample.previous += 1.0;
            }
        }
        sample
    }

    /// Fetch the previous-window count for a stream with a one-shot query.
    ///
    /// The stream's own filter constraints are kept and the previous window is
    /// added as a range on `spec.field`. The stream residual and `filter` are
    /// applied to the result.
    pub async fn fetch_baseline(
        source: &dyn DataSource,
        descriptor: &StreamDescriptor,
        spec: &TrendSpec,
        filter: &Predicate,
        now: &DateTime<Utc>,
    ) -> Result<f64> {
        let (_, (prev_start, prev_end)) = sliding_windows(now, spec.window());
        let field = spec.field.to_string();
        let mut constraints: Vec<Constraint> = descriptor
            .constraints
            .iter()
            .filter(|c| c.is_filter())
            .cloned()
            .collect();
        constraints.push(Constraint::gte(&field, prev_start.to_rfc3339()));
        constraints.push(Constraint::lt(&field, prev_end.to_rfc3339()));

        let records = source.query(&descriptor.collection, &constraints).await?;
        let baseline = records
            .iter()
            .filter(|r| descriptor.residual.matches(r) && filter.matches(r))
            .count() as f64;
        debug!(
            component = "trend",
            stream = %descriptor.name,
            collection = %descriptor.collection,
            baseline,
            "Trend baseline fetched"
        );
        Ok(baseline)
    }
}
