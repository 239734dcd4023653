//! Calendar bucketing for histograms and "current period" metrics.
//!
//! All arithmetic is in UTC. A bucket is the half-open interval
//! `[start, end)` of one calendar day or month.

use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// Histogram bucket width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Day,
    Month,
}

/// One calendar bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Period {
    pub key: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Period {
    pub fn contains(&self, ts: &DateTime<Utc>) -> bool {
        *ts >= self.start && *ts < self.end
    }
}

impl Granularity {
    /// Bucket key of a timestamp: `YYYY-MM-DD` or `YYYY-MM`.
    pub fn bucket_key(&self, ts: &DateTime<Utc>) -> String {
        match self {
            Self::Day => ts.format("%Y-%m-%d").to_string(),
            Self::Month => ts.format("%Y-%m").to_string(),
        }
    }

    /// Bucket containing `ts`.
    pub fn period_of(&self, ts: &DateTime<Utc>) -> Period {
        let start = self.truncate(ts);
        let end = self.advance(start, 1);
        Period {
            key: self.bucket_key(&start),
            start,
            end,
        }
    }

    /// The `count` buckets ending with the one containing `now`, oldest first.
    pub fn trailing_periods(&self, now: &DateTime<Utc>, count: u32) -> Vec<Period> {
        let current = self.truncate(now);
        (0..count)
            .rev()
            .map(|back| {
                let start = self.retreat(current, back);
                let end = self.advance(start, 1);
                Period {
                    key: self.bucket_key(&start),
                    start,
                    end,
                }
            })
            .collect()
    }

    fn truncate(&self, ts: &DateTime<Utc>) -> DateTime<Utc> {
        let date = ts.date_naive();
        let date = match self {
            Self::Day => date,
            Self::Month => NaiveDate::from_ymd_opt(date.year(), date.month(), 1).unwrap_or(date),
        };
        date.and_time(NaiveTime::MIN).and_utc()
    }

    fn advance(&self, start: DateTime<Utc>, n: u32) -> DateTime<Utc> {
        match self {
            Self::Day => start + Duration::days(i64::from(n)),
            Self::Month => start
                .checked_add_months(Months::new(n))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    fn retreat(&self, start: DateTime<Utc>, n: u32) -> DateTime<Utc> {
        match self {
            Self::Day => start - Duration::days(i64::from(n)),
            Self::Month => start
                .checked_sub_months(Months::new(n))
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
        }
    }
}

/// Current and previous sliding windows of equal length ending at `now`:
/// `([now - w, now), [now - 2w, now - w))`.
pub fn sliding_windows(
    now: &DateTime<Utc>,
    window: Duration,
) -> ((DateTime<Utc>, DateTime<Utc>), (DateTime<Utc>, DateTime<Utc>)) {
    let current_start = *now - window;
    let previous_start = current_start - window;
    ((current_start, *now), (previous_start, current_start))
}
