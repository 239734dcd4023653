//! Declarative metrics over an [`AggregateState`].
//!
//! A [`MetricsEngine`] holds a list of [`MetricDef`]s and evaluates all of
//! them against the aggregate in one pass. Evaluation is a pure function of
//! the state and the supplied `now`: nothing is accumulated between cycles,
//! so a partial update can never leave a metric drifting.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::trace;

use vigil_core::defaults::TOP_N;
use vigil_core::{
    AggregateState, Bucket, Error, FieldPath, Granularity, Metric, MetricSet, MetricValue,
    Predicate, RankEntry, Record, Result,
};

use crate::trend::{TrendCalculator, TrendSpec};

/// What a metric measures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetricKind {
    /// Number of matching records, optionally with a period trend.
    Count {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        trend: Option<TrendSpec>,
    },
    /// Matching records whose timestamp falls in the current day or month.
    CountWithin {
        field: FieldPath,
        granularity: Granularity,
    },
    /// Sum of a numeric field. Non-numeric values are skipped.
    Sum { field: FieldPath },
    /// Counts per calendar bucket over the trailing `periods` buckets.
    Histogram {
        field: FieldPath,
        granularity: Granularity,
        periods: u32,
    },
    /// Most frequent values of a field.
    TopN {
        field: FieldPath,
        #[serde(default = "default_top_n")]
        n: usize,
    },
}

fn default_top_n() -> usize {
    TOP_N
}

/// One named metric over one stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDef {
    pub name: String,
    pub stream: String,
    /// Sub-population the metric looks at.
    #[serde(default, skip_serializing_if = "Predicate::is_always")]
    pub filter: Predicate,
    #[serde(flatten)]
    pub kind: MetricKind,
}

impl MetricDef {
    fn new(name: &str, stream: &str, kind: MetricKind) -> Self {
        Self {
            name: name.to_string(),
            stream: stream.to_string(),
            filter: Predicate::Always,
            kind,
        }
    }

    pub fn count(name: &str, stream: &str) -> Self {
        Self::new(name, stream, MetricKind::Count { trend: None })
    }

    pub fn count_with_trend(name: &str, stream: &str, trend: TrendSpec) -> Self {
        Self::new(name, stream, MetricKind::Count { trend: Some(trend) })
    }

    pub fn count_within(name: &str, stream: &str, field: &str, granularity: Granularity) -> Self {
        Self::new(
            name,
            stream,
            MetricKind::CountWithin {
                field: field.into(),
                granularity,
            },
        )
    }

    pub fn sum(name: &str, stream: &str, field: &str) -> Self {
        Self::new(name, stream, MetricKind::Sum { field: field.into() })
    }

    pub fn histogram(
        name: &str,
        stream: &str,
        field: &str,
        granularity: Granularity,
        periods: u32,
    ) -> Self {
        Self::new(
            name,
            stream,
            MetricKind::Histogram {
                field: field.into(),
                granularity,
                periods,
            },
        )
    }

    pub fn top_n(name: &str, stream: &str, field: &str, n: usize) -> Self {
        Self::new(name, stream, MetricKind::TopN { field: field.into(), n })
    }

    /// Restrict the metric to records matching `filter`.
    pub fn filtered(mut self, filter: Predicate) -> Self {
        self.filter = self.filter.and(filter);
        self
    }

    /// Trend spec, for count metrics that carry one.
    pub fn trend(&self) -> Option<&TrendSpec> {
        match &self.kind {
            MetricKind::Count { trend } => trend.as_ref(),
            _ => None,
        }
    }
}

/// Anything that can turn an aggregate into metrics.
///
/// Implemented by [`MetricsEngine`] and by plain closures, so callers can
/// plug in bespoke computations.
pub trait MetricsCompute: Send + Sync {
    fn compute(&self, state: &AggregateState, now: DateTime<Utc>) -> Result<MetricSet>;
}

impl<F> MetricsCompute for F
where
    F: Fn(&AggregateState, DateTime<Utc>) -> Result<MetricSet> + Send + Sync,
{
    fn compute(&self, state: &AggregateState, now: DateTime<Utc>) -> Result<MetricSet> {
        self(state, now)
    }
}

/// Evaluates a fixed list of metric definitions.
#[derive(Debug, Clone, Default)]
pub struct MetricsEngine {
    defs: Vec<MetricDef>,
}

impl MetricsEngine {
    pub fn new(defs: Vec<MetricDef>) -> Self {
        Self { defs }
    }

    pub fn with_metric(mut self, def: MetricDef) -> Self {
        self.defs.push(def);
        self
    }

    pub fn defs(&self) -> &[MetricDef] {
        &self.defs
    }

    fn evaluate(&self, def: &MetricDef, state: &AggregateState, now: &DateTime<Utc>) -> Result<Metric> {
        let records = state.records(&def.stream).ok_or_else(|| {
            Error::Compute(format!(
                "metric '{}' references unknown stream '{}'",
                def.name, def.stream
            ))
        })?;
        let selected = records.iter().filter(|r| def.filter.matches(r));

        let metric = match &def.kind {
            MetricKind::Count { trend } => {
                let total = selected.count() as u64;
                let metric = Metric::new(&def.name, MetricValue::Count(total));
                match trend {
                    Some(spec) => {
                        let mut sample = TrendCalculator::sample(records, spec, &def.filter, now);
                        if let Some(baseline) = state.baseline(&def.name) {
                            sample.previous = baseline;
                        }
                        metric.with_trend(sample.percent(), sample.current, sample.previous)
                    }
                    None => metric,
                }
            }
            MetricKind::CountWithin { field, granularity } => {
                let period = granularity.period_of(now);
                let n = selected
                    .filter_map(|r| r.timestamp(field))
                    .filter(|ts| period.contains(ts))
                    .count() as u64;
                Metric::new(&def.name, MetricValue::Count(n))
            }
            MetricKind::Sum { field } => {
                let total: f64 = selected.filter_map(|r| r.number_field(field)).sum();
                Metric::new(&def.name, MetricValue::Sum(total))
            }
            MetricKind::Histogram {
                field,
                granularity,
                periods,
            } => Metric::new(
                &def.name,
                MetricValue::Histogram(histogram(selected, field, *granularity, *periods, now)),
            ),
            MetricKind::TopN { field, n } => {
                Metric::new(&def.name, MetricValue::Ranking(top_n(selected, field, *n)))
            }
        };
        trace!(component = "metrics", metric = %def.name, value = ?metric.value, "Metric evaluated");
        Ok(metric)
    }
}

impl MetricsCompute for MetricsEngine {
    fn compute(&self, state: &AggregateState, now: DateTime<Utc>) -> Result<MetricSet> {
        self.defs
            .iter()
            .map(|def| self.evaluate(def, state, &now))
            .collect::<Result<Vec<_>>>()
            .map(MetricSet::new)
    }
}

/// Zero-filled histogram over the trailing `periods` buckets, oldest first.
/// Records with a missing or unparseable timestamp, or outside the window,
/// are left out.
pub fn histogram<'a, I>(
    records: I,
    field: &FieldPath,
    granularity: Granularity,
    periods: u32,
    now: &DateTime<Utc>,
) -> Vec<Bucket>
where
    I: IntoIterator<Item = &'a Record>,
{
    let window = granularity.trailing_periods(now, periods);
    let mut counts: HashMap<String, u64> = window.iter().map(|p| (p.key.clone(), 0)).collect();
    if let (Some(first), Some(last)) = (window.first(), window.last()) {
        for ts in records.into_iter().filter_map(|r| r.timestamp(field)) {
            if ts >= first.start && ts < last.end {
                if let Some(count) = counts.get_mut(&granularity.bucket_key(&ts)) {
                    *count += 1;
                }
            }
        }
    }
    window
        .into_iter()
        .map(|p| Bucket {
            count: counts.get(&p.key).copied().unwrap_or(0),
            key: p.key,
        })
        .collect()
}

/// Top `n` values of a field by frequency. Ties keep first-seen order.
/// Records missing the field are skipped; non-string values use their JSON
/// text as key.
pub fn top_n<'a, I>(records: I, field: &FieldPath, n: usize) -> Vec<RankEntry>
where
    I: IntoIterator<Item = &'a Record>,
{
    let mut entries: Vec<RankEntry> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for record in records {
        let key = match record.get(field) {
            None | Some(serde_json::Value::Null) => continue,
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        };
        match index.get(&key) {
            Some(&i) => entries[i].count += 1,
            None => {
                index.insert(key.clone(), entries.len());
                entries.push(RankEntry { key, count: 1 });
            }
        }
    }
    // Stable sort keeps first-seen order among equal counts.
    entries.sort_by(|a, b| b.count.cmp(&a.count));
    entries.truncate(n);
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use serde_json::json;
    use vigil_core::{Emission, Predicate};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 15, 12, 0, 0).unwrap()
    }

    fn rec(value: serde_json::Value) -> Record {
        Record::from_json(value).unwrap()
    }

    fn state_with(stream: &str, records: Vec<Record>) -> AggregateState {
        let mut state = AggregateState::new([stream]).unwrap();
        state
            .apply(stream, Emission::Snapshot(records), &Predicate::Always)
            .unwrap();
        state
    }

    #[test]
    fn test_count_and_filtered_count() {
        let state = state_with(
            "vehicles",
            vec![
                rec(json!({"id": "1", "status": "stolen"})),
                rec(json!({"id": "2", "status": "recovered"})),
                rec(json!({"id": "3", "status": "recovered"})),
            ],
        );
        let engine = MetricsEngine::new(vec![
            MetricDef::count("total", "vehicles"),
            MetricDef::count("recovered", "vehicles")
                .filtered(Predicate::equals("status", "recovered")),
        ]);
        let metrics = engine.compute(&state, now()).unwrap();
        assert_eq!(metrics.count("total"), Some(3));
        assert_eq!(metrics.count("recovered"), Some(2));
        assert!(metrics.get("total").unwrap().trend_pct.is_none());
    }

    #[test]
    fn test_unknown_stream_is_compute_error() {
        let state = state_with("vehicles", vec![]);
        let engine = MetricsEngine::new(vec![MetricDef::count("x", "nope")]);
        let err = engine.compute(&state, now()).unwrap_err();
        assert!(matches!(err, Error::Compute(_)));
    }

    #[test]
    fn test_count_within_today_ignores_bad_timestamps() {
        let today = now() - Duration::hours(2);
        let yesterday = now() - Duration::days(1);
        let state = state_with(
            "checks",
            vec![
                rec(json!({"id": "1", "createdAt": today.to_rfc3339()})),
                rec(json!({"id": "2", "createdAt": yesterday.to_rfc3339()})),
                rec(json!({"id": "3", "createdAt": "not a date"})),
                rec(json!({"id": "4"})),
            ],
        );
        let engine = MetricsEngine::new(vec![
            MetricDef::count("total", "checks"),
            MetricDef::count_within("today", "checks", "createdAt", Granularity::Day),
        ]);
        let metrics = engine.compute(&state, now()).unwrap();
        assert_eq!(metrics.count("total"), Some(4));
        assert_eq!(metrics.count("today"), Some(1));
    }

    #[test]
    fn test_sum_skips_non_numeric() {
        let state = state_with(
            "rewards",
            vec![
                rec(json!({"id": "1", "amount": 100})),
                rec(json!({"id": "2", "amount": "250.5"})),
                rec(json!({"id": "3", "amount": "n/a"})),
                rec(json!({"id": "4"})),
            ],
        );
        let engine = MetricsEngine::new(vec![MetricDef::sum("paid", "rewards", "amount")]);
        let metrics = engine.compute(&state, now()).unwrap();
        assert_eq!(metrics.get("paid").and_then(Metric::as_sum), Some(350.5));
    }

    #[test]
    fn test_histogram_daily_zero_filled() {
        let records = vec![
            rec(json!({"id": "1", "createdAt": "2026-03-15T01:00:00Z"})),
            rec(json!({"id": "2", "createdAt": "2026-03-15T23:00:00Z"})),
            rec(json!({"id": "3", "createdAt": "2026-03-13T10:00:00Z"})),
            rec(json!({"id": "4", "createdAt": "2026-03-01T10:00:00Z"})),
            rec(json!({"id": "5", "createdAt": "garbage"})),
            rec(json!({"id": "6"})),
        ];
        let buckets = histogram(&records, &"createdAt".into(), Granularity::Day, 3, &now());
        assert_eq!(
            buckets,
            vec![
                Bucket { key: "2026-03-13".into(), count: 1 },
                Bucket { key: "2026-03-14".into(), count: 0 },
                Bucket { key: "2026-03-15".into(), count: 2 },
            ]
        );
    }

    #[test]
    fn test_histogram_monthly() {
        let records = vec![
            rec(json!({"id": "1", "createdAt": "2026-01-20"})),
            rec(json!({"id": "2", "createdAt": "2026-03-02"})),
            rec(json!({"id": "3", "createdAt": "2025-12-31T23:59:59Z"})),
        ];
        let buckets = histogram(&records, &"createdAt".into(), Granularity::Month, 3, &now());
        let counts: Vec<u64> = buckets.iter().map(|b| b.count).collect();
        assert_eq!(counts, vec![1, 0, 1]);
        assert_eq!(buckets[0].key, "2026-01");
    }

    #[test]
    fn test_top_n_first_seen_tie_break() {
        let records = vec![
            rec(json!({"id": "1", "make": "Honda"})),
            rec(json!({"id": "2", "make": "Toyota"})),
            rec(json!({"id": "3", "make": "Toyota"})),
            rec(json!({"id": "4", "make": "Ford"})),
            rec(json!({"id": "5", "make": "Honda"})),
            rec(json!({"id": "6", "make": "Kia"})),
            rec(json!({"id": "7"})),
        ];
        let ranking = top_n(&records, &"make".into(), 3);
        assert_eq!(
            ranking,
            vec![
                RankEntry { key: "Honda".into(), count: 2 },
                RankEntry { key: "Toyota".into(), count: 2 },
                RankEntry { key: "Ford".into(), count: 1 },
            ]
        );
    }

    #[test]
    fn test_top_n_deterministic() {
        let records: Vec<Record> = ["b", "a", "c", "a", "b", "c"]
            .iter()
            .enumerate()
            .map(|(i, k)| rec(json!({"id": i.to_string(), "k": k})))
            .collect();
        let first = top_n(&records, &"k".into(), 3);
        let second = top_n(&records, &"k".into(), 3);
        assert_eq!(first, second);
        let keys: Vec<&str> = first.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_count_trend_from_records_and_baseline() {
        let records = vec![
            rec(json!({"id": "1", "createdAt": (now() - Duration::days(1)).to_rfc3339()})),
            rec(json!({"id": "2", "createdAt": (now() - Duration::days(2)).to_rfc3339()})),
            rec(json!({"id": "3", "createdAt": (now() - Duration::days(3)).to_rfc3339()})),
            rec(json!({"id": "4", "createdAt": (now() - Duration::days(10)).to_rfc3339()})),
        ];
        let mut state = state_with("reports", records);
        let def = MetricDef::count_with_trend(
            "reports",
            "reports",
            TrendSpec::new("createdAt", Duration::days(7)),
        );
        assert!(def.trend().is_some());
        let engine = MetricsEngine::new(vec![def]);

        let metric = engine.compute(&state, now()).unwrap().get("reports").cloned().unwrap();
        assert_eq!(metric.as_count(), Some(4));
        assert_eq!(metric.trend_pct, Some(200));
        assert_eq!(metric.current, Some(3.0));
        assert_eq!(metric.previous, Some(1.0));

        state.set_baseline("reports", 6.0);
        let metric = engine.compute(&state, now()).unwrap().get("reports").cloned().unwrap();
        assert_eq!(metric.trend_pct, Some(-50));
        assert_eq!(metric.current, Some(3.0));
        assert_eq!(metric.previous, Some(6.0));
    }

    #[test]
    fn test_closure_compute() {
        let compute = |state: &AggregateState, _now: DateTime<Utc>| -> Result<MetricSet> {
            Ok(MetricSet::new(vec![Metric::new(
                "streams",
                MetricValue::Count(state.total_streams() as u64),
            )]))
        };
        let state = state_with("v", vec![]);
        assert_eq!(compute.compute(&state, now()).unwrap().count("streams"), Some(1));
    }

    #[test]
    fn test_defs_from_json() {
        let defs: Vec<MetricDef> = serde_json::from_value(json!([
            {"name": "total", "stream": "vehicles", "kind": "count"},
            {"name": "recovered", "stream": "vehicles", "kind": "count",
             "filter": {"kind": "equals", "path": "status", "value": "recovered"}},
            {"name": "makes", "stream": "vehicles", "kind": "top_n", "field": "make"},
            {"name": "daily", "stream": "checks", "kind": "histogram",
             "field": "createdAt", "granularity": "day", "periods": 7},
        ]))
        .unwrap();
        assert_eq!(defs[0], MetricDef::count("total", "vehicles"));
        assert!(!defs[1].filter.is_always());
        assert_eq!(defs[2], MetricDef::top_n("makes", "vehicles", "make", TOP_N));
        assert_eq!(
            defs[3],
            MetricDef::histogram("daily", "checks", "createdAt", Granularity::Day, 7)
        );
    }

    #[test]
    fn test_compute_is_deterministic() {
        let state = state_with(
            "vehicles",
            vec![
                rec(json!({"id": "1", "make": "Honda", "createdAt": "2026-03-14"})),
                rec(json!({"id": "2", "make": "Kia", "createdAt": "2026-03-15"})),
            ],
        );
        let engine = MetricsEngine::default()
            .with_metric(MetricDef::top_n("makes", "vehicles", "make", 5))
            .with_metric(MetricDef::histogram(
                "daily",
                "vehicles",
                "createdAt",
                Granularity::Day,
                7,
            ));
        assert_eq!(
            engine.compute(&state, now()).unwrap(),
            engine.compute(&state, now()).unwrap()
        );
        assert_eq!(engine.defs().len(), 2);
    }
}
