//! Data model shared by the aggregator, metrics engine and notification feed.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::filter::{Constraint, Predicate, SortDirection};
use crate::record::FieldPath;

// =============================================================================
// STREAM DESCRIPTOR
// =============================================================================

/// Describes one live subscription: which collection, which records.
///
/// Descriptors are immutable once handed to an aggregator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    /// Unique name within one aggregator.
    pub name: String,
    /// Source collection.
    pub collection: String,
    /// Equality/range constraints pushed down to the source.
    #[serde(default)]
    pub constraints: Vec<Constraint>,
    /// Client-side predicate applied to every materialized record.
    #[serde(default)]
    pub residual: Predicate,
    /// Result ordering.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<(FieldPath, SortDirection)>,
    /// Maximum number of records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl StreamDescriptor {
    /// Stream over a whole collection.
    pub fn new(name: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            collection: collection.into(),
            constraints: Vec::new(),
            residual: Predicate::Always,
            order: None,
            limit: None,
        }
    }

    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    /// AND an additional residual predicate onto this stream.
    pub fn with_residual(mut self, predicate: Predicate) -> Self {
        self.residual = std::mem::take(&mut self.residual).and(predicate);
        self
    }

    pub fn order_by(mut self, field: &str, direction: SortDirection) -> Self {
        self.order = Some((field.into(), direction));
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Full constraint list sent to the source: filters, then ordering and
    /// limit. The `order` and `limit` fields take precedence over `OrderBy`
    /// and `Limit` entries in `constraints`; those entries are forwarded
    /// when the corresponding field is unset.
    pub fn source_constraints(&self) -> Vec<Constraint> {
        let mut out: Vec<Constraint> = self
            .constraints
            .iter()
            .filter(|c| c.is_filter())
            .cloned()
            .collect();
        match &self.order {
            Some((field, direction)) => out.push(Constraint::OrderBy {
                field: field.clone(),
                direction: *direction,
            }),
            None => out.extend(
                self.constraints
                    .iter()
                    .filter(|c| matches!(c, Constraint::OrderBy { .. }))
                    .cloned(),
            ),
        }
        let listed_limit = self
            .constraints
            .iter()
            .filter_map(|c| match c {
                Constraint::Limit { count } => Some(*count),
                _ => None,
            })
            .min();
        if let Some(limit) = self.limit.or(listed_limit) {
            out.push(Constraint::limit(limit));
        }
        out
    }
}

// =============================================================================
// METRICS
// =============================================================================

/// One bucket of a time histogram.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    /// Truncated timestamp key (`2026-03-01` or `2026-03`).
    pub key: String,
    pub count: u64,
}

/// One entry of a top-N ranking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankEntry {
    pub key: String,
    pub count: u64,
}

/// Value carried by a [`Metric`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum MetricValue {
    Count(u64),
    Sum(f64),
    Histogram(Vec<Bucket>),
    Ranking(Vec<RankEntry>),
}

/// A derived value handed to the presentation layer.
///
/// Metrics are rebuilt wholesale on every compute cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    pub value: MetricValue,
    /// Period-over-period change in percent, `current` against `previous`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trend_pct: Option<i64>,
    /// Value of the current trend window. For a trended count this is a
    /// windowed count, not `value`, which covers every matching record.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<f64>,
    /// Value of the previous trend window.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous: Option<f64>,
}

impl Metric {
    pub fn new(name: impl Into<String>, value: MetricValue) -> Self {
        Self {
            name: name.into(),
            value,
            trend_pct: None,
            current: None,
            previous: None,
        }
    }

    /// Attach a trend between two window values.
    pub fn with_trend(mut self, trend_pct: i64, current: f64, previous: f64) -> Self {
        self.trend_pct = Some(trend_pct);
        self.current = Some(current);
        self.previous = Some(previous);
        self
    }

    pub fn as_count(&self) -> Option<u64> {
        match self.value {
            MetricValue::Count(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_sum(&self) -> Option<f64> {
        match self.value {
            MetricValue::Sum(v) => Some(v),
            _ => None,
        }
    }
}

/// Ordered metrics produced by one compute cycle.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricSet(Vec<Metric>);

impl MetricSet {
    pub fn new(metrics: Vec<Metric>) -> Self {
        Self(metrics)
    }

    pub fn get(&self, name: &str) -> Option<&Metric> {
        self.0.iter().find(|m| m.name == name)
    }

    /// Shorthand for count metrics.
    pub fn count(&self, name: &str) -> Option<u64> {
        self.get(name).and_then(Metric::as_count)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Metric> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_vec(self) -> Vec<Metric> {
        self.0
    }
}

// =============================================================================
// NOTIFICATIONS
// =============================================================================

/// Notification priority.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[default]
    Low,
    Medium,
    High,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// Identity of a notification across redelivery.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DedupKey {
    pub id: String,
    pub kind: String,
}

/// A notification built from a "record added" notice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    /// Id of the record that triggered the notification.
    pub id: String,
    /// Event type, e.g. `"stolen_report"`.
    pub kind: String,
    pub priority: Priority,
    pub payload: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    read: bool,
}

impl NotificationEvent {
    /// New unread event.
    pub fn new(id: impl Into<String>, kind: impl Into<String>, priority: Priority) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            priority,
            payload: Map::new(),
            timestamp: None,
            read: false,
        }
    }

    pub fn with_payload(mut self, payload: Map<String, Value>) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_timestamp(mut self, timestamp: Option<DateTime<Utc>>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn dedup_key(&self) -> DedupKey {
        DedupKey {
            id: self.id.clone(),
            kind: self.kind.clone(),
        }
    }

    /// True if `key` identifies this event.
    pub fn has_key(&self, key: &DedupKey) -> bool {
        self.id == key.id && self.kind == key.kind
    }

    pub fn is_read(&self) -> bool {
        self.read
    }

    /// Transition unread → read. Returns false if already read.
    pub fn mark_read(&mut self) -> bool {
        if self.read {
            return false;
        }
        self.read = true;
        true
    }
}
