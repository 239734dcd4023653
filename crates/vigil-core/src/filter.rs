//! Source constraints and client-side residual predicates.
//!
//! Two filtering layers exist:
//!
//! - [`Constraint`]: equality/range predicates plus ordering and limit that
//!   are pushed down to the data source with a subscription.
//! - [`Predicate`]: a residual check applied to every materialized record
//!   for things the source cannot filter natively (nested sub-fields), and
//!   reused by metric definitions to select sub-populations.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::record::{parse_timestamp, FieldPath, Record};

// =============================================================================
// SOURCE CONSTRAINTS
// =============================================================================

/// Sort direction for [`Constraint::OrderBy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// A constraint sent to the data source with a subscription or query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Constraint {
    /// `field == value`
    Eq { field: FieldPath, value: Value },
    /// `field >= value`
    Gte { field: FieldPath, value: Value },
    /// `field < value`
    Lt { field: FieldPath, value: Value },
    /// Result ordering.
    OrderBy {
        field: FieldPath,
        direction: SortDirection,
    },
    /// Maximum number of records.
    Limit { count: usize },
}

impl Constraint {
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Self::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn gte(field: &str, value: impl Into<Value>) -> Self {
        Self::Gte {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn lt(field: &str, value: impl Into<Value>) -> Self {
        Self::Lt {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn order_by(field: &str, direction: SortDirection) -> Self {
        Self::OrderBy {
            field: field.into(),
            direction,
        }
    }

    pub fn limit(count: usize) -> Self {
        Self::Limit { count }
    }

    /// True for equality/range constraints (as opposed to ordering/limit).
    pub fn is_filter(&self) -> bool {
        matches!(self, Self::Eq { .. } | Self::Gte { .. } | Self::Lt { .. })
    }

    /// Evaluate a filter constraint in memory. Ordering and limit always match.
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Self::Eq { field, value } => record
                .get(field)
                .map(|v| values_equal(v, value))
                .unwrap_or(false),
            Self::Gte { field, value } => record
                .get(field)
                .and_then(|v| compare_values(v, value))
                .map(|o| o != Ordering::Less)
                .unwrap_or(false),
            Self::Lt { field, value } => record
                .get(field)
                .and_then(|v| compare_values(v, value))
                .map(|o| o == Ordering::Less)
                .unwrap_or(false),
            Self::OrderBy { .. } | Self::Limit { .. } => true,
        }
    }
}

/// Apply constraints the way a source would: filter, then order, then limit.
pub fn materialize<'a, I>(records: I, constraints: &[Constraint]) -> Vec<Record>
where
    I: IntoIterator<Item = &'a Record>,
{
    let mut out: Vec<Record> = records
        .into_iter()
        .filter(|r| constraints.iter().all(|c| c.matches(r)))
        .cloned()
        .collect();

    for constraint in constraints {
        if let Constraint::OrderBy { field, direction } = constraint {
            out.sort_by(|a, b| {
                let ord = match (a.get(field), b.get(field)) {
                    (Some(x), Some(y)) => compare_values(x, y).unwrap_or(Ordering::Equal),
                    (Some(_), None) => Ordering::Less,
                    (None, Some(_)) => Ordering::Greater,
                    (None, None) => Ordering::Equal,
                };
                match direction {
                    SortDirection::Asc => ord,
                    SortDirection::Desc => ord.reverse(),
                }
            });
        }
    }

    let limit = constraints.iter().find_map(|c| match c {
        Constraint::Limit { count } => Some(*count),
        _ => None,
    });
    if let Some(limit) = limit {
        out.truncate(limit);
    }
    out
}

/// JSON equality that treats `1` and `1.0` as equal.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Order two JSON values: numbers numerically, timestamps chronologically,
/// other strings lexically. Mixed kinds are incomparable.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => match (parse_timestamp(a), parse_timestamp(b)) {
            (Some(ta), Some(tb)) => Some(ta.cmp(&tb)),
            _ => Some(x.cmp(y)),
        },
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => match (parse_timestamp(a), parse_timestamp(b)) {
            (Some(ta), Some(tb)) => Some(ta.cmp(&tb)),
            _ => None,
        },
    }
}

// =============================================================================
// RESIDUAL PREDICATES
// =============================================================================

/// Client-side predicate over a materialized record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Predicate {
    /// Matches every record.
    #[default]
    Always,
    /// Field equals a value.
    Equals { path: FieldPath, value: Value },
    /// Field equals one of several values.
    OneOf { path: FieldPath, values: Vec<Value> },
    /// Field is present and not null.
    Exists { path: FieldPath },
    /// All sub-predicates match.
    All { predicates: Vec<Predicate> },
    /// At least one sub-predicate matches.
    Any { predicates: Vec<Predicate> },
    /// Sub-predicate does not match.
    Not { predicate: Box<Predicate> },
}

impl Predicate {
    pub fn equals(path: &str, value: impl Into<Value>) -> Self {
        Self::Equals {
            path: path.into(),
            value: value.into(),
        }
    }

    pub fn one_of(path: &str, values: Vec<Value>) -> Self {
        Self::OneOf {
            path: path.into(),
            values,
        }
    }

    pub fn exists(path: &str) -> Self {
        Self::Exists { path: path.into() }
    }

    pub fn negate(predicate: Predicate) -> Self {
        Self::Not {
            predicate: Box::new(predicate),
        }
    }

    /// True if this predicate matches everything without looking at fields.
    pub fn is_always(&self) -> bool {
        matches!(self, Self::Always)
    }

    /// Conjunction that collapses trivial [`Predicate::Always`] operands.
    pub fn and(self, other: Predicate) -> Predicate {
        match (self, other) {
            (Self::Always, p) | (p, Self::Always) => p,
            (Self::All { mut predicates }, p) => {
                predicates.push(p);
                Self::All { predicates }
            }
            (a, b) => Self::All {
                predicates: vec![a, b],
            },
        }
    }

    /// Evaluate against a record.
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Self::Always => true,
            Self::Equals { path, value } => record
                .get(path)
                .map(|v| values_equal(v, value))
                .unwrap_or(false),
            Self::OneOf { path, values } => record
                .get(path)
                .map(|v| values.iter().any(|candidate| values_equal(v, candidate)))
                .unwrap_or(false),
            Self::Exists { path } => record.get(path).map(|v| !v.is_null()).unwrap_or(false),
            Self::All { predicates } => predicates.iter().all(|p| p.matches(record)),
            Self::Any { predicates } => predicates.iter().any(|p| p.matches(record)),
            Self::Not { predicate } => !predicate.matches(record),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        Record::from_json(value).unwrap()
    }

    #[test]
    fn test_eq_constraint_numeric_equivalence() {
        let r = record(json!({"id": "a", "reward": 100}));
        assert!(Constraint::eq("reward", 100.0).matches(&r));
        assert!(!Constraint::eq("reward", 50).matches(&r));
        assert!(!Constraint::eq("missing", 100).matches(&r));
    }

    #[test]
    fn test_range_constraints_on_timestamps() {
        let r = record(json!({"id": "a", "createdAt": "2026-03-05T12:00:00Z"}));
        assert!(Constraint::gte("createdAt", "2026-03-05T00:00:00Z").matches(&r));
        assert!(Constraint::lt("createdAt", "2026-03-06T00:00:00Z").matches(&r));
        assert!(!Constraint::lt("createdAt", "2026-03-05T12:00:00Z").matches(&r));
    }

    #[test]
    fn test_range_on_mixed_kinds_never_matches() {
        let r = record(json!({"id": "a", "count": true}));
        assert!(!Constraint::gte("count", 1).matches(&r));
    }

    #[test]
    fn test_materialize_orders_and_limits() {
        let records = vec![
            record(json!({"id": "a", "n": 2})),
            record(json!({"id": "b", "n": 3})),
            record(json!({"id": "c", "n": 1})),
            record(json!({"id": "d"})),
        ];
        let out = materialize(
            &records,
            &[
                Constraint::order_by("n", SortDirection::Desc),
                Constraint::limit(2),
            ],
        );
        let ids: Vec<&str> = out.iter().map(Record::id).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn test_materialize_filters() {
        let records = vec![
            record(json!({"id": "a", "legion": "north"})),
            record(json!({"id": "b", "legion": "south"})),
        ];
        let out = materialize(&records, &[Constraint::eq("legion", "north")]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id(), "a");
    }

    #[test]
    fn test_predicate_variants() {
        let r = record(json!({"id": "a", "status": "recovered", "legion": {"id": "north"}, "note": null}));
        assert!(Predicate::Always.matches(&r));
        assert!(Predicate::equals("legion.id", "north").matches(&r));
        assert!(Predicate::one_of("status", vec![json!("stolen"), json!("recovered")]).matches(&r));
        assert!(!Predicate::exists("note").matches(&r));
        assert!(Predicate::negate(Predicate::exists("note")).matches(&r));
        assert!(Predicate::Any {
            predicates: vec![Predicate::equals("status", "stolen"), Predicate::exists("legion")]
        }
        .matches(&r));
    }

    #[test]
    fn test_and_collapses_always() {
        let p = Predicate::Always.and(Predicate::equals("status", "stolen"));
        assert_eq!(p, Predicate::equals("status", "stolen"));

        let q = p.and(Predicate::exists("plate")).and(Predicate::Always);
        match q {
            Predicate::All { predicates } => assert_eq!(predicates.len(), 2),
            other => panic!("expected All, got {other:?}"),
        }
    }

    #[test]
    fn test_predicate_serde_shape() {
        let p = Predicate::equals("legion.id", "north");
        let value = serde_json::to_value(&p).unwrap();
        assert_eq!(
            value,
            json!({"kind": "equals", "path": "legion.id", "value": "north"})
        );
    }
}
