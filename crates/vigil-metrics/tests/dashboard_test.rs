//! Integration tests for the metrics engine over scoped, multi-stream state.
//!
//! This test suite validates:
//! - Residual scope predicates narrow every metric on a nested-partition stream
//! - One engine derives counts, sums, histograms and rankings from several streams
//! - Baselines fetched with a one-shot query override the in-memory trend
//! - Metric sets serialize to the shape the presentation layer consumes

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::json;

use vigil_core::{
    AggregateState, Emission, MemorySource, MetricValue, PartitionField, Predicate, Record,
    ScopeContext, ScopeFilter, StreamDescriptor,
};
use vigil_metrics::{
    Granularity, MetricDef, MetricsCompute, MetricsEngine, TrendCalculator, TrendSpec,
};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 15, 12, 0, 0).unwrap()
}

/// Mid-morning `days` before `now`, so day zero still falls inside today.
fn days_ago(days: i64) -> String {
    (now() - Duration::days(days) - Duration::hours(2)).to_rfc3339()
}

fn check(id: &str, legion: &str, days: i64) -> Record {
    Record::from_json(json!({
        "id": id,
        "vehicle": {"legion": legion},
        "createdAt": days_ago(days),
    }))
    .unwrap()
}

fn vehicle(id: &str, make: &str, status: &str) -> Record {
    Record::from_json(json!({
        "id": id,
        "make": make,
        "status": status,
        "legion": "north",
    }))
    .unwrap()
}

fn reward(id: &str, amount: serde_json::Value) -> Record {
    Record::from_json(json!({"id": id, "amount": amount})).unwrap()
}

fn dashboard_engine() -> MetricsEngine {
    MetricsEngine::new(vec![
        MetricDef::count("vehicles", "vehicles"),
        MetricDef::count("stolen", "vehicles").filtered(Predicate::equals("status", "stolen")),
        MetricDef::count_with_trend(
            "checks",
            "checks",
            TrendSpec::new("createdAt", Duration::days(7)),
        ),
        MetricDef::histogram("daily_checks", "checks", "createdAt", Granularity::Day, 3),
        MetricDef::sum("rewards", "rewards", "amount"),
        MetricDef::top_n("makes", "vehicles", "make", 2),
    ])
}

// =============================================================================
// SCOPED COMPUTE
// =============================================================================

#[test]
fn test_nested_scope_narrows_metrics() {
    let plan = ScopeFilter::new(PartitionField::nested("vehicle.legion"))
        .build(&ScopeContext::partition("north"))
        .unwrap();
    let checks = plan.apply(StreamDescriptor::new("checks", "checks"));

    let mut state = AggregateState::new(["vehicles", "checks", "rewards"]).unwrap();
    state
        .apply(
            "vehicles",
            Emission::Snapshot(vec![
                vehicle("v1", "Honda", "stolen"),
                vehicle("v2", "Kia", "recovered"),
                vehicle("v3", "Honda", "stolen"),
            ]),
            &Predicate::Always,
        )
        .unwrap();
    state
        .apply(
            "checks",
            Emission::Snapshot(vec![
                check("c1", "north", 0),
                check("c2", "south", 0),
                check("c3", "north", 1),
                check("c4", "north", 9),
            ]),
            &checks.residual,
        )
        .unwrap();
    let applied = state
        .apply(
            "rewards",
            Emission::Snapshot(vec![
                reward("r1", json!(250)),
                reward("r2", json!("n/a")),
                reward("r3", json!(100.5)),
            ]),
            &Predicate::Always,
        )
        .unwrap();
    assert!(applied.barrier_opened);

    let metrics = dashboard_engine().compute(&state, now()).unwrap();
    assert_eq!(metrics.len(), 6);
    assert_eq!(metrics.count("vehicles"), Some(3));
    assert_eq!(metrics.count("stolen"), Some(2));

    // c2 belongs to another partition and never reaches the engine.
    let checks = metrics.get("checks").unwrap();
    assert_eq!(checks.as_count(), Some(3));
    assert_eq!(checks.current, Some(2.0));
    assert_eq!(checks.previous, Some(1.0));
    assert_eq!(checks.trend_pct, Some(100));

    match &metrics.get("daily_checks").unwrap().value {
        MetricValue::Histogram(buckets) => {
            let counts: Vec<u64> = buckets.iter().map(|b| b.count).collect();
            assert_eq!(counts, vec![0, 1, 1]);
            assert_eq!(buckets[2].key, "2026-03-15");
        }
        other => panic!("expected histogram, got {other:?}"),
    }

    assert_eq!(metrics.get("rewards").unwrap().as_sum(), Some(350.5));

    match &metrics.get("makes").unwrap().value {
        MetricValue::Ranking(entries) => {
            assert_eq!(entries.len(), 2);
            assert_eq!((entries[0].key.as_str(), entries[0].count), ("Honda", 2));
            assert_eq!((entries[1].key.as_str(), entries[1].count), ("Kia", 1));
        }
        other => panic!("expected ranking, got {other:?}"),
    }
}

// =============================================================================
// BASELINES
// =============================================================================

#[tokio::test]
async fn test_fetched_baseline_overrides_in_memory_window() {
    let source = MemorySource::new();
    for (id, legion, days) in [
        ("c1", "north", 1),
        ("c2", "north", 8),
        ("c3", "north", 9),
        ("c4", "north", 10),
        ("c5", "south", 9),
    ] {
        source.upsert("checks", check(id, legion, days));
    }
    let plan = ScopeFilter::new(PartitionField::nested("vehicle.legion"))
        .build(&ScopeContext::partition("north"))
        .unwrap();
    let descriptor = plan.apply(StreamDescriptor::new("checks", "checks"));
    let spec = TrendSpec::new("createdAt", Duration::days(7));

    let baseline =
        TrendCalculator::fetch_baseline(&source, &descriptor, &spec, &Predicate::Always, &now())
            .await
            .unwrap();
    assert_eq!(baseline, 3.0);

    // The live stream only materializes the current week.
    let mut state = AggregateState::new(["checks"]).unwrap();
    state
        .apply(
            "checks",
            Emission::Snapshot(vec![check("c1", "north", 1)]),
            &descriptor.residual,
        )
        .unwrap();
    state.set_baseline("checks", baseline);

    let engine = MetricsEngine::new(vec![MetricDef::count_with_trend("checks", "checks", spec)]);
    let metric = engine.compute(&state, now()).unwrap().get("checks").cloned().unwrap();
    assert_eq!(metric.as_count(), Some(1));
    assert_eq!(metric.current, Some(1.0));
    assert_eq!(metric.previous, Some(3.0));
    assert_eq!(metric.trend_pct, Some(-67));
}

// =============================================================================
// PRESENTATION SHAPE
// =============================================================================

#[test]
fn test_metric_set_serializes_for_presentation() {
    let mut state = AggregateState::new(["vehicles"]).unwrap();
    state
        .apply(
            "vehicles",
            Emission::Snapshot(vec![vehicle("v1", "Honda", "stolen")]),
            &Predicate::Always,
        )
        .unwrap();
    let engine = MetricsEngine::new(vec![MetricDef::count("vehicles", "vehicles")]);
    let metrics = engine.compute(&state, now()).unwrap();

    let value = serde_json::to_value(&metrics).unwrap();
    assert_eq!(
        value,
        json!([{"name": "vehicles", "value": {"type": "count", "value": 1}}])
    );
}
