//! # vigil-metrics
//!
//! Pure metric computation for the vigil aggregation engine.
//!
//! This crate provides:
//! - Declarative metric definitions (counts, period counts, sums, time
//!   histograms, top-N rankings)
//! - Period-over-period trend deltas with the dashboard rounding rules
//! - One-shot baseline queries for the previous trend window
//!
//! ## Example
//!
//! ```ignore
//! use vigil_metrics::{MetricDef, MetricsCompute, MetricsEngine, TrendSpec};
//!
//! let engine = MetricsEngine::new(vec![
//!     MetricDef::count_with_trend("reports", "reports", TrendSpec::new("createdAt", Duration::days(7))),
//!     MetricDef::top_n("makes", "vehicles", "make", 5),
//! ]);
//! let metrics = engine.compute(&state, Utc::now())?;
//! ```

pub mod engine;
pub mod trend;

// Re-export core types
pub use vigil_core::*;

pub use engine::{histogram, top_n, MetricDef, MetricKind, MetricsCompute, MetricsEngine};
pub use trend::{percent_change, TrendCalculator, TrendSample, TrendSpec};
