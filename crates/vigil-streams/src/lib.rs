//! # vigil-streams
//!
//! Live stream consumers for the vigil aggregation engine.
//!
//! This crate provides:
//! - [`StreamAggregator`]: N named subscriptions, a readiness barrier and
//!   debounced metric recomputation
//! - [`NotificationAggregator`]: deduplicated, capped, unread-tracked
//!   notification feeds with high-priority alerts
//! - [`Debouncer`]: trailing-edge burst coalescing
//! - Environment-driven configs
//!
//! ## Example
//!
//! ```ignore
//! use vigil_streams::{AggregatorConfig, StreamAggregator, AggregateEvent};
//!
//! let aggregator = StreamAggregator::with_engine(source, engine, AggregatorConfig::from_env());
//! let mut subscription = aggregator.subscribe(descriptors).await?;
//!
//! while let Some(event) = subscription.recv().await {
//!     if let AggregateEvent::Updated { metrics } = event {
//!         println!("{}", serde_json::to_string(&metrics)?);
//!     }
//! }
//! ```

pub mod aggregator;
pub mod config;
pub mod debouncer;
mod gate;
pub mod notifications;

// Re-export core types
pub use vigil_core::*;

pub use aggregator::{AggregateEvent, AggregateSubscription, BaselineRequest, StreamAggregator};
pub use config::{AggregatorConfig, NotificationConfig};
pub use debouncer::Debouncer;
pub use notifications::{
    AlertSink, EventSourceSpec, Ingested, NotificationAggregator, NotificationFeed,
    NotificationHandle, PriorityRule,
};
