//! # vigil-core
//!
//! Core types, scope filtering, and data-source traits for the vigil
//! real-time aggregation engine.
//!
//! This crate provides the foundational data structures the other vigil
//! crates depend on: validated [`Record`]s, [`StreamDescriptor`]s, source
//! [`Constraint`]s and residual [`Predicate`]s, the [`ScopeFilter`], the
//! [`DataSource`] collaborator trait, and the [`Metric`] and
//! [`NotificationEvent`] snapshots handed to the presentation layer.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | A compute cycle panicked |
//! | WARN  | Stream failure, stuck initialization, compute error (stale metrics kept) |
//! | INFO  | Lifecycle events (subscribe, barrier open, teardown) |
//! | DEBUG | Decision points (debounce scheduled, dedup discard, eviction) |
//! | TRACE | Per-emission detail |
//!
//! Structured fields use the same names everywhere: `subscription_id`,
//! `stream`, `collection`, `ready_count`, `total_streams`, `duration_ms`,
//! `error`, plus `component` on helpers that run outside a subscription.

pub mod defaults;
pub mod error;
pub mod filter;
pub mod memory;
pub mod models;
pub mod record;
pub mod scope;
pub mod state;
pub mod temporal;
pub mod traits;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use filter::{Constraint, Predicate, SortDirection};
pub use memory::{DeliveryMode, MemorySource};
pub use models::*;
pub use record::{FieldPath, Record};
pub use scope::{PartitionField, Role, ScopeContext, ScopeFilter, ScopePlan};
pub use state::{AggregateState, Applied, SnapshotState};
pub use temporal::{Granularity, Period};
pub use traits::{Change, DataSource, Emission, ReleaseHandle, SourceSubscription};
