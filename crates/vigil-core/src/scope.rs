//! Role and partition based visibility.
//!
//! A [`ScopeFilter`] turns the caller's [`ScopeContext`] into a [`ScopePlan`]:
//! constraints the source can evaluate natively, plus a residual predicate
//! for partition fields the source cannot index (nested sub-fields).
//!
//! Scope resolution fails closed. A partition-scoped role without a
//! partition id is rejected before any subscription is attempted; it never
//! degrades to "show everything".
//!
//! # Example
//!
//! ```
//! use vigil_core::{PartitionField, ScopeContext, ScopeFilter, StreamDescriptor};
//!
//! let filter = ScopeFilter::new(PartitionField::native("legion"));
//! let plan = filter.build(&ScopeContext::partition("north")).unwrap();
//! let stream = plan.apply(StreamDescriptor::new("vehicles", "vehicles"));
//! assert_eq!(stream.constraints.len(), 1);
//!
//! assert!(filter.build(&ScopeContext::partition("")).is_err());
//! ```

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::filter::{Constraint, Predicate};
use crate::models::StreamDescriptor;
use crate::record::FieldPath;

/// Administrator role as supplied by the authorization collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Sees every partition.
    Global,
    /// Sees a single partition.
    Partition,
}

/// Who is looking, and at which partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeContext {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_id: Option<String>,
}

impl ScopeContext {
    pub fn global() -> Self {
        Self {
            role: Role::Global,
            partition_id: None,
        }
    }

    pub fn partition(partition_id: impl Into<String>) -> Self {
        Self {
            role: Role::Partition,
            partition_id: Some(partition_id.into()),
        }
    }

    /// Partition id after trimming, if non-empty.
    pub fn effective_partition(&self) -> Option<&str> {
        self.partition_id
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
    }
}

/// Where a collection stores its partition id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "path", rename_all = "snake_case")]
pub enum PartitionField {
    /// Top-level field the source can filter on.
    Native(FieldPath),
    /// Nested sub-field; filtered client-side after materialization.
    Nested(FieldPath),
}

impl PartitionField {
    pub fn native(field: &str) -> Self {
        Self::Native(field.into())
    }

    pub fn nested(path: &str) -> Self {
        Self::Nested(path.into())
    }
}

/// Source-level constraints plus the residual client-side predicate.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScopePlan {
    pub source_constraints: Vec<Constraint>,
    pub residual: Predicate,
}

impl ScopePlan {
    /// True if the plan restricts nothing.
    pub fn is_unrestricted(&self) -> bool {
        self.source_constraints.is_empty() && self.residual.is_always()
    }

    /// Merge this plan into a stream descriptor.
    pub fn apply(&self, mut descriptor: StreamDescriptor) -> StreamDescriptor {
        descriptor
            .constraints
            .extend(self.source_constraints.iter().cloned());
        descriptor.with_residual(self.residual.clone())
    }
}

/// Builds [`ScopePlan`]s for one collection layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeFilter {
    partition_field: PartitionField,
}

impl ScopeFilter {
    pub fn new(partition_field: PartitionField) -> Self {
        Self { partition_field }
    }

    pub fn partition_field(&self) -> &PartitionField {
        &self.partition_field
    }

    /// Resolve a context into a plan.
    ///
    /// # Errors
    ///
    /// [`Error::MisconfiguredScope`] when a partition-scoped context carries
    /// no (or a blank) partition id, or when a native partition field names a
    /// nested sub-field the source cannot filter on.
    pub fn build(&self, context: &ScopeContext) -> Result<ScopePlan> {
        if let PartitionField::Native(field) = &self.partition_field {
            if field.is_nested() {
                return Err(Error::MisconfiguredScope(format!(
                    "native partition field '{field}' is nested; use a nested partition field"
                )));
            }
        }
        match context.role {
            Role::Global => {
                debug!(component = "scope", "Global scope, no partition constraint");
                Ok(ScopePlan::default())
            }
            Role::Partition => {
                let partition = context.effective_partition().ok_or_else(|| {
                    Error::MisconfiguredScope(
                        "partition-scoped role requires a partition id".into(),
                    )
                })?;
                debug!(
                    component = "scope",
                    partition_id = partition,
                    field = %self.field_path(),
                    "Partition scope resolved"
                );
                Ok(match &self.partition_field {
                    PartitionField::Native(field) => ScopePlan {
                        source_constraints: vec![Constraint::Eq {
                            field: field.clone(),
                            value: partition.into(),
                        }],
                        residual: Predicate::Always,
                    },
                    PartitionField::Nested(path) => ScopePlan {
                        source_constraints: Vec::new(),
                        residual: Predicate::Equals {
                            path: path.clone(),
                            value: partition.into(),
                        },
                    },
                })
            }
        }
    }

    fn field_path(&self) -> &FieldPath {
        match &self.partition_field {
            PartitionField::Native(p) | PartitionField::Nested(p) => p,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;
    use serde_json::json;

    #[test]
    fn test_global_scope_is_unrestricted() {
        let filter = ScopeFilter::new(PartitionField::native("legion"));
        let plan = filter.build(&ScopeContext::global()).unwrap();
        assert!(plan.is_unrestricted());
    }

    #[test]
    fn test_global_scope_ignores_stray_partition_id() {
        let filter = ScopeFilter::new(PartitionField::native("legion"));
        let ctx = ScopeContext {
            role: Role::Global,
            partition_id: Some("north".into()),
        };
        assert!(filter.build(&ctx).unwrap().is_unrestricted());
    }

    #[test]
    fn test_native_partition_pushes_equality() {
        let filter = ScopeFilter::new(PartitionField::native("legion"));
        let plan = filter.build(&ScopeContext::partition("north")).unwrap();
        assert_eq!(plan.source_constraints, vec![Constraint::eq("legion", "north")]);
        assert!(plan.residual.is_always());
    }

    #[test]
    fn test_nested_partition_uses_residual() {
        let filter = ScopeFilter::new(PartitionField::nested("owner.legion"));
        let plan = filter.build(&ScopeContext::partition("north")).unwrap();
        assert!(plan.source_constraints.is_empty());

        let inside = Record::from_json(json!({"id": "1", "owner": {"legion": "north"}})).unwrap();
        let outside = Record::from_json(json!({"id": "2", "owner": {"legion": "south"}})).unwrap();
        let missing = Record::from_json(json!({"id": "3"})).unwrap();
        assert!(plan.residual.matches(&inside));
        assert!(!plan.residual.matches(&outside));
        assert!(!plan.residual.matches(&missing));
    }

    #[test]
    fn test_partition_trimmed() {
        let filter = ScopeFilter::new(PartitionField::native("legion"));
        let plan = filter.build(&ScopeContext::partition("  north ")).unwrap();
        assert_eq!(plan.source_constraints, vec![Constraint::eq("legion", "north")]);
    }

    #[test]
    fn test_missing_partition_fails_closed() {
        let filter = ScopeFilter::new(PartitionField::native("legion"));
        for ctx in [
            ScopeContext {
                role: Role::Partition,
                partition_id: None,
            },
            ScopeContext::partition(""),
            ScopeContext::partition("   "),
        ] {
            let err = filter.build(&ctx).unwrap_err();
            assert!(matches!(err, Error::MisconfiguredScope(_)), "{ctx:?}");
        }
    }

    #[test]
    fn test_native_field_must_be_top_level() {
        let filter = ScopeFilter::new(PartitionField::native("owner.legion"));
        for ctx in [ScopeContext::partition("north"), ScopeContext::global()] {
            let err = filter.build(&ctx).unwrap_err();
            assert!(matches!(err, Error::MisconfiguredScope(_)), "{ctx:?}");
        }
        assert!(ScopeFilter::new(PartitionField::nested("owner.legion"))
            .build(&ScopeContext::partition("north"))
            .is_ok());
    }

    #[test]
    fn test_apply_merges_into_descriptor() {
        let filter = ScopeFilter::new(PartitionField::nested("legion.id"));
        let plan = filter.build(&ScopeContext::partition("north")).unwrap();
        let d = plan.apply(
            StreamDescriptor::new("open", "vehicles")
                .with_constraint(Constraint::eq("status", "stolen"))
                .with_residual(Predicate::exists("plate")),
        );
        assert_eq!(d.constraints.len(), 1);
        assert!(matches!(d.residual, Predicate::All { ref predicates } if predicates.len() == 2));
    }

    #[test]
    fn test_context_deserializes_without_partition() {
        let ctx: ScopeContext = serde_json::from_value(json!({"role": "partition"})).unwrap();
        assert_eq!(ctx.effective_partition(), None);
    }
}
