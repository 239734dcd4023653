//! JSON fixture describing one console session: who is looking, what the
//! collections hold, which streams and metrics to run, and a script of
//! live updates to replay.

use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use vigil_core::defaults::PARTITION_FIELD;
use vigil_core::{
    MemorySource, PartitionField, Priority, Record, ScopeContext, ScopeFilter, StreamDescriptor,
};
use vigil_metrics::MetricDef;
use vigil_streams::{EventSourceSpec, PriorityRule};

#[derive(Debug, Clone, Deserialize)]
pub struct Fixture {
    #[serde(default = "ScopeContext::global")]
    pub scope: ScopeContext,
    /// Where each collection keeps its partition id. Collections not listed
    /// use a native `legion` field.
    #[serde(default)]
    pub partition_fields: HashMap<String, PartitionField>,
    #[serde(default)]
    pub collections: HashMap<String, Vec<Record>>,
    pub streams: Vec<StreamDescriptor>,
    #[serde(default)]
    pub metrics: Vec<MetricDef>,
    #[serde(default)]
    pub notifications: Vec<NotificationSource>,
    #[serde(default)]
    pub updates: Vec<Update>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationSource {
    pub stream: StreamDescriptor,
    pub kind: String,
    #[serde(default = "default_priority")]
    pub priority: PriorityRule,
    #[serde(default)]
    pub timestamp_field: Option<String>,
    #[serde(default)]
    pub payload_fields: Vec<String>,
}

fn default_priority() -> PriorityRule {
    PriorityRule::fixed(Priority::Medium)
}

/// One scripted change, applied `after_ms` after the previous one.
#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    #[serde(default)]
    pub after_ms: u64,
    pub collection: String,
    #[serde(default)]
    pub upsert: Option<Record>,
    #[serde(default)]
    pub remove: Option<String>,
}

impl Update {
    pub fn apply(&self, source: &MemorySource) {
        if let Some(record) = &self.upsert {
            source.upsert(&self.collection, record.clone());
        }
        if let Some(id) = &self.remove {
            source.remove(&self.collection, id);
        }
    }
}

impl Fixture {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading fixture {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("parsing fixture {}", path.display()))
    }

    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Load every collection into `source`.
    pub fn seed(&self, source: &MemorySource) {
        for (collection, records) in &self.collections {
            source.replace(collection, records.clone());
        }
    }

    fn scope_filter(&self, collection: &str) -> ScopeFilter {
        let field = self
            .partition_fields
            .get(collection)
            .cloned()
            .unwrap_or_else(|| PartitionField::native(PARTITION_FIELD));
        ScopeFilter::new(field)
    }

    /// Aggregator streams paired with their collection's scope filter.
    pub fn scoped_streams(&self) -> Vec<(ScopeFilter, StreamDescriptor)> {
        self.streams
            .iter()
            .map(|d| (self.scope_filter(&d.collection), d.clone()))
            .collect()
    }

    /// Notification event sources paired with their collection's scope filter.
    pub fn event_sources(&self) -> Vec<(ScopeFilter, EventSourceSpec)> {
        self.notifications
            .iter()
            .map(|n| {
                let mut spec = EventSourceSpec::new(n.stream.clone(), &n.kind)
                    .with_priority(n.priority.clone());
                if let Some(field) = &n.timestamp_field {
                    spec = spec.with_timestamp_field(field);
                }
                let fields: Vec<&str> = n.payload_fields.iter().map(String::as_str).collect();
                (
                    self.scope_filter(&n.stream.collection),
                    spec.with_payload_fields(&fields),
                )
            })
            .collect()
    }
}
