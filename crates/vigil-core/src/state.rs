//! Materialized per-stream state and the aggregate owned by one aggregator.
//!
//! Sources deliver either full snapshots or incremental changes. Both are
//! normalized here into one list of records per stream, already filtered by
//! the stream's residual predicate.

use std::collections::HashMap;

use tracing::trace;

use crate::error::{Error, Result};
use crate::filter::Predicate;
use crate::record::Record;
use crate::traits::{Change, Emission};

/// Current record set of one stream.
#[derive(Debug, Clone, Default)]
pub struct SnapshotState {
    records: Vec<Record>,
    ready: bool,
    failed: Option<String>,
    sequence: u64,
}

impl SnapshotState {
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// True once the stream has emitted at least once.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Failure message, if the source gave up on this stream.
    pub fn failure(&self) -> Option<&str> {
        self.failed.as_deref()
    }

    /// Number of emissions applied so far.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Replace the record set. Returns true if this made the stream ready.
    pub fn apply_snapshot(&mut self, records: Vec<Record>, residual: &Predicate) -> bool {
        self.records = records
            .into_iter()
            .filter(|r| residual.matches(r))
            .collect();
        self.bump()
    }

    /// Apply incremental changes in order. Returns true if this made the
    /// stream ready.
    pub fn apply_changes(&mut self, changes: Vec<Change>, residual: &Predicate) -> bool {
        for change in changes {
            match change {
                Change::Added(record) | Change::Modified(record) => {
                    let position = self.records.iter().position(|r| r.id() == record.id());
                    match (position, residual.matches(&record)) {
                        (Some(i), true) => self.records[i] = record,
                        (Some(i), false) => {
                            self.records.remove(i);
                        }
                        (None, true) => self.records.push(record),
                        (None, false) => {}
                    }
                }
                Change::Removed { id } => {
                    self.records.retain(|r| r.id() != id);
                }
            }
        }
        self.bump()
    }

    fn bump(&mut self) -> bool {
        self.sequence += 1;
        let became_ready = !self.ready;
        self.ready = true;
        became_ready
    }
}

/// What applying one emission did to the aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Applied {
    /// The emission was applied (false for ignored emissions on failed streams).
    pub changed: bool,
    /// This stream emitted for the first time.
    pub became_ready: bool,
    /// Every stream is now ready and this emission was the last one missing.
    pub barrier_opened: bool,
    /// The stream was marked failed by this emission.
    pub failed: bool,
}

/// All stream states of one aggregator.
#[derive(Debug, Clone, Default)]
pub struct AggregateState {
    names: Vec<String>,
    streams: HashMap<String, SnapshotState>,
    ready_count: usize,
    baselines: HashMap<String, f64>,
}

impl AggregateState {
    /// Empty state for the given stream names. Names must be unique.
    pub fn new<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut state = Self::default();
        for name in names {
            let name = name.into();
            if state.streams.contains_key(&name) {
                return Err(Error::InvalidInput(format!("duplicate stream name '{name}'")));
            }
            state.streams.insert(name.clone(), SnapshotState::default());
            state.names.push(name);
        }
        Ok(state)
    }

    /// Stream names in registration order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn total_streams(&self) -> usize {
        self.names.len()
    }

    pub fn ready_count(&self) -> usize {
        self.ready_count
    }

    /// True once every stream has emitted at least once.
    pub fn is_ready(&self) -> bool {
        self.ready_count == self.names.len()
    }

    pub fn stream(&self, name: &str) -> Option<&SnapshotState> {
        self.streams.get(name)
    }

    /// Records of a stream, or `None` for an unknown stream name.
    pub fn records(&self, name: &str) -> Option<&[Record]> {
        self.streams.get(name).map(SnapshotState::records)
    }

    /// Streams that have not emitted yet, in registration order.
    pub fn pending(&self) -> Vec<String> {
        self.names
            .iter()
            .filter(|n| !self.streams.get(*n).map(|s| s.ready).unwrap_or(false))
            .cloned()
            .collect()
    }

    /// Previous-period value fetched for a metric, if any.
    pub fn baseline(&self, metric: &str) -> Option<f64> {
        self.baselines.get(metric).copied()
    }

    pub fn set_baseline(&mut self, metric: impl Into<String>, value: f64) {
        self.baselines.insert(metric.into(), value);
    }

    /// Apply one emission to the named stream.
    pub fn apply(
        &mut self,
        name: &str,
        emission: Emission,
        residual: &Predicate,
    ) -> Result<Applied> {
        let was_ready = self.is_ready();
        let stream = self
            .streams
            .get_mut(name)
            .ok_or_else(|| Error::Internal(format!("emission for unknown stream '{name}'")))?;

        if stream.failed.is_some() {
            trace!(stream = name, "Ignoring emission on failed stream");
            return Ok(Applied::default());
        }

        let became_ready = match emission {
            Emission::Snapshot(records) => stream.apply_snapshot(records, residual),
            Emission::Changes(changes) => stream.apply_changes(changes, residual),
            Emission::Failed(message) => {
                stream.failed = Some(message);
                return Ok(Applied {
                    failed: true,
                    ..Applied::default()
                });
            }
        };
        trace!(
            stream = name,
            sequence = stream.sequence,
            record_count = stream.records.len(),
            "Emission applied"
        );

        if became_ready {
            self.ready_count += 1;
        }
        Ok(Applied {
            changed: true,
            became_ready,
            barrier_opened: !was_ready && self.is_ready(),
            failed: false,
        })
    }
}
