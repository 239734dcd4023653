//! In-memory [`DataSource`] for tests, demos and local fixtures.
//!
//! Collections are plain record lists. Every mutation is pushed to live
//! subscribers, either as full snapshots or as incremental changes
//! depending on the configured [`DeliveryMode`]. A few hooks simulate
//! misbehaving sources: denied subscriptions, streams that never emit, and
//! subscriptions that fail after opening.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::filter::{materialize, Constraint};
use crate::record::Record;
use crate::traits::{Change, DataSource, Emission, ReleaseHandle, SourceSubscription};

/// How mutations are pushed to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryMode {
    /// Every push carries the full matching record set.
    #[default]
    Snapshot,
    /// Pushes carry add/modify/remove notices.
    Incremental,
}

struct Subscriber {
    id: u64,
    collection: String,
    constraints: Vec<Constraint>,
    tx: mpsc::UnboundedSender<Emission>,
}

#[derive(Default)]
struct Inner {
    mode: DeliveryMode,
    collections: HashMap<String, Vec<Record>>,
    subscribers: Vec<Subscriber>,
    silenced: HashSet<String>,
    denied: HashMap<String, String>,
    next_id: u64,
    subscribe_calls: usize,
    query_calls: usize,
    releases: usize,
}

impl Inner {
    fn notify(&mut self, collection: &str, changes: &[Change]) {
        let records = self.collections.get(collection).cloned().unwrap_or_default();
        let mode = self.mode;
        self.subscribers.retain(|sub| {
            if sub.collection != collection {
                return true;
            }
            let emission = match mode {
                DeliveryMode::Snapshot => Emission::Snapshot(materialize(&records, &sub.constraints)),
                DeliveryMode::Incremental => {
                    Emission::Changes(scoped_changes(changes, &sub.constraints))
                }
            };
            // A closed receiver means the consumer went away without releasing.
            sub.tx.send(emission).is_ok()
        });
    }
}

fn scoped_changes(changes: &[Change], constraints: &[Constraint]) -> Vec<Change> {
    let matches = |r: &Record| constraints.iter().all(|c| c.matches(r));
    changes
        .iter()
        .filter_map(|change| match change {
            Change::Added(r) if matches(r) => Some(change.clone()),
            Change::Added(_) => None,
            Change::Modified(r) if matches(r) => Some(change.clone()),
            Change::Modified(r) => Some(Change::Removed {
                id: r.id().to_string(),
            }),
            Change::Removed { .. } => Some(change.clone()),
        })
        .collect()
}

/// Shared in-memory data source. Clones share the same collections.
#[derive(Clone, Default)]
pub struct MemorySource {
    inner: Arc<Mutex<Inner>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Source pushing incremental change notices instead of snapshots.
    pub fn incremental() -> Self {
        let source = Self::default();
        source.lock().mode = DeliveryMode::Incremental;
        source
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn mode(&self) -> DeliveryMode {
        self.lock().mode
    }

    /// Insert or replace a record and push the change.
    pub fn upsert(&self, collection: &str, record: Record) {
        let mut inner = self.lock();
        let records = inner.collections.entry(collection.to_string()).or_default();
        let change = match records.iter().position(|r| r.id() == record.id()) {
            Some(i) => {
                records[i] = record.clone();
                Change::Modified(record)
            }
            None => {
                records.push(record.clone());
                Change::Added(record)
            }
        };
        inner.notify(collection, &[change]);
    }

    /// Remove a record by id and push the change. Unknown ids are ignored.
    pub fn remove(&self, collection: &str, id: &str) {
        let mut inner = self.lock();
        let Some(records) = inner.collections.get_mut(collection) else {
            return;
        };
        let before = records.len();
        records.retain(|r| r.id() != id);
        if records.len() != before {
            inner.notify(collection, &[Change::Removed { id: id.to_string() }]);
        }
    }

    /// Replace a whole collection and push the difference.
    pub fn replace(&self, collection: &str, records: Vec<Record>) {
        let mut inner = self.lock();
        let previous = inner
            .collections
            .insert(collection.to_string(), records.clone())
            .unwrap_or_default();

        let mut changes: Vec<Change> = previous
            .iter()
            .filter(|old| !records.iter().any(|r| r.id() == old.id()))
            .map(|old| Change::Removed {
                id: old.id().to_string(),
            })
            .collect();
        for record in records {
            match previous.iter().find(|old| old.id() == record.id()) {
                Some(old) if *old == record => {}
                Some(_) => changes.push(Change::Modified(record)),
                None => changes.push(Change::Added(record)),
            }
        }
        inner.notify(collection, &changes);
    }

    /// Push a raw emission to every subscriber of `collection` without
    /// touching stored records. Used to simulate redelivery.
    pub fn emit(&self, collection: &str, emission: Emission) {
        let inner = self.lock();
        for sub in inner.subscribers.iter().filter(|s| s.collection == collection) {
            let _ = sub.tx.send(emission.clone());
        }
    }

    /// Fail every live subscription on `collection`.
    pub fn fail(&self, collection: &str, message: &str) {
        let mut inner = self.lock();
        inner.subscribers.retain(|sub| {
            if sub.collection != collection {
                return true;
            }
            let _ = sub.tx.send(Emission::Failed(message.to_string()));
            false
        });
    }

    /// Refuse future subscriptions and queries on `collection`.
    pub fn deny(&self, collection: &str, message: &str) {
        self.lock()
            .denied
            .insert(collection.to_string(), message.to_string());
    }

    /// Open future subscriptions on `collection` without an initial emission.
    pub fn silence(&self, collection: &str) {
        self.lock().silenced.insert(collection.to_string());
    }

    /// Current contents of a collection.
    pub fn records(&self, collection: &str) -> Vec<Record> {
        self.lock()
            .collections
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    pub fn subscribe_calls(&self) -> usize {
        self.lock().subscribe_calls
    }

    pub fn query_calls(&self) -> usize {
        self.lock().query_calls
    }

    /// Number of subscriptions released by their consumers.
    pub fn release_count(&self) -> usize {
        self.lock().releases
    }

    pub fn active_subscriptions(&self) -> usize {
        self.lock().subscribers.len()
    }
}

#[async_trait]
impl DataSource for MemorySource {
    async fn subscribe(
        &self,
        collection: &str,
        constraints: &[Constraint],
    ) -> Result<SourceSubscription> {
        let mut inner = self.lock();
        inner.subscribe_calls += 1;
        if let Some(message) = inner.denied.get(collection) {
            return Err(Error::source(collection, message.clone()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        if !inner.silenced.contains(collection) {
            let records = inner.collections.get(collection).cloned().unwrap_or_default();
            let current = materialize(&records, constraints);
            let initial = match inner.mode {
                DeliveryMode::Snapshot => Emission::Snapshot(current),
                DeliveryMode::Incremental => {
                    Emission::Changes(current.into_iter().map(Change::Added).collect())
                }
            };
            let _ = tx.send(initial);
        }

        inner.next_id += 1;
        let id = inner.next_id;
        inner.subscribers.push(Subscriber {
            id,
            collection: collection.to_string(),
            constraints: constraints.to_vec(),
            tx,
        });
        debug!(component = "source", collection, subscriber = id, "Memory subscription opened");

        let shared = Arc::downgrade(&self.inner);
        let handle = ReleaseHandle::new(move || {
            if let Some(inner) = shared.upgrade() {
                let mut inner = inner.lock().unwrap_or_else(PoisonError::into_inner);
                inner.subscribers.retain(|s| s.id != id);
                inner.releases += 1;
                trace!(component = "source", subscriber = id, "Memory subscription released");
            }
        });
        Ok(SourceSubscription::new(rx, handle))
    }

    async fn query(&self, collection: &str, constraints: &[Constraint]) -> Result<Vec<Record>> {
        let mut inner = self.lock();
        inner.query_calls += 1;
        if let Some(message) = inner.denied.get(collection) {
            return Err(Error::source(collection, message.clone()));
        }
        let records = inner.collections.get(collection).cloned().unwrap_or_default();
        Ok(materialize(&records, constraints))
    }
}
