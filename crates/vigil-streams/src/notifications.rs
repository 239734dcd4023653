//! Deduplicated, capped notification feeds.
//!
//! [`NotificationFeed`] is the synchronous buffer: newest-first, at most
//! `capacity` events, unique by [`DedupKey`] within the live buffer. A key
//! that has been evicted is forgotten, so a later redelivery is ingested
//! again.
//!
//! [`NotificationAggregator`] turns records that become visible on one or
//! more event streams into feed entries. A record becomes visible when it
//! first passes the stream's scope, whether it was inserted or modified into
//! it, and the rule is the same for snapshot and incremental delivery.
//!
//! High-priority events go to an [`AlertSink`] once per aggregator: the
//! aggregator remembers the last [`ALERT_HISTORY_CAPACITY`] alerted keys
//! across all of its subscriptions, so re-subscribing does not replay them.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::stream::{self, BoxStream, SelectAll, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use vigil_core::defaults::ALERT_HISTORY_CAPACITY;
use vigil_core::filter::values_equal;
use vigil_core::{
    Change, DataSource, DedupKey, Emission, Error, FieldPath, NotificationEvent, Priority, Record,
    ReleaseHandle, Result, ScopeContext, ScopeFilter, SourceSubscription, StreamDescriptor,
};

use crate::config::NotificationConfig;
use crate::gate::ActiveGate;

/// Outcome of [`NotificationFeed::ingest`].
#[derive(Debug, Clone, PartialEq)]
pub enum Ingested {
    /// The event was prepended. Carries the event evicted to stay within
    /// capacity, if any.
    Inserted { evicted: Option<NotificationEvent> },
    /// An event with the same key is already in the buffer.
    Duplicate,
}

impl Ingested {
    pub fn is_inserted(&self) -> bool {
        matches!(self, Self::Inserted { .. })
    }
}

/// Capped newest-first notification buffer with unread tracking.
#[derive(Debug, Clone)]
pub struct NotificationFeed {
    capacity: usize,
    events: VecDeque<NotificationEvent>,
    keys: HashSet<DedupKey>,
}

impl NotificationFeed {
    /// Feed holding at most `capacity` events. Zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            events: VecDeque::with_capacity(capacity + 1),
            keys: HashSet::with_capacity(capacity + 1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn contains(&self, key: &DedupKey) -> bool {
        self.keys.contains(key)
    }

    /// Prepend `event` unless its key is already buffered, evicting the
    /// oldest event past capacity.
    pub fn ingest(&mut self, event: NotificationEvent) -> Ingested {
        let key = event.dedup_key();
        if self.keys.contains(&key) {
            debug!(id = %key.id, kind = %key.kind, "Duplicate notification discarded");
            return Ingested::Duplicate;
        }
        self.keys.insert(key);
        self.events.push_front(event);

        let evicted = if self.events.len() > self.capacity {
            self.events.pop_back()
        } else {
            None
        };
        if let Some(old) = &evicted {
            self.keys.remove(&old.dedup_key());
            debug!(id = %old.id, kind = %old.kind, "Oldest notification evicted");
        }
        Ingested::Inserted { evicted }
    }

    pub fn unread_count(&self) -> usize {
        self.events.iter().filter(|e| !e.is_read()).count()
    }

    /// Mark every event read. Returns how many were unread.
    pub fn mark_all_read(&mut self) -> usize {
        self.events
            .iter_mut()
            .map(NotificationEvent::mark_read)
            .filter(|changed| *changed)
            .count()
    }

    /// Mark one event read. Returns false if it is unknown or already read.
    pub fn mark_read(&mut self, key: &DedupKey) -> bool {
        self.events
            .iter_mut()
            .find(|e| e.has_key(key))
            .map(NotificationEvent::mark_read)
            .unwrap_or(false)
    }

    /// Cloned events, newest first.
    pub fn snapshot(&self) -> Vec<NotificationEvent> {
        self.events.iter().cloned().collect()
    }
}

/// Side effect for newly ingested high-priority events (sound, toast,
/// push). Called at most once per ingested event.
pub trait AlertSink: Send + Sync {
    fn alert(&self, event: &NotificationEvent);
}

impl<F> AlertSink for F
where
    F: Fn(&NotificationEvent) + Send + Sync,
{
    fn alert(&self, event: &NotificationEvent) {
        self(event)
    }
}

/// How an event source assigns priority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum PriorityRule {
    Fixed { priority: Priority },
    /// Priority from a record field: `high` values map to high, `medium`
    /// values to medium, anything else (or a missing field) to `default`.
    ByField {
        path: FieldPath,
        #[serde(default)]
        high: Vec<Value>,
        #[serde(default)]
        medium: Vec<Value>,
        #[serde(default)]
        default: Priority,
    },
}

impl PriorityRule {
    pub fn fixed(priority: Priority) -> Self {
        Self::Fixed { priority }
    }

    pub fn by_field(path: &str, high: Vec<Value>, medium: Vec<Value>, default: Priority) -> Self {
        Self::ByField {
            path: path.into(),
            high,
            medium,
            default,
        }
    }

    pub fn resolve(&self, record: &Record) -> Priority {
        match self {
            Self::Fixed { priority } => *priority,
            Self::ByField {
                path,
                high,
                medium,
                default,
            } => match record.get(path) {
                Some(value) if high.iter().any(|h| values_equal(h, value)) => Priority::High,
                Some(value) if medium.iter().any(|m| values_equal(m, value)) => Priority::Medium,
                _ => *default,
            },
        }
    }
}

/// One event stream feeding a notification feed.
#[derive(Debug, Clone, PartialEq)]
pub struct EventSourceSpec {
    pub descriptor: StreamDescriptor,
    /// Event type stamped on every notification from this stream.
    pub kind: String,
    pub priority: PriorityRule,
    pub timestamp_field: Option<FieldPath>,
    /// Fields copied into the payload. Empty copies the whole record.
    pub payload_fields: Vec<FieldPath>,
}

impl EventSourceSpec {
    pub fn new(descriptor: StreamDescriptor, kind: &str) -> Self {
        Self {
            descriptor,
            kind: kind.to_string(),
            priority: PriorityRule::fixed(Priority::Medium),
            timestamp_field: None,
            payload_fields: Vec::new(),
        }
    }

    pub fn with_priority(mut self, rule: PriorityRule) -> Self {
        self.priority = rule;
        self
    }

    pub fn with_timestamp_field(mut self, field: &str) -> Self {
        self.timestamp_field = Some(field.into());
        self
    }

    pub fn with_payload_fields(mut self, fields: &[&str]) -> Self {
        self.payload_fields = fields.iter().map(|f| FieldPath::from(*f)).collect();
        self
    }

    /// Build the notification for a newly added record.
    pub fn to_event(&self, record: &Record) -> NotificationEvent {
        let payload = if self.payload_fields.is_empty() {
            record.fields().clone()
        } else {
            let mut payload = Map::new();
            for field in &self.payload_fields {
                if let Some(value) = record.get(field) {
                    payload.insert(field.to_string(), value.clone());
                }
            }
            payload
        };
        let timestamp = self
            .timestamp_field
            .as_ref()
            .and_then(|field| record.timestamp(field));
        NotificationEvent::new(record.id(), &self.kind, self.priority.resolve(record))
            .with_payload(payload)
            .with_timestamp(timestamp)
    }
}

struct Shared {
    feed: NotificationFeed,
    failed: Vec<String>,
}

/// Bounded memory of alerted keys, oldest forgotten first.
#[derive(Debug)]
struct AlertLedger {
    capacity: usize,
    order: VecDeque<DedupKey>,
    keys: HashSet<DedupKey>,
}

impl AlertLedger {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            keys: HashSet::new(),
        }
    }

    /// Remember `key`. Returns false if it was already alerted.
    fn record(&mut self, key: DedupKey) -> bool {
        if !self.keys.insert(key.clone()) {
            return false;
        }
        self.order.push_back(key);
        if self.order.len() > self.capacity {
            if let Some(old) = self.order.pop_front() {
                self.keys.remove(&old);
            }
        }
        true
    }
}

/// Opens notification feeds against a data source.
pub struct NotificationAggregator {
    source: Arc<dyn DataSource>,
    config: NotificationConfig,
    sink: Option<Arc<dyn AlertSink>>,
    alerted: Arc<Mutex<AlertLedger>>,
}

impl NotificationAggregator {
    pub fn new(source: Arc<dyn DataSource>, config: NotificationConfig) -> Self {
        Self {
            source,
            config,
            sink: None,
            alerted: Arc::new(Mutex::new(AlertLedger::new(ALERT_HISTORY_CAPACITY))),
        }
    }

    pub fn with_alert_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Resolve `context` for every event source, then
    /// [`subscribe`](Self::subscribe). All plans are built before the source
    /// is touched; a misconfigured scope opens nothing.
    pub async fn subscribe_scoped(
        &self,
        context: &ScopeContext,
        sources: Vec<(ScopeFilter, EventSourceSpec)>,
    ) -> Result<NotificationHandle> {
        let specs = sources
            .into_iter()
            .map(|(filter, mut spec)| {
                spec.descriptor = filter.build(context)?.apply(spec.descriptor);
                Ok(spec)
            })
            .collect::<Result<Vec<_>>>()?;
        self.subscribe(specs).await
    }

    /// Subscribe to every event source and start ingesting.
    ///
    /// A refused stream subscription is logged and listed by
    /// [`NotificationHandle::failed_streams`]; the other streams keep going.
    pub async fn subscribe(&self, specs: Vec<EventSourceSpec>) -> Result<NotificationHandle> {
        if specs.is_empty() {
            return Err(Error::InvalidInput(
                "at least one event source is required".to_string(),
            ));
        }
        let mut names = HashSet::new();
        for spec in &specs {
            if !names.insert(spec.descriptor.name.as_str()) {
                return Err(Error::InvalidInput(format!(
                    "duplicate stream name '{}'",
                    spec.descriptor.name
                )));
            }
        }

        let id = Uuid::now_v7();
        info!(
            subscription_id = %id,
            stream_count = specs.len(),
            capacity = self.config.capacity,
            "Notification subscription starting"
        );

        let shared = Arc::new(Mutex::new(Shared {
            feed: NotificationFeed::new(self.config.capacity),
            failed: Vec::new(),
        }));
        let mut releases = Vec::with_capacity(specs.len());
        let mut inputs = Vec::with_capacity(specs.len());
        for (index, spec) in specs.iter().enumerate() {
            let descriptor = &spec.descriptor;
            match self
                .source
                .subscribe(&descriptor.collection, &descriptor.source_constraints())
                .await
            {
                Ok(SourceSubscription { emissions, handle }) => {
                    releases.push(handle);
                    inputs.push(tagged(index, emissions));
                }
                Err(e) => {
                    warn!(
                        subscription_id = %id,
                        stream = %descriptor.name,
                        collection = %descriptor.collection,
                        error = %e,
                        "Event stream subscription refused"
                    );
                    lock(&shared).failed.push(descriptor.name.clone());
                }
            }
        }

        let gate = Arc::new(ActiveGate::new());
        let cancel = CancellationToken::new();
        let (version_tx, version_rx) = watch::channel(0u64);
        let seen = vec![HashSet::new(); specs.len()];
        let runner = NotificationLoop {
            id,
            specs,
            seen,
            shared: shared.clone(),
            gate: gate.clone(),
            sink: self.sink.clone(),
            alerted: self.alerted.clone(),
            version: version_tx,
        };
        tokio::spawn(runner.run(stream::select_all(inputs), cancel.clone()));

        Ok(NotificationHandle {
            id,
            shared,
            gate,
            cancel,
            releases,
            version: version_rx,
        })
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

fn tagged(
    index: usize,
    emissions: mpsc::UnboundedReceiver<Emission>,
) -> BoxStream<'static, (usize, Emission)> {
    stream::unfold(emissions, move |mut rx| async move {
        rx.recv().await.map(|emission| ((index, emission), rx))
    })
    .boxed()
}

struct NotificationLoop {
    id: Uuid,
    specs: Vec<EventSourceSpec>,
    /// Ids currently visible per stream.
    seen: Vec<HashSet<String>>,
    shared: Arc<Mutex<Shared>>,
    gate: Arc<ActiveGate>,
    sink: Option<Arc<dyn AlertSink>>,
    alerted: Arc<Mutex<AlertLedger>>,
    version: watch::Sender<u64>,
}

impl NotificationLoop {
    async fn run(
        mut self,
        mut inputs: SelectAll<BoxStream<'static, (usize, Emission)>>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = inputs.next() => match next {
                    Some((index, emission)) => self.on_emission(index, emission),
                    None => break,
                },
            }
        }
        debug!(subscription_id = %self.id, "Notification loop stopped");
    }

    fn on_emission(&mut self, index: usize, emission: Emission) {
        if !self.gate.is_open() {
            return;
        }
        let added = self.added_records(index, emission);
        let alerts = if added.is_empty() {
            Vec::new()
        } else {
            self.ingest(index, &added)
        };

        // Alerts run outside the buffer lock, and never after teardown.
        self.gate.run(|| {
            if let Some(sink) = &self.sink {
                let fresh: Vec<&NotificationEvent> = {
                    let mut ledger = self.alerted.lock().unwrap_or_else(PoisonError::into_inner);
                    alerts
                        .iter()
                        .filter(|event| ledger.record(event.dedup_key()))
                        .collect()
                };
                for event in fresh {
                    debug!(
                        subscription_id = %self.id,
                        id = %event.id,
                        kind = %event.kind,
                        "High-priority alert"
                    );
                    sink.alert(event);
                }
            }
            self.version.send_modify(|v| *v += 1);
        });
    }

    /// Ingest added records. Returns the newly inserted high-priority events.
    fn ingest(&self, index: usize, added: &[Record]) -> Vec<NotificationEvent> {
        let spec = &self.specs[index];
        let mut alerts = Vec::new();
        let mut shared = lock(&self.shared);
        for record in added {
            let event = spec.to_event(record);
            let high = event.priority == Priority::High;
            if shared.feed.ingest(event.clone()).is_inserted() && high {
                alerts.push(event);
            }
        }
        trace!(
            subscription_id = %self.id,
            stream = %spec.descriptor.name,
            added = added.len(),
            buffered = shared.feed.len(),
            unread = shared.feed.unread_count(),
            "Notifications ingested"
        );
        alerts
    }

    /// Records this emission makes visible for the first time. A record is
    /// visible while it passes the residual filter.
    fn added_records(&mut self, index: usize, emission: Emission) -> Vec<Record> {
        let spec = &self.specs[index];
        let residual = &spec.descriptor.residual;
        let seen = &mut self.seen[index];
        match emission {
            Emission::Snapshot(records) => {
                let current: HashMap<String, Record> = records
                    .into_iter()
                    .filter(|r| residual.matches(r))
                    .map(|r| (r.id().to_string(), r))
                    .collect();
                let mut added: Vec<Record> = current
                    .iter()
                    .filter(|(id, _)| !seen.contains(*id))
                    .map(|(_, r)| r.clone())
                    .collect();
                // Oldest first, so the newest lands at the head of the feed.
                added.sort_by_key(|r| order_key(r, spec));
                *seen = current.into_keys().collect();
                added
            }
            Emission::Changes(changes) => {
                let mut added = Vec::new();
                for change in changes {
                    match change {
                        Change::Added(record) | Change::Modified(record) => {
                            let id = record.id().to_string();
                            if !residual.matches(&record) {
                                seen.remove(&id);
                            } else if seen.insert(id) {
                                added.push(record);
                            }
                        }
                        Change::Removed { id } => {
                            seen.remove(&id);
                        }
                    }
                }
                added
            }
            Emission::Failed(message) => {
                warn!(
                    subscription_id = %self.id,
                    stream = %spec.descriptor.name,
                    error = %message,
                    "Event stream failed"
                );
                lock(&self.shared).failed.push(spec.descriptor.name.clone());
                Vec::new()
            }
        }
    }
}

/// Ordering for records added by one snapshot: oldest timestamp first so
/// the newest ends up at the head of the feed, then id.
fn order_key(
    record: &Record,
    spec: &EventSourceSpec,
) -> (Option<chrono::DateTime<chrono::Utc>>, String) {
    let ts = spec
        .timestamp_field
        .as_ref()
        .and_then(|field| record.timestamp(field));
    (ts, record.id().to_string())
}

/// Handle to a running notification feed.
///
/// Dropping the handle unsubscribes.
pub struct NotificationHandle {
    id: Uuid,
    shared: Arc<Mutex<Shared>>,
    gate: Arc<ActiveGate>,
    cancel: CancellationToken,
    releases: Vec<ReleaseHandle>,
    version: watch::Receiver<u64>,
}

impl std::fmt::Debug for NotificationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationHandle")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl NotificationHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Current events, newest first.
    pub fn events(&self) -> Vec<NotificationEvent> {
        lock(&self.shared).feed.snapshot()
    }

    pub fn len(&self) -> usize {
        lock(&self.shared).feed.len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.shared).feed.is_empty()
    }

    pub fn unread_count(&self) -> usize {
        lock(&self.shared).feed.unread_count()
    }

    /// Mark every event read. Returns how many were unread.
    pub fn mark_all_read(&self) -> usize {
        let marked = lock(&self.shared).feed.mark_all_read();
        debug!(subscription_id = %self.id, marked, "Notifications marked read");
        marked
    }

    pub fn mark_read(&self, key: &DedupKey) -> bool {
        lock(&self.shared).feed.mark_read(key)
    }

    /// Streams that were refused or failed.
    pub fn failed_streams(&self) -> Vec<String> {
        lock(&self.shared).failed.clone()
    }

    /// Wait until the feed has processed another emission. Returns false
    /// once the feed has stopped.
    pub async fn changed(&mut self) -> bool {
        self.version.changed().await.is_ok()
    }

    pub fn is_active(&self) -> bool {
        self.gate.is_open()
    }

    /// Tear the feed down. Releases every source subscription exactly once;
    /// no alert fires afterwards. The buffered events stay readable.
    pub fn unsubscribe(&mut self) -> bool {
        if !self.gate.close() {
            return false;
        }
        self.cancel.cancel();
        let released = self
            .releases
            .drain(..)
            .map(|mut handle| handle.release())
            .filter(|released| *released)
            .count();
        info!(subscription_id = %self.id, released, "Notification subscription closed");
        true
    }
}

impl Drop for NotificationHandle {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(id: &str, kind: &str) -> NotificationEvent {
        NotificationEvent::new(id, kind, Priority::Medium)
    }

    #[test]
    fn test_duplicate_key_ingested_once() {
        let mut feed = NotificationFeed::new(10);
        assert!(feed.ingest(event("r1", "stolen_report")).is_inserted());
        assert_eq!(feed.ingest(event("r1", "stolen_report")), Ingested::Duplicate);
        assert_eq!(feed.len(), 1);
        assert_eq!(feed.unread_count(), 1);
    }

    #[test]
    fn test_same_id_different_kind_is_distinct() {
        let mut feed = NotificationFeed::new(10);
        feed.ingest(event("r1", "stolen_report"));
        feed.ingest(event("r1", "recovered"));
        assert_eq!(feed.len(), 2);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut feed = NotificationFeed::new(3);
        for i in 0..4 {
            feed.ingest(event(&format!("r{i}"), "k"));
        }
        assert_eq!(feed.len(), 3);
        let ids: Vec<String> = feed.snapshot().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["r3", "r2", "r1"]);
        assert!(!feed.contains(&event("r0", "k").dedup_key()));
    }

    #[test]
    fn test_evicted_key_can_be_ingested_again() {
        let mut feed = NotificationFeed::new(1);
        feed.ingest(event("a", "k"));
        match feed.ingest(event("b", "k")) {
            Ingested::Inserted { evicted: Some(old) } => assert_eq!(old.id, "a"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(feed.ingest(event("a", "k")).is_inserted());
    }

    #[test]
    fn test_mark_all_read_idempotent() {
        let mut feed = NotificationFeed::new(5);
        feed.ingest(event("a", "k"));
        feed.ingest(event("b", "k"));
        assert_eq!(feed.mark_all_read(), 2);
        assert_eq!(feed.unread_count(), 0);
        assert_eq!(feed.mark_all_read(), 0);
        assert_eq!(feed.unread_count(), 0);
    }

    #[test]
    fn test_mark_read_single() {
        let mut feed = NotificationFeed::new(5);
        feed.ingest(event("a", "k"));
        feed.ingest(event("b", "k"));
        let key = event("a", "k").dedup_key();
        assert!(feed.mark_read(&key));
        assert!(!feed.mark_read(&key));
        assert_eq!(feed.unread_count(), 1);
        assert!(!feed.mark_read(&event("zzz", "k").dedup_key()));
    }

    #[test]
    fn test_read_survives_duplicate_redelivery() {
        let mut feed = NotificationFeed::new(5);
        feed.ingest(event("a", "k"));
        feed.mark_all_read();
        feed.ingest(event("a", "k"));
        assert_eq!(feed.unread_count(), 0);
    }

    #[test]
    fn test_zero_capacity_raised() {
        assert_eq!(NotificationFeed::new(0).capacity(), 1);
    }

    #[test]
    fn test_priority_by_field() {
        let rule = PriorityRule::by_field(
            "severity",
            vec![json!("critical")],
            vec![json!("elevated"), json!(2)],
            Priority::Low,
        );
        let rec = |v: Value| Record::from_json(json!({"id": "x", "severity": v})).unwrap();
        assert_eq!(rule.resolve(&rec(json!("critical"))), Priority::High);
        assert_eq!(rule.resolve(&rec(json!(2))), Priority::Medium);
        assert_eq!(rule.resolve(&rec(json!("meh"))), Priority::Low);
        let bare = Record::from_json(json!({"id": "y"})).unwrap();
        assert_eq!(rule.resolve(&bare), Priority::Low);
    }

    #[test]
    fn test_spec_builds_event() {
        let spec = EventSourceSpec::new(StreamDescriptor::new("reports", "reports"), "stolen_report")
            .with_priority(PriorityRule::fixed(Priority::High))
            .with_timestamp_field("createdAt")
            .with_payload_fields(&["plate", "owner.name"]);
        let record = Record::from_json(json!({
            "id": "r1",
            "plate": "ABC-123",
            "color": "red",
            "owner": {"name": "Dana"},
            "createdAt": "2026-03-15T10:00:00Z",
        }))
        .unwrap();
        let event = spec.to_event(&record);
        assert_eq!(event.id, "r1");
        assert_eq!(event.kind, "stolen_report");
        assert_eq!(event.priority, Priority::High);
        assert_eq!(event.payload.get("plate"), Some(&json!("ABC-123")));
        assert_eq!(event.payload.get("owner.name"), Some(&json!("Dana")));
        assert!(event.payload.get("color").is_none());
        assert!(event.timestamp.is_some());
        assert!(!event.is_read());
    }

    #[test]
    fn test_alert_ledger_forgets_oldest() {
        let mut ledger = AlertLedger::new(2);
        assert!(ledger.record(event("a", "k").dedup_key()));
        assert!(!ledger.record(event("a", "k").dedup_key()));
        assert!(ledger.record(event("b", "k").dedup_key()));
        assert!(ledger.record(event("c", "k").dedup_key()));
        assert!(ledger.record(event("a", "k").dedup_key()));
        assert!(!ledger.record(event("c", "k").dedup_key()));
    }

    #[test]
    fn test_closure_alert_sink() {
        let hits = std::sync::atomic::AtomicUsize::new(0);
        let sink = |_: &NotificationEvent| {
            hits.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        };
        sink.alert(&event("a", "k"));
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
