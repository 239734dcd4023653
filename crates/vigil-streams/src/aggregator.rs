//! Multi-stream aggregation with a readiness barrier and debounced recompute.
//!
//! A [`StreamAggregator`] opens one live subscription per
//! [`StreamDescriptor`] and feeds every emission into an
//! [`AggregateState`] owned by a single background task. Nothing is computed
//! until every stream has emitted once; the first computation runs the
//! instant the last stream becomes ready and is delivered as
//! [`AggregateEvent::Ready`]. After that, emissions schedule a debounced
//! recompute delivered as [`AggregateEvent::Updated`].
//!
//! ## Example
//!
//! ```ignore
//! let aggregator = StreamAggregator::with_engine(source, engine, AggregatorConfig::from_env());
//! let mut subscription = aggregator.subscribe(descriptors).await?;
//! while let Some(event) = subscription.recv().await {
//!     println!("{:?}", event);
//! }
//! subscription.unsubscribe();
//! ```

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, BoxStream, SelectAll, StreamExt};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use vigil_core::{
    AggregateState, DataSource, Emission, Error, MetricSet, Predicate, ReleaseHandle, Result,
    ScopeContext, ScopeFilter, SourceSubscription, StreamDescriptor,
};
use vigil_metrics::{MetricDef, MetricsCompute, MetricsEngine, TrendCalculator, TrendSpec};

use crate::config::AggregatorConfig;
use crate::debouncer::{wait_until, Debouncer};
use crate::gate::ActiveGate;

/// Event delivered to the consumer of an [`AggregateSubscription`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AggregateEvent {
    /// First successful computation after the readiness barrier opened.
    Ready { metrics: MetricSet },
    /// A later recompute.
    Updated { metrics: MetricSet },
    /// A stream failed and will never become ready again.
    StreamFailed { stream: String, message: String },
    /// The barrier stayed closed past the init timeout.
    Stuck { pending: Vec<String> },
    /// A compute cycle failed; the last-known-good metrics are unchanged.
    ComputeFailed { message: String },
}

impl AggregateEvent {
    /// Metrics carried by `Ready` and `Updated`.
    pub fn metrics(&self) -> Option<&MetricSet> {
        match self {
            Self::Ready { metrics } | Self::Updated { metrics } => Some(metrics),
            _ => None,
        }
    }

    /// The error this event reports, if it reports one.
    pub fn error(&self) -> Option<Error> {
        match self {
            Self::StreamFailed { stream, message } => Some(Error::source(stream, message.clone())),
            Self::Stuck { pending } => Some(Error::InitializationTimeout {
                pending: pending.clone(),
            }),
            Self::ComputeFailed { message } => Some(Error::Compute(message.clone())),
            Self::Ready { .. } | Self::Updated { .. } => None,
        }
    }
}

/// A previous-period value to fetch once at subscribe time.
#[derive(Debug, Clone, PartialEq)]
pub struct BaselineRequest {
    /// Metric the baseline belongs to.
    pub metric: String,
    pub stream: String,
    pub trend: TrendSpec,
    pub filter: Predicate,
}

impl BaselineRequest {
    /// One request per count metric that carries a trend.
    pub fn from_defs(defs: &[MetricDef]) -> Vec<Self> {
        defs.iter()
            .filter_map(|def| {
                def.trend().map(|trend| Self {
                    metric: def.name.clone(),
                    stream: def.stream.clone(),
                    trend: trend.clone(),
                    filter: def.filter.clone(),
                })
            })
            .collect()
    }
}

/// Sends events and metrics to the handle while the subscription is active.
struct Publisher {
    gate: ActiveGate,
    events: mpsc::UnboundedSender<AggregateEvent>,
    latest: watch::Sender<Option<MetricSet>>,
}

impl Publisher {
    /// Returns false once the subscription has been torn down.
    fn publish(&self, event: AggregateEvent) -> bool {
        self.gate
            .run(|| {
                if let Some(metrics) = event.metrics() {
                    self.latest.send_replace(Some(metrics.clone()));
                }
                self.events.send(event).is_ok()
            })
            .unwrap_or(false)
    }
}

/// Opens aggregate subscriptions against a data source.
pub struct StreamAggregator {
    source: Arc<dyn DataSource>,
    compute: Arc<dyn MetricsCompute>,
    config: AggregatorConfig,
    baselines: Vec<BaselineRequest>,
}

impl StreamAggregator {
    pub fn new(
        source: Arc<dyn DataSource>,
        compute: Arc<dyn MetricsCompute>,
        config: AggregatorConfig,
    ) -> Self {
        Self {
            source,
            compute,
            config,
            baselines: Vec::new(),
        }
    }

    /// Aggregator computing `engine`'s metrics, with baseline requests
    /// derived from its trend definitions.
    pub fn with_engine(
        source: Arc<dyn DataSource>,
        engine: MetricsEngine,
        config: AggregatorConfig,
    ) -> Self {
        let baselines = BaselineRequest::from_defs(engine.defs());
        Self::new(source, Arc::new(engine), config).with_baselines(baselines)
    }

    pub fn with_baselines(mut self, baselines: Vec<BaselineRequest>) -> Self {
        self.baselines = baselines;
        self
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// Subscribe to every descriptor and start the aggregation loop.
    ///
    /// Fails without touching the source if `descriptors` is empty or names
    /// a stream twice. A stream whose subscription is refused is reported as
    /// [`AggregateEvent::StreamFailed`] and never becomes ready.
    pub async fn subscribe(
        &self,
        descriptors: Vec<StreamDescriptor>,
    ) -> Result<AggregateSubscription> {
        if descriptors.is_empty() {
            return Err(Error::InvalidInput(
                "at least one stream descriptor is required".to_string(),
            ));
        }
        let mut state = AggregateState::new(descriptors.iter().map(|d| d.name.clone()))?;
        let id = Uuid::now_v7();
        let started = Instant::now();
        info!(
            subscription_id = %id,
            stream_count = descriptors.len(),
            debounce_ms = self.config.debounce_ms,
            "Aggregate subscription starting"
        );

        if self.config.fetch_baselines {
            self.fetch_baselines(id, &descriptors, &mut state).await;
        }

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (latest_tx, latest_rx) = watch::channel(None);
        let publisher = Arc::new(Publisher {
            gate: ActiveGate::new(),
            events: event_tx,
            latest: latest_tx,
        });

        let mut releases = Vec::with_capacity(descriptors.len());
        let mut inputs = Vec::with_capacity(descriptors.len());
        for (index, descriptor) in descriptors.iter().enumerate() {
            let constraints = descriptor.source_constraints();
            match self.source.subscribe(&descriptor.collection, &constraints).await {
                Ok(SourceSubscription { emissions, handle }) => {
                    debug!(
                        subscription_id = %id,
                        stream = %descriptor.name,
                        collection = %descriptor.collection,
                        constraint_count = constraints.len(),
                        "Stream subscribed"
                    );
                    releases.push(handle);
                    inputs.push(tagged(index, emissions));
                }
                Err(e) => {
                    let message = e.to_string();
                    warn!(
                        subscription_id = %id,
                        stream = %descriptor.name,
                        collection = %descriptor.collection,
                        error = %message,
                        "Stream subscription refused"
                    );
                    state.apply(
                        &descriptor.name,
                        Emission::Failed(message.clone()),
                        &descriptor.residual,
                    )?;
                    publisher.publish(AggregateEvent::StreamFailed {
                        stream: descriptor.name.clone(),
                        message,
                    });
                }
            }
        }

        let cancel = CancellationToken::new();
        let runner = AggregateLoop {
            id,
            started,
            residuals: descriptors.into_iter().map(|d| d.residual).collect(),
            state,
            compute: self.compute.clone(),
            publisher: publisher.clone(),
            debouncer: Debouncer::new(self.config.debounce()),
            init_deadline: Some(started + self.config.init_timeout()),
            delivered_ready: false,
        };
        tokio::spawn(runner.run(stream::select_all(inputs), cancel.clone()));

        Ok(AggregateSubscription {
            id,
            events: event_rx,
            latest: latest_rx,
            publisher,
            releases,
            cancel,
        })
    }

    /// Resolve `context` for every stream, then [`subscribe`](Self::subscribe).
    ///
    /// Each descriptor is paired with the [`ScopeFilter`] describing where
    /// its collection keeps the partition id. Every plan is built before the
    /// source is touched, so a misconfigured scope fails with
    /// [`Error::MisconfiguredScope`] without opening any subscription.
    pub async fn subscribe_scoped(
        &self,
        context: &ScopeContext,
        streams: Vec<(ScopeFilter, StreamDescriptor)>,
    ) -> Result<AggregateSubscription> {
        let descriptors = streams
            .into_iter()
            .map(|(filter, descriptor)| Ok(filter.build(context)?.apply(descriptor)))
            .collect::<Result<Vec<_>>>()?;
        self.subscribe(descriptors).await
    }

    async fn fetch_baselines(
        &self,
        id: Uuid,
        descriptors: &[StreamDescriptor],
        state: &mut AggregateState,
    ) {
        let now = Utc::now();
        for request in &self.baselines {
            let Some(descriptor) = descriptors.iter().find(|d| d.name == request.stream) else {
                debug!(
                    subscription_id = %id,
                    metric = %request.metric,
                    stream = %request.stream,
                    "No stream for baseline request, skipping"
                );
                continue;
            };
            match TrendCalculator::fetch_baseline(
                self.source.as_ref(),
                descriptor,
                &request.trend,
                &request.filter,
                &now,
            )
            .await
            {
                Ok(value) => state.set_baseline(request.metric.clone(), value),
                Err(e) => warn!(
                    subscription_id = %id,
                    metric = %request.metric,
                    error = %e,
                    "Baseline query failed, trend falls back to live records"
                ),
            }
        }
    }
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

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "compute panicked".to_string()
    }
}

/// State owned by the background task of one subscription.
struct AggregateLoop {
    id: Uuid,
    started: Instant,
    residuals: Vec<Predicate>,
    state: AggregateState,
    compute: Arc<dyn MetricsCompute>,
    publisher: Arc<Publisher>,
    debouncer: Debouncer,
    init_deadline: Option<Instant>,
    delivered_ready: bool,
}

impl AggregateLoop {
    async fn run(
        mut self,
        mut inputs: SelectAll<BoxStream<'static, (usize, Emission)>>,
        cancel: CancellationToken,
    ) {
        let mut inputs_open = true;
        loop {
            let recompute_at = self.debouncer.deadline();
            let stuck_at = self.init_deadline;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = inputs.next(), if inputs_open => match next {
                    Some((index, emission)) => self.on_emission(index, emission),
                    None => {
                        inputs_open = false;
                        debug!(subscription_id = %self.id, "All source streams closed");
                    }
                },
                _ = wait_until(recompute_at) => {
                    if let Some(coalesced) = self.debouncer.take_due(Instant::now()) {
                        debug!(subscription_id = %self.id, coalesced, "Debounce window elapsed");
                        self.recompute();
                    }
                }
                _ = wait_until(stuck_at) => self.report_stuck(),
            }
        }
        debug!(subscription_id = %self.id, "Aggregate loop stopped");
    }

    fn on_emission(&mut self, index: usize, emission: Emission) {
        let Some(name) = self.state.names().get(index).cloned() else {
            error!(subscription_id = %self.id, index, "Emission for unknown stream index");
            return;
        };
        let failure = match &emission {
            Emission::Failed(message) => Some(message.clone()),
            _ => None,
        };
        let applied = match self.state.apply(&name, emission, &self.residuals[index]) {
            Ok(applied) => applied,
            Err(e) => {
                error!(
                    subscription_id = %self.id,
                    stream = %name,
                    error = %e,
                    "Failed to apply emission"
                );
                return;
            }
        };

        if applied.failed {
            let message = failure.unwrap_or_default();
            warn!(
                subscription_id = %self.id,
                stream = %name,
                error = %message,
                "Stream failed, marked permanently not ready"
            );
            self.publisher.publish(AggregateEvent::StreamFailed {
                stream: name,
                message,
            });
            return;
        }
        if !applied.changed {
            return;
        }

        if applied.barrier_opened {
            self.init_deadline = None;
            info!(
                subscription_id = %self.id,
                ready_count = self.state.ready_count(),
                duration_ms = self.started.elapsed().as_millis() as u64,
                "Readiness barrier open"
            );
            self.recompute();
        } else if self.state.is_ready() {
            self.debouncer.trigger();
            debug!(
                subscription_id = %self.id,
                stream = %name,
                debounce_ms = self.debouncer.window().as_millis() as u64,
                "Recompute scheduled"
            );
        } else if applied.became_ready {
            debug!(
                subscription_id = %self.id,
                stream = %name,
                ready_count = self.state.ready_count(),
                total_streams = self.state.total_streams(),
                "Stream ready, barrier still closed"
            );
        }
    }

    fn recompute(&mut self) {
        if !self.publisher.gate.is_open() {
            return;
        }
        let started = Instant::now();
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            self.compute.compute(&self.state, Utc::now())
        }));

        match outcome {
            Ok(Ok(metrics)) => {
                let metric_count = metrics.len();
                let event = if self.delivered_ready {
                    AggregateEvent::Updated { metrics }
                } else {
                    AggregateEvent::Ready { metrics }
                };
                if self.publisher.publish(event) {
                    self.delivered_ready = true;
                    debug!(
                        subscription_id = %self.id,
                        metric_count,
                        duration_ms = started.elapsed().as_millis() as u64,
                        "Metrics published"
                    );
                }
            }
            Ok(Err(e)) => {
                warn!(
                    subscription_id = %self.id,
                    error = %e,
                    "Metrics compute failed, keeping last-known-good"
                );
                self.publisher.publish(AggregateEvent::ComputeFailed {
                    message: e.to_string(),
                });
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(subscription_id = %self.id, panic = %message, "Metrics compute panicked");
                self.publisher
                    .publish(AggregateEvent::ComputeFailed { message });
            }
        }
    }

    fn report_stuck(&mut self) {
        self.init_deadline = None;
        let pending = self.state.pending();
        warn!(
            subscription_id = %self.id,
            ready_count = self.state.ready_count(),
            total_streams = self.state.total_streams(),
            pending = ?pending,
            "Initialization stuck, streams never emitted"
        );
        trace!(subscription_id = %self.id, "Still waiting on readiness barrier");
        self.publisher.publish(AggregateEvent::Stuck { pending });
    }
}

/// Handle to a running aggregate subscription.
///
/// Dropping the handle unsubscribes.
pub struct AggregateSubscription {
    id: Uuid,
    events: mpsc::UnboundedReceiver<AggregateEvent>,
    latest: watch::Receiver<Option<MetricSet>>,
    publisher: Arc<Publisher>,
    releases: Vec<ReleaseHandle>,
    cancel: CancellationToken,
}

impl AggregateSubscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Next event. Returns `None` after [`unsubscribe`](Self::unsubscribe).
    pub async fn recv(&mut self) -> Option<AggregateEvent> {
        self.events.recv().await
    }

    /// Next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<AggregateEvent> {
        self.events.try_recv().ok()
    }

    /// Last-known-good metrics.
    pub fn latest(&self) -> Option<MetricSet> {
        self.latest.borrow().clone()
    }

    /// Receiver notified on every successful computation.
    pub fn watch(&self) -> watch::Receiver<Option<MetricSet>> {
        self.latest.clone()
    }

    pub fn is_active(&self) -> bool {
        self.publisher.gate.is_open()
    }

    /// Tear the subscription down.
    ///
    /// Releases every source subscription exactly once, stops the loop and
    /// discards queued events. No event is delivered afterwards, including
    /// a recompute already scheduled. Returns false if already torn down.
    pub fn unsubscribe(&mut self) -> bool {
        if !self.publisher.gate.close() {
            return false;
        }
        self.cancel.cancel();
        let released = self
            .releases
            .drain(..)
            .map(|mut handle| handle.release())
            .filter(|released| *released)
            .count();
        self.events.close();
        while self.events.try_recv().is_ok() {}
        info!(subscription_id = %self.id, released, "Aggregate subscription closed");
        true
    }
}

impl Drop for AggregateSubscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for AggregateSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregateSubscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .field("streams", &self.releases.len())
            .finish()
    }
}
