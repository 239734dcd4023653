//! vigil-console: replay a JSON fixture through the aggregation engine and
//! print every metric snapshot as a JSON line on stdout.
//!
//! ```text
//! vigil-console fixtures/dashboard.json [--follow]
//! ```

mod fixture;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vigil_core::{MemorySource, NotificationEvent};
use vigil_metrics::MetricsEngine;
use vigil_streams::{
    AggregateEvent, AggregatorConfig, NotificationAggregator, NotificationConfig,
    StreamAggregator,
};

use crate::fixture::Fixture;

/// Fixture path used when none is given on the command line.
const ENV_FIXTURE: &str = "VIGIL_FIXTURE";

const DEFAULT_LOG_FILTER: &str =
    "vigil_core=info,vigil_metrics=info,vigil_streams=info,vigil_console=info";

/// Initialize tracing with configurable output.
///
/// Environment variables:
///   LOG_FORMAT  - "json" or "text" (default: "text")
///   LOG_FILE    - path to log file (optional, enables file logging)
///   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
///   RUST_LOG    - standard env filter (default: `DEFAULT_LOG_FILTER`)
///
/// Console output goes to stderr; stdout carries the JSON snapshots.
fn init_logging() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());

    let registry = tracing_subscriber::registry().with(env_filter);

    let guard = if let Some(ref path) = log_file {
        let file_dir = std::path::Path::new(path)
            .parent()
            .unwrap_or(std::path::Path::new("."));
        let file_name = std::path::Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("vigil-console.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false));
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(std::io::stderr),
                )
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stderr)"),
        "Logging initialized"
    );
    guard
}

fn print_event(event: &AggregateEvent) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string(event)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();
    let _file_guard = init_logging();

    let mut follow = false;
    let mut fixture_path = None;
    for arg in std::env::args().skip(1) {
        if arg == "--follow" {
            follow = true;
        } else {
            fixture_path = Some(arg);
        }
    }
    let fixture_path = fixture_path
        .or_else(|| std::env::var(ENV_FIXTURE).ok())
        .context("usage: vigil-console <fixture.json> [--follow] (or set VIGIL_FIXTURE)")?;

    let fixture = Fixture::load(&fixture_path)?;
    let source = MemorySource::new();
    fixture.seed(&source);
    info!(
        fixture = %fixture_path,
        collections = fixture.collections.len(),
        streams = fixture.streams.len(),
        metrics = fixture.metrics.len(),
        "Fixture loaded"
    );

    let event_sources = fixture.event_sources();
    let config = AggregatorConfig::from_env();
    let settle = config.debounce() * 2 + Duration::from_millis(100);
    let aggregator = StreamAggregator::with_engine(
        Arc::new(source.clone()),
        MetricsEngine::new(fixture.metrics.clone()),
        config,
    );
    let mut metrics = aggregator
        .subscribe_scoped(&fixture.scope, fixture.scoped_streams())
        .await
        .context("subscribing to streams")?;

    let mut notifications = if event_sources.is_empty() {
        None
    } else {
        let feed = NotificationAggregator::new(
            Arc::new(source.clone()),
            NotificationConfig::from_env(),
        )
        .with_alert_sink(Arc::new(|event: &NotificationEvent| {
            warn!(
                id = %event.id,
                kind = %event.kind,
                priority = %event.priority,
                "High-priority notification"
            );
        }));
        Some(
            feed.subscribe_scoped(&fixture.scope, event_sources)
                .await
                .context("subscribing to event streams")?,
        )
    };

    let updates = fixture.updates.clone();
    let feeder_source = source.clone();
    let mut feeder = tokio::spawn(async move {
        for update in updates {
            tokio::time::sleep(Duration::from_millis(update.after_ms)).await;
            update.apply(&feeder_source);
        }
    });

    let mut updates_done = false;
    loop {
        let idle = tokio::time::sleep(settle);
        tokio::select! {
            event = metrics.recv() => match event {
                Some(event) => print_event(&event)?,
                None => break,
            },
            result = &mut feeder, if !updates_done => {
                updates_done = true;
                if let Err(e) = result {
                    warn!(error = %e, "Update replay task failed");
                }
            }
            _ = idle, if updates_done && !follow => break,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    metrics.unsubscribe();
    if let Some(feed) = notifications.as_mut() {
        let summary = json!({
            "notifications": feed.events(),
            "unread": feed.unread_count(),
        });
        println!("{}", serde_json::to_string(&summary)?);
        feed.unsubscribe();
    }
    info!("Console session finished");
    Ok(())
}
