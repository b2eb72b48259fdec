// Telemetry module for structured logging and metrics
//
// Metrics:
// - job_runs_total{trigger,outcome}: counter of finished job runs
// - job_duration_seconds{trigger}: histogram of run durations
// - dependency_cache_total{result}: counter of cache hits and misses

use crate::models::{CacheStatus, JobRun};
use anyhow::Result;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Initialize structured logging
///
/// `RUST_LOG` takes precedence over the configured level. JSON output is
/// meant for the scheduler daemon, plain output for interactive dispatch.
pub fn init_logging(log_level: &str, json: bool) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| anyhow::anyhow!("Failed to create env filter: {}", e))?;

    let layer = if json {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_target(true)
            .with_thread_ids(true)
            .with_filter(env_filter)
            .boxed()
    } else {
        fmt::layer().with_target(false).with_filter(env_filter).boxed()
    };

    tracing_subscriber::registry()
        .with(layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;

    tracing::info!(log_level = log_level, json = json, "Structured logging initialized");

    Ok(())
}

/// Initialize the Prometheus metrics exporter and describe all metrics
#[tracing::instrument]
pub fn init_metrics(metrics_port: u16) -> Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", metrics_port)
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid metrics port: {}", e))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    describe_counter!("job_runs_total", "Total number of finished job runs");
    describe_histogram!("job_duration_seconds", "Duration of job runs in seconds");
    describe_counter!(
        "dependency_cache_total",
        "Dependency cache lookups by result"
    );

    tracing::info!(
        metrics_port = metrics_port,
        metrics_endpoint = format!("http://0.0.0.0:{}/metrics", metrics_port),
        "Prometheus metrics exporter initialized"
    );

    Ok(())
}

/// Record a finished job run
#[inline]
pub fn record_run(run: &JobRun) {
    let outcome = if run.is_success() { "success" } else { "failure" };
    counter!(
        "job_runs_total",
        "trigger" => run.trigger.label(),
        "outcome" => outcome
    )
    .increment(1);
    histogram!("job_duration_seconds", "trigger" => run.trigger.label())
        .record(run.duration_seconds());
}

/// Record a dependency cache lookup
#[inline]
pub fn record_cache_lookup(status: CacheStatus) {
    counter!("dependency_cache_total", "result" => status.to_string()).increment(1);
}
