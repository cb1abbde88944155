//! Prometheus metrics for the job pipeline and circuit breakers.
//!
//! Call sites go through the small recorder types below ([`JobMetrics`],
//! [`BreakerMetrics`], [`HttpMetrics`]) instead of spelling metric names
//! inline, so every name is declared once and described at start-up.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

static METRICS_REGISTRY: OnceLock<MetricsRegistry> = OnceLock::new();

/// Metrics configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Whether a Prometheus recorder is installed
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,

    /// Histogram buckets for durations (in seconds)
    #[serde(default = "default_duration_buckets")]
    pub duration_buckets: Vec<f64>,

    /// Labels added to every metric
    #[serde(default)]
    pub global_labels: HashMap<String, String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            duration_buckets: default_duration_buckets(),
            global_labels: HashMap::new(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_duration_buckets() -> Vec<f64> {
    vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]
}

/// Holds the Prometheus handle used to render `/metrics`.
pub struct MetricsRegistry {
    prometheus_handle: Option<PrometheusHandle>,
}

impl std::fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRegistry")
            .field("prometheus_handle", &self.prometheus_handle.is_some())
            .finish()
    }
}

impl MetricsRegistry {
    /// Get the global metrics registry.
    ///
    /// Before [`init_metrics`] runs (or when metrics are disabled) this is an
    /// empty registry that renders nothing.
    pub fn global() -> &'static MetricsRegistry {
        METRICS_REGISTRY.get_or_init(|| MetricsRegistry {
            prometheus_handle: None,
        })
    }

    /// Render all metrics in Prometheus text format.
    pub fn render(&self) -> String {
        self.prometheus_handle
            .as_ref()
            .map(|h| h.render())
            .unwrap_or_default()
    }

    pub fn is_enabled(&self) -> bool {
        self.prometheus_handle.is_some()
    }
}

/// Install the Prometheus recorder and publish the global registry.
///
/// # Errors
///
/// Returns an error if the bucket list is empty or a recorder is already
/// installed.
pub fn init_metrics(config: &MetricsConfig, service_name: &str) -> anyhow::Result<&'static MetricsRegistry> {
    if !config.enabled {
        tracing::info!(service_name = %service_name, "Metrics disabled");
        return Ok(MetricsRegistry::global());
    }

    let mut builder = PrometheusBuilder::new();
    for (key, value) in &config.global_labels {
        builder = builder.add_global_label(key, value);
    }
    builder = builder.set_buckets(&config.duration_buckets)?;

    let handle = builder.install_recorder()?;
    register_metric_descriptions();

    if METRICS_REGISTRY
        .set(MetricsRegistry {
            prometheus_handle: Some(handle),
        })
        .is_err()
    {
        anyhow::bail!("metrics registry already initialized");
    }

    tracing::info!(service_name = %service_name, "Metrics initialized");
    Ok(MetricsRegistry::global())
}

fn register_metric_descriptions() {
    describe_counter!("herald_errors_total", "Errors constructed, by code and category");

    describe_counter!("herald_jobs_enqueued_total", "Jobs enqueued, by type");
    describe_counter!("herald_jobs_completed_total", "Jobs completed, by type");
    describe_counter!(
        "herald_jobs_failed_total",
        "Job attempts that failed and were rescheduled, by type"
    );
    describe_counter!("herald_jobs_dead_total", "Jobs dead-lettered, by type");
    describe_counter!(
        "herald_jobs_recovered_total",
        "Stuck processing jobs reset to pending"
    );
    describe_histogram!(
        "herald_job_duration_seconds",
        "Handler execution time in seconds, by type and outcome"
    );

    describe_counter!(
        "herald_breaker_transitions_total",
        "Circuit breaker state transitions, by breaker and target state"
    );
    describe_gauge!(
        "herald_breaker_state",
        "Circuit breaker state (0=closed, 1=half-open, 2=open)"
    );

    describe_counter!("herald_http_requests_total", "HTTP requests, by route and status");
}

// ═══════════════════════════════════════════════════════════════════════════════
// Recorders
// ═══════════════════════════════════════════════════════════════════════════════

/// Job lifecycle counters.
pub struct JobMetrics;

impl JobMetrics {
    pub fn record_enqueued(job_type: &str) {
        counter!("herald_jobs_enqueued_total", "job_type" => job_type.to_string()).increment(1);
    }

    pub fn record_completed(job_type: &str, duration: Duration) {
        counter!("herald_jobs_completed_total", "job_type" => job_type.to_string()).increment(1);
        histogram!(
            "herald_job_duration_seconds",
            "job_type" => job_type.to_string(),
            "outcome" => "completed",
        )
        .record(duration.as_secs_f64());
    }

    pub fn record_failed(job_type: &str, duration: Duration) {
        counter!("herald_jobs_failed_total", "job_type" => job_type.to_string()).increment(1);
        histogram!(
            "herald_job_duration_seconds",
            "job_type" => job_type.to_string(),
            "outcome" => "failed",
        )
        .record(duration.as_secs_f64());
    }

    pub fn record_dead(job_type: &str) {
        counter!("herald_jobs_dead_total", "job_type" => job_type.to_string()).increment(1);
    }

    pub fn record_recovered(count: u64) {
        counter!("herald_jobs_recovered_total").increment(count);
    }
}

/// Breaker state as a gauge value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerGaugeState {
    Closed,
    HalfOpen,
    Open,
}

impl BreakerGaugeState {
    fn as_f64(self) -> f64 {
        match self {
            Self::Closed => 0.0,
            Self::HalfOpen => 1.0,
            Self::Open => 2.0,
        }
    }
}

/// Circuit breaker transition counters.
pub struct BreakerMetrics;

impl BreakerMetrics {
    pub fn record_transition(breaker: &str, to: &'static str, state: BreakerGaugeState) {
        counter!(
            "herald_breaker_transitions_total",
            "breaker" => breaker.to_string(),
            "to" => to,
        )
        .increment(1);
        gauge!("herald_breaker_state", "breaker" => breaker.to_string()).set(state.as_f64());
    }
}

/// HTTP request counter.
pub struct HttpMetrics;

impl HttpMetrics {
    pub fn record(route: &str, status: u16) {
        counter!(
            "herald_http_requests_total",
            "route" => route.to_string(),
            "status" => status.to_string(),
        )
        .increment(1);
    }
}

/// Measures an operation's wall time.
pub struct OperationTimer {
    start: Instant,
}

impl OperationTimer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_config_defaults() {
        let config = MetricsConfig::default();
        assert!(config.enabled);
        assert!(!config.duration_buckets.is_empty());
        assert!(config.global_labels.is_empty());
    }

    #[test]
    fn test_uninitialized_registry_renders_empty() {
        let registry = MetricsRegistry {
            prometheus_handle: None,
        };
        assert!(!registry.is_enabled());
        assert_eq!(registry.render(), "");
    }

    #[test]
    fn test_recorders_without_recorder_installed() {
        JobMetrics::record_enqueued("publish-content");
        JobMetrics::record_completed("publish-content", Duration::from_millis(5));
        BreakerMetrics::record_transition("publisher", "open", BreakerGaugeState::Open);
    }

    #[test]
    fn test_breaker_gauge_values() {
        assert_eq!(BreakerGaugeState::Closed.as_f64(), 0.0);
        assert_eq!(BreakerGaugeState::Open.as_f64(), 2.0);
    }
}
