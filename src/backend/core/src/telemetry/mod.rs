//! Telemetry: structured logging and Prometheus metrics.
//!
//! - **Logging**: JSON/pretty/compact output with secret redaction
//! - **Metrics**: job lifecycle and breaker transition counters rendered at `/metrics`

pub mod logging;
pub mod metrics;

pub use logging::{
    init_logging, redact, LogFormat, LoggingConfig, RedactionConfig, RedactionPattern,
    SensitiveFieldRedactor,
};
pub use metrics::{
    init_metrics, BreakerGaugeState, BreakerMetrics, HttpMetrics, JobMetrics, MetricsConfig,
    MetricsRegistry, OperationTimer,
};

/// Initialize logging, then metrics.
///
/// Should be called once at process start-up.
///
/// # Errors
///
/// Returns an error if either component fails to initialize.
pub fn init_telemetry(
    logging: &LoggingConfig,
    metrics: &MetricsConfig,
) -> anyhow::Result<&'static MetricsRegistry> {
    init_logging(logging)?;
    let registry = init_metrics(metrics, env!("CARGO_PKG_NAME"))?;

    ::tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        metrics_enabled = registry.is_enabled(),
        "Telemetry initialized"
    );
    Ok(registry)
}
