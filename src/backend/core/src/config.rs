//! Configuration management.
//!
//! Values are layered: an optional TOML file, then `HERALD__*` environment
//! variables (`HERALD__DATABASE__URL`, `HERALD__WORKER__POLL_INTERVAL=10s`).

use crate::error::{HeraldError, Result};
use crate::telemetry::{LoggingConfig, MetricsConfig};
use serde::Deserialize;
use std::time::Duration;

/// Main application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Dispatcher configuration
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Retry policy for the job queue
    #[serde(default)]
    pub queue: QueueConfig,

    /// One breaker per external dependency
    #[serde(default)]
    pub breakers: BreakersConfig,

    /// External collaborators
    #[serde(default)]
    pub providers: ProvidersConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    #[serde(default = "default_acquire_timeout", with = "humantime_serde")]
    pub acquire_timeout: Duration,

    /// Apply pending migrations at start-up
    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Name used in logs
    #[serde(default = "default_worker_name")]
    pub name: String,

    /// Delay between poll ticks
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,

    /// A processing job untouched for this long is treated as orphaned
    #[serde(default = "default_stuck_threshold", with = "humantime_serde")]
    pub stuck_threshold: Duration,

    /// How long shutdown waits for the current tick before aborting it
    #[serde(default = "default_shutdown_timeout", with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            name: default_worker_name(),
            poll_interval: default_poll_interval(),
            stuck_threshold: default_stuck_threshold(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// First retry delay; doubles on each further attempt
    #[serde(default = "default_base_backoff", with = "humantime_serde")]
    pub base_backoff: Duration,

    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            base_backoff: default_base_backoff(),
            default_max_retries: default_max_retries(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BreakerSettings {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default = "default_reset_timeout", with = "humantime_serde")]
    pub reset_timeout: Duration,

    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            reset_timeout: default_reset_timeout(),
            success_threshold: default_success_threshold(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BreakersConfig {
    #[serde(default)]
    pub generator: BreakerSettings,

    #[serde(default)]
    pub notifier: BreakerSettings,

    #[serde(default)]
    pub publisher: BreakerSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub generator: GeneratorConfig,

    #[serde(default)]
    pub notifier: NotifierConfig,

    #[serde(default)]
    pub publisher: PublisherConfig,
}

/// OpenAI-compatible chat completions endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct GeneratorConfig {
    #[serde(default = "default_generator_url")]
    pub base_url: String,

    pub api_key: Option<String>,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_provider_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            base_url: default_generator_url(),
            api_key: None,
            model: default_model(),
            timeout: default_provider_timeout(),
            system_prompt: default_system_prompt(),
        }
    }
}

/// Slack-style incoming webhook that receives approval requests.
#[derive(Debug, Clone, Deserialize)]
pub struct NotifierConfig {
    pub webhook_url: Option<String>,

    /// Platform label used when a generation request names none
    #[serde(default = "default_platform_label")]
    pub platform_label: String,

    /// Base URL the approve/reject links in the message point at
    #[serde(default = "default_approval_base_url")]
    pub approval_base_url: String,

    #[serde(default = "default_provider_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            platform_label: default_platform_label(),
            approval_base_url: default_approval_base_url(),
            timeout: default_provider_timeout(),
        }
    }
}

/// Twitter v2 compatible publishing endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct PublisherConfig {
    #[serde(default = "default_publisher_url")]
    pub base_url: String,

    pub bearer_token: Option<String>,

    #[serde(default = "default_provider_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            base_url: default_publisher_url(),
            bearer_token: None,
            timeout: default_provider_timeout(),
        }
    }
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_max_connections() -> u32 { 20 }
fn default_min_connections() -> u32 { 2 }
fn default_acquire_timeout() -> Duration { Duration::from_secs(5) }
fn default_true() -> bool { true }
fn default_worker_name() -> String { "herald-worker".to_string() }
fn default_poll_interval() -> Duration { Duration::from_secs(5) }
fn default_stuck_threshold() -> Duration { Duration::from_secs(5 * 60) }
fn default_shutdown_timeout() -> Duration { Duration::from_secs(30) }
fn default_base_backoff() -> Duration { Duration::from_secs(30) }
fn default_max_retries() -> u32 { 3 }
fn default_failure_threshold() -> u32 { 5 }
fn default_reset_timeout() -> Duration { Duration::from_secs(60) }
fn default_success_threshold() -> u32 { 2 }
fn default_generator_url() -> String { "https://api.openai.com/v1".to_string() }
fn default_model() -> String { "gpt-4o-mini".to_string() }
fn default_provider_timeout() -> Duration { Duration::from_secs(30) }
fn default_system_prompt() -> String {
    "You write short, engaging social media posts. Reply with the post text only.".to_string()
}
fn default_platform_label() -> String { "twitter".to_string() }
fn default_approval_base_url() -> String { "http://localhost:8080".to_string() }
fn default_publisher_url() -> String { "https://api.twitter.com".to_string() }

const ENV_PREFIX: &str = "HERALD";

impl Config {
    /// Load configuration from the environment only.
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from a file, with the environment layered on top.
    pub fn from_file(path: &str) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject settings that would stall the dispatcher or disable a breaker.
    pub fn validate(&self) -> Result<()> {
        if self.database.url.trim().is_empty() {
            return Err(HeraldError::configuration("database.url must not be empty"));
        }
        if self.database.max_connections == 0 {
            return Err(HeraldError::configuration(
                "database.max_connections must be at least 1",
            ));
        }
        if self.worker.poll_interval.is_zero() {
            return Err(HeraldError::configuration(
                "worker.poll_interval must be greater than zero",
            ));
        }
        if self.worker.stuck_threshold.is_zero() {
            return Err(HeraldError::configuration(
                "worker.stuck_threshold must be greater than zero",
            ));
        }
        if self.queue.base_backoff.is_zero() {
            return Err(HeraldError::configuration(
                "queue.base_backoff must be greater than zero",
            ));
        }
        if self.queue.base_backoff > crate::jobs::MAX_BACKOFF {
            return Err(HeraldError::configuration(format!(
                "queue.base_backoff must not exceed {} days",
                crate::jobs::MAX_BACKOFF.as_secs() / 86_400
            )));
        }
        if self.queue.default_max_retries == 0 {
            return Err(HeraldError::configuration(
                "queue.default_max_retries must be at least 1",
            ));
        }

        for (name, breaker) in [
            ("generator", &self.breakers.generator),
            ("notifier", &self.breakers.notifier),
            ("publisher", &self.breakers.publisher),
        ] {
            if breaker.failure_threshold == 0 || breaker.success_threshold == 0 {
                return Err(HeraldError::configuration(format!(
                    "breakers.{} thresholds must be at least 1",
                    name
                )));
            }
            if breaker.reset_timeout.is_zero() {
                return Err(HeraldError::configuration(format!(
                    "breakers.{}.reset_timeout must be greater than zero",
                    name
                )));
            }
        }

        Ok(())
    }
}
