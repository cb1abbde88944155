//! Structured logging and secret redaction.
//!
//! Log output is JSON in production and pretty or compact in development.
//! Provider error bodies pass through [`SensitiveFieldRedactor`] before they
//! reach a log line, so API keys and bearer tokens never leak.

use serde::Deserialize;
use std::collections::HashMap;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static REDACTOR: OnceLock<SensitiveFieldRedactor> = OnceLock::new();

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Global log level or filter directive (`info`, `herald_core=debug`)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format
    #[serde(default)]
    pub format: LogFormat,

    /// Per-module log levels
    #[serde(default)]
    pub module_levels: HashMap<String, String>,

    /// Whether to include file/line information
    #[serde(default = "default_include_location")]
    pub include_location: bool,

    /// Redaction configuration
    #[serde(default)]
    pub redaction: RedactionConfig,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            module_levels: HashMap::new(),
            include_location: default_include_location(),
            redaction: RedactionConfig::default(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
    Compact,
}

/// Configuration for sensitive data redaction.
#[derive(Debug, Clone, Deserialize)]
pub struct RedactionConfig {
    #[serde(default = "default_redaction_enabled")]
    pub enabled: bool,

    #[serde(default = "default_redaction_patterns")]
    pub patterns: Vec<RedactionPattern>,

    #[serde(default = "default_redaction_replacement")]
    pub replacement: String,
}

impl Default for RedactionConfig {
    fn default() -> Self {
        Self {
            enabled: default_redaction_enabled(),
            patterns: default_redaction_patterns(),
            replacement: default_redaction_replacement(),
        }
    }
}

/// A pattern for identifying sensitive data to redact.
#[derive(Debug, Clone, Deserialize)]
pub struct RedactionPattern {
    /// Name of this pattern
    pub name: String,

    /// Field names to match (case-insensitive, substring)
    #[serde(default)]
    pub field_names: Vec<String>,

    /// Regex matched against values
    #[serde(default)]
    pub value_pattern: Option<String>,
}

/// Scrubs secrets out of field values before logging.
#[derive(Debug, Clone)]
pub struct SensitiveFieldRedactor {
    field_names: Vec<String>,
    value_patterns: Vec<regex::Regex>,
    replacement: String,
    enabled: bool,
}

impl SensitiveFieldRedactor {
    /// Create a redactor from configuration. Invalid regexes are skipped.
    pub fn new(config: &RedactionConfig) -> Self {
        let field_names = config
            .patterns
            .iter()
            .flat_map(|p| p.field_names.iter().map(|f| f.to_lowercase()))
            .collect();

        let value_patterns = config
            .patterns
            .iter()
            .filter_map(|p| p.value_pattern.as_deref())
            .filter_map(|pat| match regex::Regex::new(pat) {
                Ok(re) => Some(re),
                Err(e) => {
                    tracing::warn!(pattern = %pat, error = %e, "Ignoring invalid redaction pattern");
                    None
                }
            })
            .collect();

        Self {
            field_names,
            value_patterns,
            replacement: config.replacement.clone(),
            enabled: config.enabled,
        }
    }

    /// Check if a field name should be redacted.
    pub fn should_redact_field(&self, field_name: &str) -> bool {
        if !self.enabled {
            return false;
        }
        let lower = field_name.to_lowercase();
        self.field_names.iter().any(|f| lower.contains(f))
    }

    /// Replace every secret-looking substring of `value`.
    pub fn redact_value(&self, value: &str) -> String {
        if !self.enabled {
            return value.to_string();
        }
        self.value_patterns
            .iter()
            .fold(value.to_string(), |acc, re| {
                re.replace_all(&acc, self.replacement.as_str()).into_owned()
            })
    }

    /// Redact a field, checking both its name and its value.
    pub fn redact(&self, field_name: &str, value: &str) -> String {
        if self.should_redact_field(field_name) {
            return self.replacement.clone();
        }
        self.redact_value(value)
    }

    /// The process-wide redactor, installed by [`init_logging`].
    pub fn global() -> &'static SensitiveFieldRedactor {
        REDACTOR.get_or_init(|| SensitiveFieldRedactor::new(&RedactionConfig::default()))
    }
}

/// Shorthand for `SensitiveFieldRedactor::global().redact_value(value)`.
pub fn redact(value: &str) -> String {
    SensitiveFieldRedactor::global().redact_value(value)
}

fn default_log_level() -> String {
    std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string())
}

fn default_include_location() -> bool {
    false
}

fn default_redaction_enabled() -> bool {
    true
}

fn default_redaction_replacement() -> String {
    "[REDACTED]".to_string()
}

fn default_redaction_patterns() -> Vec<RedactionPattern> {
    vec![
        RedactionPattern {
            name: "api_keys".to_string(),
            field_names: vec![
                "api_key".to_string(),
                "apikey".to_string(),
                "x-api-key".to_string(),
            ],
            value_pattern: Some(r"sk-[a-zA-Z0-9_-]{20,}".to_string()),
        },
        RedactionPattern {
            name: "bearer_tokens".to_string(),
            field_names: vec![
                "token".to_string(),
                "bearer".to_string(),
                "authorization".to_string(),
            ],
            value_pattern: Some(r"(?i)bearer\s+[a-zA-Z0-9._~+/=-]+".to_string()),
        },
        RedactionPattern {
            name: "webhooks".to_string(),
            field_names: vec!["webhook_url".to_string(), "secret".to_string()],
            value_pattern: Some(
                r"https://hooks\.slack\.com/services/[A-Za-z0-9/]+".to_string(),
            ),
        },
    ]
}

/// Initialize the tracing subscriber.
///
/// Installs the global redactor first so that anything logged during start-up
/// is already scrubbed.
///
/// # Errors
///
/// Returns an error for an unparsable filter or if a subscriber is already set.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let _ = REDACTOR.set(SensitiveFieldRedactor::new(&config.redaction));

    let mut filter = EnvFilter::try_new(&config.level)?;
    for (module, level) in &config.module_levels {
        filter = filter.add_directive(format!("{}={}", module, level).parse()?);
    }

    let registry = tracing_subscriber::registry().with(filter);

    match config.format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_file(config.include_location)
                    .with_line_number(config.include_location),
            )
            .try_init()?,
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .pretty()
                    .with_file(config.include_location)
                    .with_line_number(config.include_location),
            )
            .try_init()?,
        LogFormat::Compact => registry
            .with(
                fmt::layer()
                    .compact()
                    .with_file(config.include_location)
                    .with_line_number(config.include_location),
            )
            .try_init()?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_name_redaction() {
        let redactor = SensitiveFieldRedactor::new(&RedactionConfig::default());

        assert!(redactor.should_redact_field("api_key"));
        assert!(redactor.should_redact_field("API_KEY"));
        assert!(redactor.should_redact_field("bearer_token"));
        assert!(!redactor.should_redact_field("post_id"));
        assert_eq!(redactor.redact("Authorization", "anything"), "[REDACTED]");
    }

    #[test]
    fn test_value_redaction() {
        let redactor = SensitiveFieldRedactor::new(&RedactionConfig::default());

        let body = "invalid key sk-abcdefghijklmnopqrstuvwxyz0123 supplied";
        assert_eq!(
            redactor.redact_value(body),
            "invalid key [REDACTED] supplied"
        );

        let header = "got Bearer AAAAabc.def-ghi back";
        assert_eq!(redactor.redact_value(header), "got [REDACTED] back");

        assert_eq!(redactor.redact_value("nothing secret"), "nothing secret");
    }

    #[test]
    fn test_disabled_redactor_passes_through() {
        let config = RedactionConfig {
            enabled: false,
            ..Default::default()
        };
        let redactor = SensitiveFieldRedactor::new(&config);
        assert!(!redactor.should_redact_field("api_key"));
        assert_eq!(
            redactor.redact_value("sk-abcdefghijklmnopqrstuvwxyz"),
            "sk-abcdefghijklmnopqrstuvwxyz"
        );
    }

    #[test]
    fn test_log_format_deserialize() {
        let format: LogFormat = serde_json::from_str("\"compact\"").unwrap();
        assert_eq!(format, LogFormat::Compact);
    }
}
