//! Tracing/logging initialization.
//!
//! Engine and retry code only emit `tracing` events; installing a subscriber
//! is left to the embedding process.

use std::str::FromStr;

use tracing_subscriber::EnvFilter;

/// Selects the output format (`json` or `pretty`).
pub const ENV_LOG_FORMAT: &str = "BULKDML_LOG_FORMAT";

/// Output format of the installed subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" | "text" => Ok(LogFormat::Pretty),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracingConfig {
    pub format: LogFormat,
    /// Filter used when `RUST_LOG` is unset or invalid.
    pub default_filter: String,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Json,
            default_filter: "info".to_string(),
        }
    }
}

impl TracingConfig {
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_default_filter(mut self, filter: impl Into<String>) -> Self {
        self.default_filter = filter.into();
        self
    }

    /// Defaults overridden by `BULKDML_LOG_FORMAT`; unknown values keep JSON.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let format = lookup(ENV_LOG_FORMAT)
            .and_then(|raw| raw.parse().ok())
            .unwrap_or_default();
        Self::default().with_format(format)
    }
}

/// Initialize tracing/logging for the process with defaults.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init() {
    init_with(TracingConfig::from_env());
}

/// Initialize tracing/logging with an explicit config.
///
/// Returns `false` if a global subscriber was already installed.
pub fn init_with(config: TracingConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_filter));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::SystemTime);

    match config.format {
        // JSON logs + timestamps, configurable via RUST_LOG.
        LogFormat::Json => builder.json().with_target(false).try_init().is_ok(),
        LogFormat::Pretty => builder.with_target(true).try_init().is_ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_format_parses_case_insensitively() {
        assert_eq!("JSON".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!(" pretty ".parse::<LogFormat>(), Ok(LogFormat::Pretty));
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn config_reads_format_from_lookup() {
        let config = TracingConfig::from_lookup(|key| {
            (key == ENV_LOG_FORMAT).then(|| "pretty".to_string())
        });
        assert_eq!(config.format, LogFormat::Pretty);
        assert_eq!(config.default_filter, "info");

        let fallback = TracingConfig::from_lookup(|_| Some("yaml".to_string()));
        assert_eq!(fallback.format, LogFormat::Json);
    }

    #[test]
    fn repeated_init_is_a_no_op() {
        init();
        assert!(!init_with(TracingConfig::default().with_format(LogFormat::Pretty)));
    }
}
