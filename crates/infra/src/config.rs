//! Configuration for processors and the retry machinery.
//!
//! Defaults suit a store with the usual bulk quotas. `from_env` overrides them
//! from `BULKDML_*` variables; unset variables keep their defaults and
//! malformed ones are reported with the variable name.

use std::time::Duration;

use anyhow::{Context, Result};

use bulkdml_engine::ProcessorConfig;

use crate::jobs::Backoff;

pub const ENV_CHUNK_SIZE: &str = "BULKDML_CHUNK_SIZE";
pub const ENV_MAX_CHUNK_BYTES: &str = "BULKDML_MAX_CHUNK_BYTES";
pub const ENV_LOG_MAX_CHARS: &str = "BULKDML_LOG_MAX_CHARS";
pub const ENV_RETRY_BASE_DELAY_MS: &str = "BULKDML_RETRY_BASE_DELAY_MS";
pub const ENV_RETRY_MAX_DELAY_MS: &str = "BULKDML_RETRY_MAX_DELAY_MS";
pub const ENV_RETRY_MAX_PAYLOAD_BYTES: &str = "BULKDML_RETRY_MAX_PAYLOAD_BYTES";

/// Retry scheduling configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Delay before the first retry when the request does not carry one
    pub base_delay: Duration,
    /// Cap on any single backoff delay
    pub max_delay: Duration,
    /// Largest serialized payload a retry job may carry
    pub max_payload_bytes: usize,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60 * 60),
            max_payload_bytes: 32 * 1024,
        }
    }
}

impl RetryConfig {
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_max_payload_bytes(mut self, max_payload_bytes: usize) -> Self {
        self.max_payload_bytes = max_payload_bytes;
        self
    }

    /// Backoff starting at `base_delay` (or the configured default).
    pub fn backoff(&self, base_delay: Option<Duration>) -> Backoff {
        Backoff::new(base_delay.unwrap_or(self.base_delay), self.max_delay)
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkConfig {
    pub processor: ProcessorConfig,
    pub retry: RetryConfig,
}

impl BulkConfig {
    pub fn with_processor(mut self, processor: ProcessorConfig) -> Self {
        self.processor = processor;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Load from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(chunk_size) = parse::<i64, _>(&lookup, ENV_CHUNK_SIZE)? {
            config.processor.chunk_size = chunk_size;
        }
        if let Some(max_bytes) = parse::<usize, _>(&lookup, ENV_MAX_CHUNK_BYTES)? {
            config.processor.max_chunk_bytes = Some(max_bytes);
        }
        if let Some(max_chars) = parse::<usize, _>(&lookup, ENV_LOG_MAX_CHARS)? {
            config.processor.log_max_chars = max_chars;
        }
        if let Some(ms) = parse::<u64, _>(&lookup, ENV_RETRY_BASE_DELAY_MS)? {
            config.retry.base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = parse::<u64, _>(&lookup, ENV_RETRY_MAX_DELAY_MS)? {
            config.retry.max_delay = Duration::from_millis(ms);
        }
        if let Some(bytes) = parse::<usize, _>(&lookup, ENV_RETRY_MAX_PAYLOAD_BYTES)? {
            config.retry.max_payload_bytes = bytes;
        }

        if config.processor.chunk_size <= 0 {
            anyhow::bail!(
                "{ENV_CHUNK_SIZE} must be positive (got {})",
                config.processor.chunk_size
            );
        }
        config
            .processor
            .validate()
            .with_context(|| format!("invalid value for {ENV_LOG_MAX_CHARS}"))?;
        if config.retry.max_delay < config.retry.base_delay {
            anyhow::bail!(
                "{ENV_RETRY_MAX_DELAY_MS} ({} ms) is below the base delay ({} ms)",
                config.retry.max_delay.as_millis(),
                config.retry.base_delay.as_millis()
            );
        }

        Ok(config)
    }
}

fn parse<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
        _ => Ok(None),
    }
}
