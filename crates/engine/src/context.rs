//! Per-run state: immutable run metadata plus a bounded execution log.

use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

use bulkdml_core::{OperationDescriptor, OperationKind};

/// Default bound on the execution log, in characters.
pub const DEFAULT_LOG_MAX_CHARS: usize = 30_000;

/// Prepended once the oldest entries have been dropped.
pub const TRUNCATION_MARKER: &str = "[... earlier log entries truncated ...]\n";

/// Smallest accepted log bound; `ProcessorConfig::validate` rejects less.
pub const MIN_LOG_MAX_CHARS: usize = 256;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

/// Facts about a run fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunMetadata {
    run_id: Uuid,
    operation: OperationKind,
    entity_type: String,
    started_at: DateTime<Utc>,
}

impl RunMetadata {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn operation(&self) -> OperationKind {
        self.operation
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}

/// Append-only text log capped at `max_chars` characters.
///
/// When an append would exceed the cap the oldest content is dropped (at an
/// entry boundary where possible) and [`TRUNCATION_MARKER`] is shown once at
/// the head of the rendered log.
#[derive(Debug, Clone)]
pub struct ExecutionLog {
    max_chars: usize,
    buf: String,
    chars: usize,
    truncated: bool,
}

impl ExecutionLog {
    /// `max_chars` below [`MIN_LOG_MAX_CHARS`] is raised to it.
    pub fn new(max_chars: usize) -> Self {
        Self {
            max_chars: max_chars.max(MIN_LOG_MAX_CHARS),
            buf: String::new(),
            chars: 0,
            truncated: false,
        }
    }

    /// Append a timestamped entry. Blank messages are ignored.
    pub fn append(&mut self, level: LogLevel, message: &str) {
        let message = message.trim_end();
        if message.trim().is_empty() {
            return;
        }

        let entry = format!(
            "{} [{}] {}\n",
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            level.as_str(),
            message
        );
        self.chars += entry.chars().count();
        self.buf.push_str(&entry);

        if self.rendered_chars() > self.max_chars {
            self.drop_oldest();
        }
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty() && !self.truncated
    }

    /// Character count of [`render`](Self::render).
    pub fn rendered_chars(&self) -> usize {
        if self.truncated {
            self.chars + TRUNCATION_MARKER.chars().count()
        } else {
            self.chars
        }
    }

    pub fn render(&self) -> String {
        if self.truncated {
            let mut out = String::with_capacity(TRUNCATION_MARKER.len() + self.buf.len());
            out.push_str(TRUNCATION_MARKER);
            out.push_str(&self.buf);
            out
        } else {
            self.buf.clone()
        }
    }

    fn drop_oldest(&mut self) {
        self.truncated = true;
        let budget = self
            .max_chars
            .saturating_sub(TRUNCATION_MARKER.chars().count());
        if self.chars <= budget {
            return;
        }

        let excess = self.chars - budget;
        let mut cut = self
            .buf
            .char_indices()
            .nth(excess)
            .map(|(i, _)| i)
            .unwrap_or(self.buf.len());

        // Prefer starting on a whole entry, unless that would leave nothing.
        if cut > 0 && self.buf.as_bytes()[cut - 1] != b'\n' {
            if let Some(nl) = self.buf[cut..].find('\n') {
                let aligned = cut + nl + 1;
                if aligned < self.buf.len() {
                    cut = aligned;
                }
            }
        }

        self.chars -= self.buf[..cut].chars().count();
        self.buf.drain(..cut);
    }
}

/// Mutable state scoped to one `process` call.
///
/// Hooks receive `&ExecutionContext` and may log through it; the log sits
/// behind a mutex so the context can be shared by reference.
#[derive(Debug)]
pub struct ExecutionContext {
    metadata: RunMetadata,
    log: Mutex<ExecutionLog>,
}

impl ExecutionContext {
    pub fn new(descriptor: &OperationDescriptor, log_max_chars: usize) -> Self {
        Self {
            metadata: RunMetadata {
                run_id: Uuid::now_v7(),
                operation: descriptor.kind(),
                entity_type: descriptor.entity_type().to_string(),
                started_at: Utc::now(),
            },
            log: Mutex::new(ExecutionLog::new(log_max_chars)),
        }
    }

    pub fn metadata(&self) -> &RunMetadata {
        &self.metadata
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Info, message.as_ref());
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Warn, message.as_ref());
    }

    pub fn error(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Error, message.as_ref());
    }

    /// Append to the run log and mirror the entry to `tracing`.
    pub fn log(&self, level: LogLevel, message: &str) {
        if message.trim().is_empty() {
            return;
        }

        let run_id = self.metadata.run_id;
        let entity_type = self.metadata.entity_type.as_str();
        match level {
            LogLevel::Info => tracing::info!(%run_id, entity_type, "{message}"),
            LogLevel::Warn => tracing::warn!(%run_id, entity_type, "{message}"),
            LogLevel::Error => tracing::error!(%run_id, entity_type, "{message}"),
        }

        self.log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .append(level, message);
    }

    pub fn log_snapshot(&self) -> String {
        self.log.lock().unwrap_or_else(|e| e.into_inner()).render()
    }

    pub fn into_log(self) -> String {
        self.log.into_inner().unwrap_or_else(|e| e.into_inner()).render()
    }
}
