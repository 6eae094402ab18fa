//! Retry job model and backoff.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bulkdml_core::{OperationDescriptor, RetryJobId};

/// Retry job status.
///
/// `Pending → Running → {Completed, Failed}`. A job never returns to
/// `Pending`; a reschedule creates a successor row instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryJobStatus {
    /// Persisted and waiting for its scheduled invocation
    Pending,
    /// Claimed by a runner
    Running,
    /// Rerun left no failures
    Completed,
    /// Exhausted, corrupt, or superseded by a successor job
    Failed,
}

impl RetryJobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RetryJobStatus::Pending => "pending",
            RetryJobStatus::Running => "running",
            RetryJobStatus::Completed => "completed",
            RetryJobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RetryJobStatus::Completed | RetryJobStatus::Failed)
    }
}

impl std::fmt::Display for RetryJobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RetryJobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RetryJobStatus::Pending),
            "running" => Ok(RetryJobStatus::Running),
            "completed" => Ok(RetryJobStatus::Completed),
            "failed" => Ok(RetryJobStatus::Failed),
            other => Err(format!("unknown retry job status: {other}")),
        }
    }
}

/// Exponential backoff with a cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backoff {
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Backoff {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
        }
    }

    /// Delay before attempt `attempt` (1-indexed): `base * 2^(attempt - 1)`,
    /// capped at `max_delay`.
    ///
    /// The successor of a job at attempt `a` runs at attempt `a + 1`, so its
    /// delay is `base * 2^a`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_ms = self.base_delay.as_millis();
        let max_ms = self.max_delay.as_millis();
        let delay_ms = 1u128
            .checked_shl(attempt - 1)
            .and_then(|factor| base_ms.checked_mul(factor))
            .map_or(max_ms, |ms| ms.min(max_ms));

        Duration::from_millis(u64::try_from(delay_ms).unwrap_or(u64::MAX))
    }
}

/// A persisted failed sub-batch awaiting (or done with) its deferred rerun.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryJob {
    pub id: RetryJobId,
    pub descriptor: OperationDescriptor,
    /// Concrete record type used to rehydrate `serialized_records`.
    pub entity_type: String,
    pub serialized_records: String,
    pub record_count: usize,
    /// Further reschedules allowed after this job's rerun.
    pub retries_left: u32,
    /// 1 for the first retry of a batch.
    pub attempt: u32,
    /// Delay of attempt 1; later attempts back off from it.
    pub base_delay_ms: u64,
    pub status: RetryJobStatus,
    pub error_message: Option<String>,
    /// Operator diagnostics (run log tail, failing keys).
    pub error_detail: Option<String>,
    pub predecessor_id: Option<RetryJobId>,
    pub successor_id: Option<RetryJobId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub scheduled_for: DateTime<Utc>,
}

impl RetryJob {
    /// New pending job for attempt 1, due now.
    pub fn new(
        descriptor: OperationDescriptor,
        serialized_records: String,
        record_count: usize,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: RetryJobId::new(),
            entity_type: descriptor.entity_type().to_string(),
            descriptor,
            serialized_records,
            record_count,
            retries_left: 0,
            attempt: 1,
            base_delay_ms: 0,
            status: RetryJobStatus::Pending,
            error_message: None,
            error_detail: None,
            predecessor_id: None,
            successor_id: None,
            created_at: now,
            updated_at: now,
            scheduled_for: now,
        }
    }

    pub fn with_budget(mut self, retries_left: u32, attempt: u32) -> Self {
        self.retries_left = retries_left;
        self.attempt = attempt.max(1);
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay_ms = u64::try_from(base_delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_predecessor(mut self, predecessor: RetryJobId) -> Self {
        self.predecessor_id = Some(predecessor);
        self
    }

    /// Schedule the job with a delay from its creation time.
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.scheduled_for = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|d| self.created_at.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Terminal transition recorded by the runner for a `Running` job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobFinish {
    /// Rerun left no failures.
    Completed,
    /// Rerun still failed and a successor job carries the remainder.
    Superseded {
        successor: RetryJobId,
        error_message: String,
    },
    /// Rerun still failed with no budget left, or the payload was corrupt.
    Failed {
        error_message: String,
        error_detail: Option<String>,
    },
}

impl JobFinish {
    pub fn status(&self) -> RetryJobStatus {
        match self {
            JobFinish::Completed => RetryJobStatus::Completed,
            JobFinish::Superseded { .. } | JobFinish::Failed { .. } => RetryJobStatus::Failed,
        }
    }

    /// Apply this transition to `job`.
    pub(crate) fn apply(self, job: &mut RetryJob) {
        job.status = self.status();
        job.updated_at = Utc::now();
        match self {
            JobFinish::Completed => {}
            JobFinish::Superseded {
                successor,
                error_message,
            } => {
                job.successor_id = Some(successor);
                job.error_message = Some(error_message);
            }
            JobFinish::Failed {
                error_message,
                error_detail,
            } => {
                job.error_message = Some(error_message);
                job.error_detail = error_detail;
            }
        }
    }
}
