//! The deferred unit of work: rerun one retry job and settle its state.

use std::sync::Arc;

use tracing::{debug, info, warn};

use bulkdml_core::{BulkError, BulkResult, RetryJobId};

use super::handler::{RetryHandler, SerializedRetry};
use super::registry::ReplayOutcome;
use super::runtime::RetryRuntime;
use super::types::{JobFinish, RetryJob};

/// Longest run log tail kept in a job's error detail.
const DETAIL_LOG_CHARS: usize = 4_000;

/// How a [`ScheduledRetryRunner::run`] call settled its job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Job was not pending (already claimed, finished, or deleted).
    Skipped,
    /// Rerun left no failures.
    Completed,
    /// Rerun still failed; a successor job carries the remainder.
    Rescheduled { successor: RetryJobId },
    /// Rerun still failed and no budget was left.
    Exhausted,
    /// Payload could not be rehydrated; not retried.
    Corrupt,
    /// Rerun aborted with a structural or validation error; not retried.
    Aborted,
}

/// Runs retry jobs.
///
/// State machine per job:
///
/// ```text
/// Pending ──claim──> Running ──┬── no failures ────────────> Completed
///                              ├── failures, budget > 0 ───> Failed (successor_id set)
///                              ├── failures, budget == 0 ──> Failed (exhausted)
///                              └── corrupt / aborted ──────> Failed
/// ```
///
/// The claim is conditional, so a duplicate or overlapping invocation for the
/// same job returns [`RunOutcome::Skipped`] without side effects.
#[derive(Debug, Clone)]
pub struct ScheduledRetryRunner {
    runtime: Arc<RetryRuntime>,
}

impl ScheduledRetryRunner {
    pub fn new(runtime: Arc<RetryRuntime>) -> Self {
        Self { runtime }
    }

    pub fn run(&self, job_id: RetryJobId) -> BulkResult<RunOutcome> {
        let store = self.runtime.store();
        let Some(job) = store.try_claim(job_id)? else {
            debug!(%job_id, "retry job is not pending; skipping");
            return Ok(RunOutcome::Skipped);
        };

        info!(
            %job_id,
            entity_type = %job.entity_type,
            attempt = job.attempt,
            retries_left = job.retries_left,
            record_count = job.record_count,
            "retry job started"
        );

        let Some(target) = self.runtime.registry().get(&job.entity_type) else {
            let message = format!(
                "deserialization failed: no record type registered for '{}'",
                job.entity_type
            );
            self.fail(&job, message, None)?;
            return Ok(RunOutcome::Corrupt);
        };

        match target.replay(&job) {
            Ok(outcome) if outcome.is_complete() => {
                store.finish(job.id, JobFinish::Completed)?;
                info!(%job_id, success_count = outcome.success_count, "retry job completed");
                Ok(RunOutcome::Completed)
            }
            Ok(outcome) if job.retries_left > 0 => self.reschedule(&job, outcome),
            Ok(outcome) => {
                let message = format!(
                    "retries exhausted after attempt {}: {} record(s) still failing; first error: {}",
                    job.attempt,
                    outcome.failure_count,
                    outcome.first_error.as_deref().unwrap_or("unknown")
                );
                self.fail(&job, message, Some(detail(&outcome)))?;
                Ok(RunOutcome::Exhausted)
            }
            Err(err @ BulkError::Deserialization(_)) => {
                self.fail(&job, err.to_string(), None)?;
                Ok(RunOutcome::Corrupt)
            }
            Err(err) => {
                let detail = "rerun aborted before completion".to_string();
                self.fail(&job, err.to_string(), Some(detail))?;
                Ok(RunOutcome::Aborted)
            }
        }
    }

    fn reschedule(&self, job: &RetryJob, outcome: ReplayOutcome) -> BulkResult<RunOutcome> {
        let failure_count = outcome.failure_count;
        let handler = RetryHandler::new(self.runtime.clone());
        let scheduled = handler.schedule_serialized(SerializedRetry {
            descriptor: job.descriptor.clone(),
            payload: outcome.failed_payload.clone(),
            record_count: failure_count,
            retries_left: job.retries_left - 1,
            attempt: job.attempt + 1,
            base_delay: Some(job.base_delay()),
            predecessor: Some(job.id),
        });

        match scheduled {
            Ok(Some(successor)) => {
                self.runtime.store().finish(
                    job.id,
                    JobFinish::Superseded {
                        successor,
                        error_message: format!(
                            "{failure_count} record(s) still failing; retried as {successor}"
                        ),
                    },
                )?;
                info!(job_id = %job.id, %successor, failure_count, "retry job superseded");
                Ok(RunOutcome::Rescheduled { successor })
            }
            Ok(None) => {
                self.fail(
                    job,
                    "still failing records could not be rescheduled".to_string(),
                    Some(detail(&outcome)),
                )?;
                Ok(RunOutcome::Exhausted)
            }
            Err(err) => {
                self.fail(
                    job,
                    format!("{failure_count} record(s) still failing; reschedule failed: {err}"),
                    Some(detail(&outcome)),
                )?;
                Err(err)
            }
        }
    }

    fn fail(&self, job: &RetryJob, message: String, detail: Option<String>) -> BulkResult<()> {
        warn!(job_id = %job.id, attempt = job.attempt, error = %message, "retry job failed");
        self.runtime.store().finish(
            job.id,
            JobFinish::Failed {
                error_message: message,
                error_detail: detail,
            },
        )?;
        Ok(())
    }
}

/// Failing keys plus the tail of the rerun log.
fn detail(outcome: &ReplayOutcome) -> String {
    let skip = outcome.log.chars().count().saturating_sub(DETAIL_LOG_CHARS);
    let tail: String = outcome.log.chars().skip(skip).collect();
    format!(
        "failing keys: {}\n{}",
        outcome.failed_keys.join(", "),
        tail
    )
}
