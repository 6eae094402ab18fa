//! Persisting and scheduling deferred retries.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use bulkdml_core::{BulkError, BulkResult, OperationDescriptor, Record, RetryJobId};
use bulkdml_engine::{RetryRequest, RetrySink};

use super::codec::JsonRecordCodec;
use super::runner::ScheduledRetryRunner;
use super::runtime::RetryRuntime;
use super::types::RetryJob;

/// An already-encoded retry request.
///
/// Used directly by the runner when it reschedules a still-failing subset
/// whose concrete type it does not know.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializedRetry {
    pub descriptor: OperationDescriptor,
    pub payload: String,
    pub record_count: usize,
    pub retries_left: u32,
    pub attempt: u32,
    /// Delay of attempt 1; defaults to `RetryConfig::base_delay`.
    pub base_delay: Option<Duration>,
    pub predecessor: Option<RetryJobId>,
}

/// Validates, persists and schedules retry jobs.
///
/// Exclusively creates retry job rows. Every row it creates is either handed
/// to the scheduler or deleted again before the call returns.
#[derive(Debug, Clone)]
pub struct RetryHandler {
    runtime: Arc<RetryRuntime>,
}

impl RetryHandler {
    pub fn new(runtime: Arc<RetryRuntime>) -> Self {
        Self { runtime }
    }

    pub fn runtime(&self) -> &Arc<RetryRuntime> {
        &self.runtime
    }

    /// Encode `failed` and schedule it.
    ///
    /// An empty slice is a no-op returning `Ok(None)`.
    pub fn schedule_records<R: Record>(
        &self,
        request: &RetryRequest,
        failed: &[R],
    ) -> BulkResult<Option<RetryJobId>> {
        if failed.is_empty() {
            return Ok(None);
        }
        request.descriptor.validate()?;

        let entity_type = request.descriptor.entity_type();
        if let Some(odd) = failed.iter().find(|r| r.entity_type() != entity_type) {
            return Err(BulkError::validation(format!(
                "retry record entity type '{}' does not match operation entity type '{entity_type}'",
                odd.entity_type()
            )));
        }

        let payload = JsonRecordCodec::encode(failed)?;
        self.schedule_serialized(SerializedRetry {
            descriptor: request.descriptor.clone(),
            payload,
            record_count: failed.len(),
            retries_left: request.retries_left,
            attempt: request.attempt,
            base_delay: request.base_delay,
            predecessor: None,
        })
    }

    /// Persist a pending job for `retry` and register its deferred run.
    ///
    /// - `record_count == 0` → `Ok(None)`, nothing persisted.
    /// - Payload above `max_payload_bytes` → validation error, nothing persisted.
    /// - Row persisted but scheduler refuses → row deleted, scheduling error.
    pub fn schedule_serialized(&self, retry: SerializedRetry) -> BulkResult<Option<RetryJobId>> {
        if retry.record_count == 0 {
            return Ok(None);
        }
        retry.descriptor.validate()?;

        let config = self.runtime.config();
        if retry.payload.len() > config.max_payload_bytes {
            return Err(BulkError::validation(format!(
                "retry payload too large: {} bytes exceeds the limit of {} bytes",
                retry.payload.len(),
                config.max_payload_bytes
            )));
        }

        let attempt = retry.attempt.max(1);
        let backoff = config.backoff(retry.base_delay);
        let delay = backoff.delay_for_attempt(attempt);

        let mut job = RetryJob::new(retry.descriptor, retry.payload, retry.record_count)
            .with_budget(retry.retries_left, attempt)
            .with_base_delay(backoff.base_delay)
            .delayed(delay);
        if let Some(predecessor) = retry.predecessor {
            job = job.with_predecessor(predecessor);
        }
        let entity_type = job.entity_type.clone();

        let store = self.runtime.store();
        let job_id = store
            .insert(job)
            .map_err(|e| BulkError::scheduling(format!("failed to persist retry job: {e}")))?;

        let runner = ScheduledRetryRunner::new(self.runtime.clone());
        let work = Box::new(move || {
            if let Err(e) = runner.run(job_id) {
                error!(%job_id, error = %e, "retry run failed");
            }
        });

        if let Err(e) = self.runtime.scheduler().schedule_at(delay, work) {
            match store.delete_pending(job_id) {
                Ok(_) => {}
                Err(cleanup) => {
                    error!(%job_id, error = %cleanup, "failed to remove unscheduled retry job")
                }
            }
            return Err(BulkError::scheduling(format!(
                "failed to schedule retry job {job_id}: {e}"
            )));
        }

        info!(
            %job_id,
            entity_type = %entity_type,
            record_count = retry.record_count,
            retries_left = retry.retries_left,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "retry job scheduled"
        );
        Ok(Some(job_id))
    }
}

impl<R: Record> RetrySink<R> for RetryHandler {
    fn schedule_retry(&self, request: RetryRequest, failed: &[R]) -> BulkResult<Option<RetryJobId>> {
        self.schedule_records(&request, failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bulkdml_core::SObject;

    use crate::config::RetryConfig;
    use crate::jobs::{InMemoryRetryJobStore, QueuedScheduler, RetryJobStatus, RetryJobStore};

    fn setup(config: RetryConfig) -> (RetryHandler, Arc<InMemoryRetryJobStore>, Arc<QueuedScheduler>) {
        let store = InMemoryRetryJobStore::arc();
        let scheduler = Arc::new(QueuedScheduler::new());
        let runtime = RetryRuntime::new(store.clone(), scheduler.clone(), config);
        (RetryHandler::new(runtime), store, scheduler)
    }

    fn request(retries_left: u32) -> RetryRequest {
        RetryRequest {
            descriptor: OperationDescriptor::insert("Account").unwrap(),
            retries_left,
            attempt: 1,
            base_delay: None,
        }
    }

    fn records(n: usize) -> Vec<SObject> {
        (0..n)
            .map(|i| SObject::new("Account").with_field("Seq", i as i64))
            .collect()
    }

    #[test]
    fn empty_input_creates_nothing() {
        let (handler, store, scheduler) = setup(RetryConfig::default());
        for budget in [0, 1, 5] {
            let job = handler
                .schedule_records::<SObject>(&request(budget), &[])
                .unwrap();
            assert!(job.is_none());
        }
        assert!(store.is_empty());
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn zero_budget_is_a_legal_last_attempt() {
        let (handler, store, scheduler) = setup(RetryConfig::default());
        let id = handler
            .schedule_records(&request(0), &records(3))
            .unwrap()
            .unwrap();

        let job = store.get(id).unwrap().unwrap();
        assert_eq!(job.status, RetryJobStatus::Pending);
        assert_eq!(job.retries_left, 0);
        assert_eq!(job.attempt, 1);
        assert_eq!(job.record_count, 3);
        assert_eq!(job.entity_type, "Account");
        assert_eq!(scheduler.delays(), vec![Duration::from_secs(5)]);
    }

    #[test]
    fn oversized_payload_is_rejected_before_persisting() {
        let (handler, store, scheduler) =
            setup(RetryConfig::default().with_max_payload_bytes(64));
        let err = handler
            .schedule_records(&request(2), &records(10))
            .unwrap_err();

        assert!(err.is_validation());
        assert!(err.to_string().contains("too large"));
        assert!(store.is_empty());
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn scheduler_failure_removes_the_row() {
        let (handler, store, scheduler) = setup(RetryConfig::default());
        scheduler.set_rejecting(true);

        let err = handler
            .schedule_records(&request(2), &records(2))
            .unwrap_err();

        assert!(matches!(err, BulkError::Scheduling(_)));
        assert!(store.is_empty(), "no orphaned pending rows");
    }

    #[test]
    fn later_attempts_back_off_from_the_base_delay() {
        let (handler, store, scheduler) = setup(
            RetryConfig::default()
                .with_base_delay(Duration::from_millis(100))
                .with_max_delay(Duration::from_millis(300)),
        );

        for attempt in 1..=3 {
            let payload = JsonRecordCodec::encode(&records(1)).unwrap();
            handler
                .schedule_serialized(SerializedRetry {
                    descriptor: OperationDescriptor::insert("Account").unwrap(),
                    payload,
                    record_count: 1,
                    retries_left: 3 - attempt,
                    attempt,
                    base_delay: None,
                    predecessor: None,
                })
                .unwrap();
        }

        assert_eq!(
            scheduler.delays(),
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(300),
            ]
        );
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn malformed_descriptor_is_rejected() {
        let (handler, store, _) = setup(RetryConfig::default());
        let descriptor: OperationDescriptor =
            serde_json::from_str(r#"{"kind":"upsert","entityType":"Account"}"#).unwrap();
        let request = RetryRequest {
            descriptor,
            ..request(1)
        };

        let err = handler.schedule_records(&request, &records(1)).unwrap_err();
        assert!(err.is_validation());
        assert!(store.is_empty());
    }
}
