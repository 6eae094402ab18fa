//! Batch orchestration: chunk, execute, fire hooks, aggregate, hand off retries.
//!
//! ```text
//! records
//!   ↓
//! 1. Split into quota-sized chunks (validation errors surface here)
//!   ↓
//! 2. Per chunk, sequentially:
//!      pre hooks → store write → post hooks → error callbacks (if any failed)
//!   ↓
//! 3. Deduplicate failures across chunks by record key
//!   ↓
//! 4. Optionally schedule a deferred retry for what is still failing
//! ```
//!
//! Neither rejected records nor a structural error (schema or store limits)
//! in one chunk stop later chunks. An aborted chunk is reported in
//! `ExecutionResult::chunk_errors`; only validation errors, raised before
//! anything is written, end `process` with `Err`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error};

use bulkdml_core::{BulkError, BulkResult, OperationDescriptor, Record, RetryJobId};

use crate::chunker::{self, Chunk, ChunkQuota};
use crate::context::{DEFAULT_LOG_MAX_CHARS, ExecutionContext, MIN_LOG_MAX_CHARS};
use crate::executor::OperationExecutor;
use crate::hooks::HookManager;
use crate::result::{ChunkError, ExecutionResult, FailedRecordSet};
use crate::store::{RecordOutcome, RecordStore};

/// Processor configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorConfig {
    /// Records per chunk. Signed so that bad external input is reported as a
    /// validation error rather than wrapping.
    pub chunk_size: i64,
    /// Optional serialized-size cap per chunk; enables byte-aware splitting.
    pub max_chunk_bytes: Option<usize>,
    /// Bound on the per-run execution log; at least `MIN_LOG_MAX_CHARS`.
    pub log_max_chars: usize,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            chunk_size: 200,
            max_chunk_bytes: None,
            log_max_chars: DEFAULT_LOG_MAX_CHARS,
        }
    }
}

impl ProcessorConfig {
    pub fn with_chunk_size(mut self, chunk_size: i64) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_max_chunk_bytes(mut self, max_chunk_bytes: usize) -> Self {
        self.max_chunk_bytes = Some(max_chunk_bytes);
        self
    }

    pub fn with_log_max_chars(mut self, log_max_chars: usize) -> Self {
        self.log_max_chars = log_max_chars;
        self
    }

    /// Reject a log bound too small to hold the truncation marker plus an
    /// entry. Chunk sizes are checked by the chunker.
    pub fn validate(&self) -> BulkResult<()> {
        if self.log_max_chars < MIN_LOG_MAX_CHARS {
            return Err(BulkError::validation(format!(
                "log max chars must be at least {MIN_LOG_MAX_CHARS} (got {})",
                self.log_max_chars
            )));
        }
        Ok(())
    }
}

/// Whether (and with what budget) failures of a `process` call are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    enabled: bool,
    retries_left: u32,
    final_attempt: bool,
    base_delay: Option<Duration>,
}

impl RetryPolicy {
    /// Never schedule; used for reruns driven by the retry runner itself.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            retries_left: 0,
            final_attempt: false,
            base_delay: None,
        }
    }

    /// Schedule failures with `retries_left` further reschedules allowed.
    /// A budget of zero schedules nothing unless combined with a final attempt.
    pub fn with_retries(retries_left: u32) -> Self {
        Self {
            enabled: true,
            retries_left,
            final_attempt: false,
            base_delay: None,
        }
    }

    /// Schedule exactly one last attempt (`retries_left == 0`).
    pub fn final_attempt() -> Self {
        Self {
            enabled: true,
            retries_left: 0,
            final_attempt: true,
            base_delay: None,
        }
    }

    /// Delay before the first retry; defaults to the retry handler's config.
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = Some(base_delay);
        self
    }

    pub fn retries_left(&self) -> u32 {
        self.retries_left
    }

    pub fn base_delay(&self) -> Option<Duration> {
        self.base_delay
    }

    pub fn should_schedule(&self) -> bool {
        self.enabled && (self.retries_left > 0 || self.final_attempt)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::disabled()
    }
}

/// Parameters of one deferred retry request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryRequest {
    pub descriptor: OperationDescriptor,
    pub retries_left: u32,
    /// 1 for the first retry of a batch.
    pub attempt: u32,
    pub base_delay: Option<Duration>,
}

/// Seam through which the processor hands failures to the retry machinery.
///
/// Returns the created job id, or `None` when there was nothing to schedule.
pub trait RetrySink<R>: Send + Sync {
    fn schedule_retry(&self, request: RetryRequest, failed: &[R]) -> BulkResult<Option<RetryJobId>>;
}

/// Orchestrates chunking, execution and hooks over a full batch.
pub struct Processor<R, S> {
    executor: Arc<OperationExecutor<S>>,
    hooks: Arc<HookManager<R>>,
    config: ProcessorConfig,
    retry_sink: Option<Arc<dyn RetrySink<R>>>,
}

impl<R, S> Processor<R, S>
where
    R: Record,
    S: RecordStore<R>,
{
    pub fn new(store: S, hooks: Arc<HookManager<R>>, config: ProcessorConfig) -> Self {
        Self {
            executor: Arc::new(OperationExecutor::new(store)),
            hooks,
            config,
            retry_sink: None,
        }
    }

    pub fn with_retry_sink(mut self, sink: Arc<dyn RetrySink<R>>) -> Self {
        self.retry_sink = Some(sink);
        self
    }

    /// A processor sharing this one's store, hooks and config, without a
    /// retry sink. Used for reruns so a rerun can never schedule on its own.
    pub fn detached(&self) -> Self {
        Self {
            executor: self.executor.clone(),
            hooks: self.hooks.clone(),
            config: self.config.clone(),
            retry_sink: None,
        }
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        self.executor.store()
    }

    /// Write `records` as described by `descriptor`.
    ///
    /// Returns `Err` only for validation errors (bad config or chunk size,
    /// mixed or mismatched entity types), before any write. Per-record
    /// rejections land in `ExecutionResult::failed_records`; chunks aborted by
    /// a structural error land in `ExecutionResult::chunk_errors`. A failure to
    /// schedule a retry is logged and reported in `retry_error` without
    /// discarding the write outcomes.
    pub fn process(
        &self,
        records: Vec<R>,
        descriptor: &OperationDescriptor,
        policy: &RetryPolicy,
    ) -> BulkResult<ExecutionResult<R>> {
        self.config.validate()?;
        descriptor.validate()?;
        if let Some(odd) = records
            .iter()
            .find(|r| r.entity_type() != descriptor.entity_type())
        {
            return Err(BulkError::validation(format!(
                "record entity type '{}' does not match operation entity type '{}'",
                odd.entity_type(),
                descriptor.entity_type()
            )));
        }

        let total_records = records.len();
        let chunks = self.split(records)?;

        let ctx = ExecutionContext::new(descriptor, self.config.log_max_chars);
        ctx.info(format!(
            "{} {}: {} record(s) in {} chunk(s)",
            descriptor.kind(),
            descriptor.entity_type(),
            total_records,
            chunks.len()
        ));

        let mut success_count = 0;
        let mut failed = FailedRecordSet::new();
        let mut chunk_errors = Vec::new();

        for chunk in &chunks {
            self.hooks.dispatch_pre(chunk, &ctx);

            let outcomes = match self.executor.execute(chunk, descriptor) {
                Ok(outcomes) => outcomes,
                Err(err) => {
                    ctx.error(format!("chunk {} aborted: {err}", chunk.index()));
                    self.hooks.dispatch_error(chunk.records(), &ctx, &err);
                    chunk_errors.push(ChunkError {
                        chunk_index: chunk.index(),
                        record_count: chunk.len(),
                        error: err,
                    });
                    continue;
                }
            };

            let chunk_failures = self.collect(chunk, &outcomes, &mut failed, &mut success_count);

            self.hooks.dispatch_post(chunk, &outcomes, &ctx);

            if let Some((records, first_error)) = chunk_failures {
                ctx.warn(format!(
                    "chunk {}: {} of {} record(s) failed; first error: {first_error}",
                    chunk.index(),
                    records.len(),
                    chunk.len()
                ));
                let err = BulkError::partial_failure(records.len(), first_error);
                self.hooks.dispatch_error(&records, &ctx, &err);
            } else {
                ctx.info(format!("chunk {}: {} record(s) written", chunk.index(), chunk.len()));
            }
        }

        let mut retry_job = None;
        let mut retry_error = None;
        if !failed.is_empty() && policy.should_schedule() {
            match self.schedule(descriptor, policy, &failed, &ctx) {
                Ok(job) => retry_job = job,
                Err(err) => retry_error = Some(err.to_string()),
            }
        }

        if chunk_errors.is_empty() {
            ctx.info(format!(
                "finished: {success_count} succeeded, {} failed",
                failed.len()
            ));
        } else {
            ctx.warn(format!(
                "finished: {success_count} succeeded, {} failed, {} chunk(s) aborted",
                failed.len(),
                chunk_errors.len()
            ));
        }

        let metadata = ctx.metadata().clone();
        Ok(ExecutionResult {
            run_id: metadata.run_id(),
            started_at: metadata.started_at(),
            finished_at: Utc::now(),
            chunk_count: chunks.len(),
            success_count,
            failed_records: failed,
            chunk_errors,
            log: ctx.into_log(),
            retry_job,
            retry_error,
        })
    }

    fn split(&self, records: Vec<R>) -> BulkResult<Vec<Chunk<R>>> {
        match self.config.max_chunk_bytes {
            Some(max_bytes) => {
                let quota = ChunkQuota::new(self.config.chunk_size, max_bytes)?;
                chunker::split_by_quota(records, quota)
            }
            None => chunker::split(records, self.config.chunk_size),
        }
    }

    /// Tally one chunk's outcomes. Returns the chunk's failing records and the
    /// first error message, if any failed.
    fn collect(
        &self,
        chunk: &Chunk<R>,
        outcomes: &[RecordOutcome],
        failed: &mut FailedRecordSet<R>,
        success_count: &mut usize,
    ) -> Option<(Vec<R>, String)> {
        let mut chunk_failures = Vec::new();
        let mut first_error: Option<String> = None;

        for (record, outcome) in chunk.records().iter().zip(outcomes) {
            match outcome {
                RecordOutcome::Success { .. } => *success_count += 1,
                RecordOutcome::Failure { message } => {
                    if !failed.insert(record.clone(), message.as_str(), chunk.index()) {
                        debug!(
                            chunk_index = chunk.index(),
                            key = %record.record_key(),
                            "duplicate failure ignored"
                        );
                    }
                    first_error.get_or_insert_with(|| message.clone());
                    chunk_failures.push(record.clone());
                }
            }
        }

        first_error.map(|first| (chunk_failures, first))
    }

    fn schedule(
        &self,
        descriptor: &OperationDescriptor,
        policy: &RetryPolicy,
        failed: &FailedRecordSet<R>,
        ctx: &ExecutionContext,
    ) -> BulkResult<Option<RetryJobId>> {
        let Some(sink) = &self.retry_sink else {
            ctx.warn("retry requested but no retry handler is configured");
            return Ok(None);
        };

        let request = RetryRequest {
            descriptor: descriptor.clone(),
            retries_left: policy.retries_left(),
            attempt: 1,
            base_delay: policy.base_delay(),
        };

        match sink.schedule_retry(request, &failed.records()) {
            Ok(Some(job_id)) => {
                ctx.info(format!(
                    "scheduled retry job {job_id} for {} record(s) (retries left: {})",
                    failed.len(),
                    policy.retries_left()
                ));
                Ok(Some(job_id))
            }
            Ok(None) => Ok(None),
            Err(err) => {
                error!(error = %err, entity_type = descriptor.entity_type(), "failed to schedule retry");
                ctx.error(format!("failed to schedule retry: {err}"));
                Err(err)
            }
        }
    }
}

impl<R, S> std::fmt::Debug for Processor<R, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Processor")
            .field("config", &self.config)
            .field("hooks", &self.hooks)
            .field("retry_sink", &self.retry_sink.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use bulkdml_core::SObject;
    use serde_json::json;

    use crate::hooks::HookError;
    use crate::store::{FieldDescribe, InMemoryRecordStore, StoreQuota};

    type Store = Arc<InMemoryRecordStore<SObject>>;

    fn accounts(n: usize) -> Vec<SObject> {
        (0..n)
            .map(|i| SObject::new("Account").with_field("Seq", i as i64))
            .collect()
    }

    fn processor(store: Store, chunk_size: i64) -> Processor<SObject, Store> {
        Processor::new(
            store,
            Arc::new(HookManager::new()),
            ProcessorConfig::default().with_chunk_size(chunk_size),
        )
    }

    /// Records every request; optionally fails.
    #[derive(Default)]
    struct RecordingSink {
        requests: Mutex<Vec<(RetryRequest, usize)>>,
        fail: bool,
    }

    impl RetrySink<SObject> for RecordingSink {
        fn schedule_retry(
            &self,
            request: RetryRequest,
            failed: &[SObject],
        ) -> BulkResult<Option<RetryJobId>> {
            self.requests.lock().unwrap().push((request, failed.len()));
            if self.fail {
                Err(BulkError::scheduling("job table unavailable"))
            } else {
                Ok(Some(RetryJobId::new()))
            }
        }
    }

    #[test]
    fn all_success_in_three_chunks() {
        let store: Store = Arc::new(InMemoryRecordStore::new());
        let sink = Arc::new(RecordingSink::default());
        let processor = processor(store.clone(), 100).with_retry_sink(sink.clone());
        let descriptor = OperationDescriptor::insert("Account").unwrap();

        let result = processor
            .process(accounts(250), &descriptor, &RetryPolicy::with_retries(3))
            .unwrap();

        assert_eq!(result.chunk_count, 3);
        assert_eq!(result.success_count, 250);
        assert!(result.is_complete());
        assert!(result.retry_job.is_none());
        let sizes: Vec<_> = store.calls().iter().map(|c| c.record_count).collect();
        assert_eq!(sizes, vec![100, 100, 50]);
        assert!(sink.requests.lock().unwrap().is_empty());
    }

    #[test]
    fn failures_in_one_chunk_do_not_stop_later_chunks() {
        let store: Store = Arc::new(InMemoryRecordStore::new());
        store.set_rejector(|r: &SObject, _| {
            let seq = r.field("Seq").and_then(|v| v.as_i64()).unwrap_or_default();
            (seq < 10).then(|| format!("ROW_LOCK on {seq}"))
        });
        let sink = Arc::new(RecordingSink::default());
        let processor = processor(store.clone(), 25).with_retry_sink(sink.clone());
        let descriptor = OperationDescriptor::insert("Account").unwrap();

        let result = processor
            .process(accounts(100), &descriptor, &RetryPolicy::with_retries(2))
            .unwrap();

        assert_eq!(result.success_count, 90);
        assert_eq!(result.failure_count(), 10);
        assert_eq!(store.calls().len(), 4);
        assert!(result.retry_job.is_some());

        let requests = sink.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].0.retries_left, 2);
        assert_eq!(requests[0].0.attempt, 1);
        assert_eq!(requests[0].1, 10);
    }

    #[test]
    fn duplicate_failures_across_chunks_are_deduplicated() {
        let store: Store = Arc::new(InMemoryRecordStore::new());
        store.set_rejector(|_, _| Some("UNABLE_TO_LOCK_ROW".to_string()));
        let processor = processor(store, 2);
        let descriptor = OperationDescriptor::update("Account").unwrap();

        let same = SObject::new("Account").with_id("001A");
        let records = vec![same.clone(), same.clone(), same.clone(), same];
        let result = processor
            .process(records, &descriptor, &RetryPolicy::disabled())
            .unwrap();

        assert_eq!(result.chunk_count, 2);
        assert_eq!(result.failure_count(), 1);
    }

    #[test]
    fn zero_budget_schedules_only_on_final_attempt() {
        let store: Store = Arc::new(InMemoryRecordStore::new());
        store.set_rejector(|_, _| Some("FAIL".to_string()));
        let sink = Arc::new(RecordingSink::default());
        let processor = processor(store, 10).with_retry_sink(sink.clone());
        let descriptor = OperationDescriptor::insert("Account").unwrap();

        processor
            .process(accounts(3), &descriptor, &RetryPolicy::with_retries(0))
            .unwrap();
        assert!(sink.requests.lock().unwrap().is_empty());

        processor
            .process(accounts(3), &descriptor, &RetryPolicy::final_attempt())
            .unwrap();
        let requests = sink.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].0.retries_left, 0);
    }

    #[test]
    fn scheduling_failure_keeps_write_outcomes() {
        let store: Store = Arc::new(InMemoryRecordStore::new());
        store.set_rejector(|r: &SObject, _| {
            (r.field("Seq") == Some(&json!(0))).then(|| "FAIL".to_string())
        });
        let sink = Arc::new(RecordingSink {
            fail: true,
            ..Default::default()
        });
        let processor = processor(store, 10).with_retry_sink(sink);
        let descriptor = OperationDescriptor::insert("Account").unwrap();

        let result = processor
            .process(accounts(5), &descriptor, &RetryPolicy::with_retries(1))
            .unwrap();

        assert_eq!(result.success_count, 4);
        assert_eq!(result.failure_count(), 1);
        assert!(result.retry_job.is_none());
        assert!(result.retry_error.unwrap().contains("job table unavailable"));
        assert!(result.log.contains("[ERROR] failed to schedule retry"));
    }

    #[test]
    fn invalid_chunk_size_surfaces_as_validation_error() {
        let store: Store = Arc::new(InMemoryRecordStore::new());
        let descriptor = OperationDescriptor::insert("Account").unwrap();

        let err = processor(store.clone(), 0)
            .process(accounts(3), &descriptor, &RetryPolicy::disabled())
            .unwrap_err();
        assert!(err.is_validation());
        assert!(store.calls().is_empty());
    }

    #[test]
    fn mismatched_entity_type_is_rejected_up_front() {
        let store: Store = Arc::new(InMemoryRecordStore::new());
        let descriptor = OperationDescriptor::insert("Contact").unwrap();

        let err = processor(store, 10)
            .process(accounts(1), &descriptor, &RetryPolicy::disabled())
            .unwrap_err();
        assert!(err.to_string().contains("does not match"));
    }

    #[test]
    fn structural_error_aborts_only_the_affected_chunks() {
        let store: Store = Arc::new(InMemoryRecordStore::new());
        let errors = Arc::new(AtomicUsize::new(0));
        let mut hooks = HookManager::new();
        let seen = errors.clone();
        hooks.on_error(move |records: &[SObject], _, err| {
            assert!(matches!(err, BulkError::Structural(_)));
            seen.fetch_add(records.len(), Ordering::SeqCst);
            Ok(())
        });
        let processor = Processor::new(
            store.clone(),
            Arc::new(hooks),
            ProcessorConfig::default().with_chunk_size(5),
        );
        let descriptor = OperationDescriptor::upsert("Account", "Ext__c").unwrap();

        let result = processor
            .process(accounts(12), &descriptor, &RetryPolicy::disabled())
            .unwrap();

        assert_eq!(result.chunk_count, 3);
        assert_eq!(result.success_count, 0);
        assert!(result.failed_records.is_empty());
        assert!(!result.is_complete());
        let aborted: Vec<_> = result
            .chunk_errors
            .iter()
            .map(|c| (c.chunk_index, c.record_count))
            .collect();
        assert_eq!(aborted, vec![(0, 5), (1, 5), (2, 2)]);
        assert_eq!(result.aborted_record_count(), 12);
        assert!(matches!(result.first_chunk_error(), Some(BulkError::Structural(_))));
        assert_eq!(errors.load(Ordering::SeqCst), 12);
        assert!(store.calls().is_empty());

        store.define_field("Account", FieldDescribe::external_id("Ext__c"));
        let result = processor
            .process(accounts(12), &descriptor, &RetryPolicy::disabled())
            .unwrap();
        assert_eq!(result.success_count, 12);
        assert!(result.is_complete());
    }

    #[test]
    fn oversized_chunk_does_not_hide_other_chunks() {
        let store: Store = Arc::new(InMemoryRecordStore::with_quota(StoreQuota {
            max_payload_bytes: Some(2_000),
            ..StoreQuota::default()
        }));
        store.set_rejector(|r: &SObject, _| {
            (r.field("Seq") == Some(&json!(0))).then(|| "ROW_LOCK".to_string())
        });
        let structural = Arc::new(AtomicUsize::new(0));
        let mut hooks = HookManager::new();
        let seen = structural.clone();
        hooks.on_error(move |records: &[SObject], _, err| {
            if matches!(err, BulkError::Structural(_)) {
                seen.fetch_add(records.len(), Ordering::SeqCst);
            }
            Ok(())
        });
        let sink = Arc::new(RecordingSink::default());
        let processor = Processor::new(
            store.clone(),
            Arc::new(hooks),
            ProcessorConfig::default().with_chunk_size(2),
        )
        .with_retry_sink(sink.clone());
        let descriptor = OperationDescriptor::insert("Account").unwrap();

        let mut records = accounts(6);
        records[2] = records[2].clone().with_field("Body", "x".repeat(3_000));

        let result = processor
            .process(records, &descriptor, &RetryPolicy::with_retries(1))
            .unwrap();

        // Chunk 0 partially fails, chunk 1 is over the byte quota, chunk 2 is clean.
        assert_eq!(store.calls().len(), 2);
        let written: Vec<_> = store
            .accepted()
            .iter()
            .filter_map(|r| r.field("Seq").and_then(|v| v.as_i64()))
            .collect();
        assert_eq!(written, vec![1, 4, 5]);
        assert_eq!(result.success_count, 3);
        assert_eq!(result.failure_count(), 1);

        assert_eq!(result.chunk_errors.len(), 1);
        assert_eq!(result.chunk_errors[0].chunk_index, 1);
        assert_eq!(result.chunk_errors[0].record_count, 2);
        assert!(result.chunk_errors[0]
            .error
            .to_string()
            .contains("exceeds the store limit"));
        assert_eq!(structural.load(Ordering::SeqCst), 2);

        assert!(result.retry_job.is_some());
        let requests = sink.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].1, 1);
        assert!(result.log.contains("[ERROR] chunk 1 aborted"));
        assert!(result.log.contains("1 chunk(s) aborted"));
    }

    #[test]
    fn log_bound_below_the_minimum_is_rejected() {
        let store: Store = Arc::new(InMemoryRecordStore::new());
        let processor = Processor::new(
            store.clone(),
            Arc::new(HookManager::new()),
            ProcessorConfig::default().with_log_max_chars(100),
        );
        let descriptor = OperationDescriptor::insert("Account").unwrap();

        let err = processor
            .process(accounts(1), &descriptor, &RetryPolicy::disabled())
            .unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("at least 256"));
        assert!(store.calls().is_empty());

        assert!(
            ProcessorConfig::default()
                .with_log_max_chars(MIN_LOG_MAX_CHARS)
                .validate()
                .is_ok()
        );
    }

    #[test]
    fn hooks_fire_in_order_and_failures_are_isolated() {
        let store: Store = Arc::new(InMemoryRecordStore::new());
        store.set_rejector(|r: &SObject, _| {
            (r.field("Seq") == Some(&json!(2))).then(|| "BAD".to_string())
        });
        let trace = Arc::new(Mutex::new(Vec::<String>::new()));

        let mut hooks = HookManager::new();
        let t = trace.clone();
        hooks.on_pre(move |chunk: &Chunk<SObject>, _| {
            t.lock().unwrap().push(format!("pre{}", chunk.index()));
            Err(HookError::new("pre hook always fails"))
        });
        let t = trace.clone();
        hooks.on_post(move |chunk: &Chunk<SObject>, _, _| {
            t.lock().unwrap().push(format!("post{}", chunk.index()));
            Ok(())
        });
        let t = trace.clone();
        hooks.on_error(move |records: &[SObject], _, _| {
            t.lock().unwrap().push(format!("error{}", records.len()));
            Ok(())
        });

        let processor = Processor::new(
            store,
            Arc::new(hooks),
            ProcessorConfig::default().with_chunk_size(2),
        );
        let descriptor = OperationDescriptor::insert("Account").unwrap();
        let result = processor
            .process(accounts(4), &descriptor, &RetryPolicy::disabled())
            .unwrap();

        assert_eq!(result.success_count, 3);
        assert_eq!(
            *trace.lock().unwrap(),
            vec!["pre0", "post0", "pre1", "post1", "error1"]
        );
        assert_eq!(result.log.matches("pre hook always fails").count(), 2);
    }

    #[test]
    fn byte_aware_chunking_is_used_when_configured() {
        let store: Store = Arc::new(InMemoryRecordStore::new());
        let one = serde_json::to_vec(&accounts(1)[0]).unwrap().len();
        let processor = Processor::new(
            store.clone(),
            Arc::new(HookManager::new()),
            ProcessorConfig::default()
                .with_chunk_size(100)
                .with_max_chunk_bytes(2 * one + 3),
        );
        let descriptor = OperationDescriptor::insert("Account").unwrap();

        let result = processor
            .process(accounts(6), &descriptor, &RetryPolicy::disabled())
            .unwrap();

        assert_eq!(result.success_count, 6);
        assert!(store.calls().iter().all(|c| c.record_count <= 2));
    }
}
