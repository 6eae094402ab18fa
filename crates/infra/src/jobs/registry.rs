//! Entity type name → typed replay.
//!
//! A retry job stores its records as text plus the entity type name. At run
//! time the name selects a [`ReplayTarget`] registered at startup, which
//! decodes into the right concrete record type and reruns the batch. No
//! untyped deserialization happens anywhere on this path.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use bulkdml_core::{BulkResult, Record};
use bulkdml_engine::{Processor, RecordStore, RetryPolicy};

use super::codec::JsonRecordCodec;
use super::types::RetryJob;

/// What a rerun left behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayOutcome {
    pub success_count: usize,
    pub failure_count: usize,
    /// Still-failing records, encoded for a successor job (empty when none).
    pub failed_payload: String,
    pub failed_keys: Vec<String>,
    pub first_error: Option<String>,
    /// Execution log of the rerun.
    pub log: String,
}

impl ReplayOutcome {
    pub fn is_complete(&self) -> bool {
        self.failure_count == 0
    }
}

/// Reruns a persisted job's payload as one concrete record type.
pub trait ReplayTarget: Send + Sync {
    /// Decode the job payload and rerun it with retries disabled.
    ///
    /// Fails with `BulkError::Deserialization` if the payload cannot be
    /// decoded, or with the processor's error if the rerun is rejected or any
    /// of its chunks is aborted by a structural error.
    fn replay(&self, job: &RetryJob) -> BulkResult<ReplayOutcome>;
}

/// [`ReplayTarget`] backed by a retries-disabled [`Processor`].
pub struct TypedReplay<R, S> {
    processor: Processor<R, S>,
}

impl<R, S> TypedReplay<R, S>
where
    R: Record,
    S: RecordStore<R>,
{
    /// Wrap a detached copy of `processor`; it never schedules retries itself.
    pub fn new(processor: &Processor<R, S>) -> Self {
        Self {
            processor: processor.detached(),
        }
    }
}

impl<R, S> ReplayTarget for TypedReplay<R, S>
where
    R: Record,
    S: RecordStore<R>,
{
    fn replay(&self, job: &RetryJob) -> BulkResult<ReplayOutcome> {
        let records: Vec<R> = JsonRecordCodec::decode(&job.serialized_records, &job.entity_type)?;
        let result = self
            .processor
            .process(records, &job.descriptor, &RetryPolicy::disabled())?;

        if let Some(err) = result.first_chunk_error() {
            return Err(err.clone());
        }

        let failed_payload = if result.failed_records.is_empty() {
            String::new()
        } else {
            JsonRecordCodec::encode(&result.failed_records.records())?
        };

        Ok(ReplayOutcome {
            success_count: result.success_count,
            failure_count: result.failure_count(),
            failed_keys: result
                .failed_records
                .iter()
                .map(|f| f.key.to_string())
                .collect(),
            first_error: result.failed_records.first_error().map(str::to_string),
            failed_payload,
            log: result.log,
        })
    }
}

/// Registry of replay targets keyed by entity type name.
///
/// Populated at startup; lookups happen on every retry run.
#[derive(Default)]
pub struct RecordTypeRegistry {
    targets: RwLock<HashMap<String, Arc<dyn ReplayTarget>>>,
}

impl RecordTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `target` for `entity_type`, replacing any previous one.
    pub fn register(&self, entity_type: impl Into<String>, target: Arc<dyn ReplayTarget>) {
        self.targets
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(entity_type.into(), target);
    }

    /// Register a processor as the replay target for `entity_type`.
    pub fn register_processor<R, S>(&self, entity_type: impl Into<String>, processor: &Processor<R, S>)
    where
        R: Record,
        S: RecordStore<R> + 'static,
    {
        self.register(entity_type, Arc::new(TypedReplay::new(processor)));
    }

    pub fn get(&self, entity_type: &str) -> Option<Arc<dyn ReplayTarget>> {
        self.targets
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(entity_type)
            .cloned()
    }

    pub fn entity_types(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .targets
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for RecordTypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordTypeRegistry")
            .field("entity_types", &self.entity_types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bulkdml_core::{BulkError, OperationDescriptor, SObject};
    use bulkdml_engine::{FieldDescribe, HookManager, InMemoryRecordStore, ProcessorConfig};

    fn processor(store: Arc<InMemoryRecordStore<SObject>>) -> Processor<SObject, Arc<InMemoryRecordStore<SObject>>> {
        Processor::new(store, Arc::new(HookManager::new()), ProcessorConfig::default())
    }

    fn job(payload: &str) -> RetryJob {
        RetryJob::new(
            OperationDescriptor::insert("Account").unwrap(),
            payload.to_string(),
            1,
        )
    }

    #[test]
    fn replay_reports_still_failing_records() {
        let store = Arc::new(InMemoryRecordStore::new());
        store.set_rejector(|r: &SObject, _| r.field("Bad").map(|_| "INVALID_FIELD".to_string()));
        let registry = RecordTypeRegistry::new();
        registry.register_processor("Account", &processor(store));

        let records = vec![
            SObject::new("Account").with_field("Name", "ok"),
            SObject::new("Account").with_field("Bad", true),
        ];
        let payload = JsonRecordCodec::encode(&records).unwrap();

        let outcome = registry.get("Account").unwrap().replay(&job(&payload)).unwrap();
        assert_eq!(outcome.success_count, 1);
        assert_eq!(outcome.failure_count, 1);
        assert_eq!(outcome.first_error.as_deref(), Some("INVALID_FIELD"));

        let still_failing: Vec<SObject> =
            JsonRecordCodec::decode(&outcome.failed_payload, "Account").unwrap();
        assert_eq!(still_failing, vec![records[1].clone()]);
    }

    #[test]
    fn aborted_chunk_fails_the_replay() {
        let store = Arc::new(InMemoryRecordStore::new());
        store.define_field("Account", FieldDescribe::plain("Ext__c"));
        let registry = RecordTypeRegistry::new();
        registry.register_processor("Account", &processor(store.clone()));

        let payload = JsonRecordCodec::encode(&[SObject::new("Account")]).unwrap();
        let upsert = RetryJob::new(
            OperationDescriptor::upsert("Account", "Ext__c").unwrap(),
            payload,
            1,
        );

        let err = registry.get("Account").unwrap().replay(&upsert).unwrap_err();
        assert!(matches!(err, BulkError::Structural(_)));
        assert!(store.calls().is_empty());
    }

    #[test]
    fn corrupt_payload_is_a_deserialization_error() {
        let registry = RecordTypeRegistry::new();
        registry.register_processor("Account", &processor(Arc::new(InMemoryRecordStore::new())));

        let err = registry.get("Account").unwrap().replay(&job("[{\"oops\"")).unwrap_err();
        assert!(matches!(err, BulkError::Deserialization(_)));
        assert!(registry.get("Contact").is_none());
        assert_eq!(registry.entity_types(), vec!["Account".to_string()]);
    }
}
