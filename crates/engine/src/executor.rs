//! Single-chunk execution against the record store.

use bulkdml_core::{BulkError, BulkResult, OperationDescriptor, OperationKind, Record};

use crate::chunker::{Chunk, serialized_len};
use crate::store::{RecordOutcome, RecordStore, StoreError};

/// Executes one operation against one chunk.
///
/// Returns one outcome per record, in chunk order. Per-record rejections are
/// outcomes, never errors; `Err` is reserved for structural problems that
/// prevent the call from being attempted (unknown upsert key, chunk above the
/// store's hard limits, request rejected by the store).
///
/// The executor does not log or deduplicate; that is the processor's job.
#[derive(Debug)]
pub struct OperationExecutor<S> {
    store: S,
}

impl<S> OperationExecutor<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn execute<R>(
        &self,
        chunk: &Chunk<R>,
        descriptor: &OperationDescriptor,
    ) -> BulkResult<Vec<RecordOutcome>>
    where
        R: Record,
        S: RecordStore<R>,
    {
        if chunk.is_empty() {
            return Ok(Vec::new());
        }

        if chunk.entity_type() != descriptor.entity_type() {
            return Err(BulkError::structural(format!(
                "chunk holds '{}' records but the operation targets '{}'",
                chunk.entity_type(),
                descriptor.entity_type()
            )));
        }

        let external_id_field = match descriptor.kind() {
            OperationKind::Upsert => Some(self.resolve_external_id::<R>(descriptor)?),
            _ => None,
        };

        self.check_quota(chunk)?;

        match self
            .store
            .write(chunk.records(), descriptor.kind(), external_id_field)
        {
            Ok(outcomes) if outcomes.len() == chunk.len() => Ok(outcomes),
            Ok(outcomes) => Err(BulkError::structural(format!(
                "store returned {} outcomes for {} records",
                outcomes.len(),
                chunk.len()
            ))),
            Err(StoreError::Unavailable(msg)) => {
                let message = format!("store unavailable: {msg}");
                Ok(vec![RecordOutcome::failure(message); chunk.len()])
            }
            Err(StoreError::Rejected(msg)) => Err(BulkError::structural(format!(
                "{} of {} rejected: {msg}",
                descriptor.kind(),
                descriptor.entity_type()
            ))),
        }
    }

    fn resolve_external_id<'d, R>(&self, descriptor: &'d OperationDescriptor) -> BulkResult<&'d str>
    where
        R: Record,
        S: RecordStore<R>,
    {
        let entity_type = descriptor.entity_type();
        let field = descriptor.external_id_field().ok_or_else(|| {
            BulkError::structural(format!("upsert on '{entity_type}' has no external id field"))
        })?;

        match self.store.describe_field(entity_type, field) {
            None => Err(BulkError::structural(format!(
                "external id field '{field}' does not exist on '{entity_type}'"
            ))),
            Some(describe) if !describe.is_upsert_key() => Err(BulkError::structural(format!(
                "field '{field}' on '{entity_type}' is not an external id or unique field"
            ))),
            Some(_) => Ok(field),
        }
    }

    fn check_quota<R>(&self, chunk: &Chunk<R>) -> BulkResult<()>
    where
        R: Record,
        S: RecordStore<R>,
    {
        let quota = self.store.quota();
        if chunk.len() > quota.max_records_per_call {
            return Err(BulkError::structural(format!(
                "chunk of {} records exceeds the store limit of {} records per call",
                chunk.len(),
                quota.max_records_per_call
            )));
        }

        if let Some(max_bytes) = quota.max_payload_bytes {
            let bytes = serialized_len(chunk.records()).map_err(|e| {
                BulkError::structural(format!("chunk could not be serialized: {e}"))
            })?;
            if bytes > max_bytes {
                return Err(BulkError::structural(format!(
                    "chunk payload of {bytes} bytes exceeds the store limit of {max_bytes} bytes"
                )));
            }
        }

        Ok(())
    }
}
