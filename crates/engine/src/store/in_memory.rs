//! In-memory record store for tests/dev.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};

use bulkdml_core::{OperationKind, Record, RecordId};

use super::{FieldDescribe, RecordOutcome, RecordStore, StoreError, StoreQuota};

/// Decides whether the store rejects a record; `Some(message)` means reject.
pub type Rejector<R> = Box<dyn Fn(&R, OperationKind) -> Option<String> + Send + Sync>;

/// One recorded `write` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteCall {
    pub kind: OperationKind,
    pub entity_type: String,
    pub record_count: usize,
    pub external_id_field: Option<String>,
}

/// In-memory store with a configurable schema and failure injection.
///
/// - Records accepted by `write` are appended to [`accepted`](Self::accepted).
/// - A [`Rejector`] can be installed (and swapped) to fail individual records.
/// - [`fail_next_calls`](Self::fail_next_calls) makes whole calls fail with
///   `StoreError::Unavailable`.
///
/// Not optimized for performance.
pub struct InMemoryRecordStore<R> {
    schema: RwLock<HashMap<String, HashMap<String, FieldDescribe>>>,
    rejector: RwLock<Option<Rejector<R>>>,
    accepted: Mutex<Vec<R>>,
    calls: Mutex<Vec<WriteCall>>,
    unavailable_calls: AtomicUsize,
    next_id: AtomicUsize,
    quota: StoreQuota,
}

impl<R: Record> InMemoryRecordStore<R> {
    pub fn new() -> Self {
        Self::with_quota(StoreQuota::default())
    }

    pub fn with_quota(quota: StoreQuota) -> Self {
        Self {
            schema: RwLock::new(HashMap::new()),
            rejector: RwLock::new(None),
            accepted: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            unavailable_calls: AtomicUsize::new(0),
            next_id: AtomicUsize::new(1),
            quota,
        }
    }

    /// Register a field on an entity type.
    pub fn define_field(&self, entity_type: impl Into<String>, field: FieldDescribe) {
        let mut schema = self.schema.write().unwrap_or_else(|e| e.into_inner());
        schema
            .entry(entity_type.into())
            .or_default()
            .insert(field.name.clone(), field);
    }

    pub fn with_field(self, entity_type: impl Into<String>, field: FieldDescribe) -> Self {
        self.define_field(entity_type, field);
        self
    }

    /// Install (or replace) the per-record rejection rule.
    pub fn set_rejector<F>(&self, rejector: F)
    where
        F: Fn(&R, OperationKind) -> Option<String> + Send + Sync + 'static,
    {
        *self.rejector.write().unwrap_or_else(|e| e.into_inner()) = Some(Box::new(rejector));
    }

    pub fn clear_rejector(&self) {
        *self.rejector.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// Make the next `n` write calls fail as a whole with `Unavailable`.
    pub fn fail_next_calls(&self, n: usize) {
        self.unavailable_calls.store(n, Ordering::SeqCst);
    }

    /// Records accepted so far, in write order.
    pub fn accepted(&self) -> Vec<R> {
        self.accepted.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn calls(&self) -> Vec<WriteCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn take_unavailable(&self) -> bool {
        self.unavailable_calls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl<R: Record> Default for InMemoryRecordStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> std::fmt::Debug for InMemoryRecordStore<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryRecordStore")
            .field("quota", &self.quota)
            .finish_non_exhaustive()
    }
}

impl<R: Record> RecordStore<R> for InMemoryRecordStore<R> {
    fn write(
        &self,
        records: &[R],
        kind: OperationKind,
        external_id_field: Option<&str>,
    ) -> Result<Vec<RecordOutcome>, StoreError> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(WriteCall {
                kind,
                entity_type: records
                    .first()
                    .map(|r| r.entity_type().to_string())
                    .unwrap_or_default(),
                record_count: records.len(),
                external_id_field: external_id_field.map(str::to_string),
            });

        if self.take_unavailable() {
            return Err(StoreError::Unavailable("simulated outage".to_string()));
        }

        let rejector = self.rejector.read().unwrap_or_else(|e| e.into_inner());
        let mut accepted = self.accepted.lock().unwrap_or_else(|e| e.into_inner());

        let outcomes = records
            .iter()
            .map(|record| {
                if matches!(kind, OperationKind::Update | OperationKind::Delete)
                    && record.record_id().is_none()
                {
                    return RecordOutcome::failure("MISSING_ID: record has no identity");
                }

                if let Some(message) = rejector.as_ref().and_then(|reject| reject(record, kind)) {
                    return RecordOutcome::failure(message);
                }

                accepted.push(record.clone());
                let id = record.record_id().cloned().unwrap_or_else(|| {
                    let n = self.next_id.fetch_add(1, Ordering::SeqCst);
                    RecordId::new(format!("mem-{n:08}"))
                });
                RecordOutcome::success(Some(id))
            })
            .collect();

        Ok(outcomes)
    }

    fn describe_field(&self, entity_type: &str, field: &str) -> Option<FieldDescribe> {
        let schema = self.schema.read().unwrap_or_else(|e| e.into_inner());
        schema.get(entity_type).and_then(|fields| fields.get(field)).cloned()
    }

    fn quota(&self) -> StoreQuota {
        self.quota
    }
}
