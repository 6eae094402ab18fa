//! Record store boundary.
//!
//! The store is a black box exposing a bulk write with **per-record partial
//! failure** semantics and a field schema lookup. A write call only fails as a
//! whole for request-level problems; a single bad record never aborts the call.

pub mod in_memory;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use bulkdml_core::{OperationKind, Record, RecordId};

pub use in_memory::InMemoryRecordStore;

/// The store's independent verdict for one record in a bulk call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RecordOutcome {
    Success { id: Option<RecordId> },
    Failure { message: String },
}

impl RecordOutcome {
    pub fn success(id: Option<RecordId>) -> Self {
        Self::Success { id }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self::Failure {
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RecordOutcome::Success { .. })
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            RecordOutcome::Failure { message } => Some(message),
            RecordOutcome::Success { .. } => None,
        }
    }
}

/// Schema information for one field of an entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescribe {
    pub name: String,
    /// Field is flagged as an external id by the store.
    pub external_id: bool,
    /// Field carries a uniqueness constraint.
    pub unique: bool,
}

impl FieldDescribe {
    pub fn plain(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            external_id: false,
            unique: false,
        }
    }

    pub fn external_id(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            external_id: true,
            unique: true,
        }
    }

    /// Whether upserts may match on this field.
    pub fn is_upsert_key(&self) -> bool {
        self.external_id || self.unique
    }
}

/// Hard per-call limits enforced by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreQuota {
    pub max_records_per_call: usize,
    /// Maximum serialized payload size of one call (JSON array of records).
    pub max_payload_bytes: Option<usize>,
}

impl Default for StoreQuota {
    fn default() -> Self {
        Self {
            max_records_per_call: 10_000,
            max_payload_bytes: None,
        }
    }
}

/// Request-level store failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The call could not be completed right now (timeout, lock contention,
    /// throttling). Every record in the call is treated as failed.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// The store refused the request itself (unsupported operation, unknown
    /// entity type). Retrying will not help.
    #[error("request rejected: {0}")]
    Rejected(String),
}

/// Bulk write primitive + schema lookup.
///
/// `write` must return exactly one outcome per input record, in input order.
pub trait RecordStore<R: Record>: Send + Sync {
    fn write(
        &self,
        records: &[R],
        kind: OperationKind,
        external_id_field: Option<&str>,
    ) -> Result<Vec<RecordOutcome>, StoreError>;

    /// Look up a field; `None` if the entity type has no such field.
    fn describe_field(&self, entity_type: &str, field: &str) -> Option<FieldDescribe>;

    /// Convenience wrapper over [`describe_field`](Self::describe_field).
    fn field_exists(&self, entity_type: &str, field: &str) -> bool {
        self.describe_field(entity_type, field).is_some()
    }

    fn quota(&self) -> StoreQuota {
        StoreQuota::default()
    }
}

impl<R, S> RecordStore<R> for Arc<S>
where
    R: Record,
    S: RecordStore<R> + ?Sized,
{
    fn write(
        &self,
        records: &[R],
        kind: OperationKind,
        external_id_field: Option<&str>,
    ) -> Result<Vec<RecordOutcome>, StoreError> {
        (**self).write(records, kind, external_id_field)
    }

    fn describe_field(&self, entity_type: &str, field: &str) -> Option<FieldDescribe> {
        (**self).describe_field(entity_type, field)
    }

    fn quota(&self) -> StoreQuota {
        (**self).quota()
    }
}
