//! Records: the unit of data written by the pipeline.
//!
//! A record is value-like. The pipeline only ever reads its entity type and
//! identity; field contents are opaque except for serialization.

use std::collections::BTreeMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::id::RecordId;

/// Key used to deduplicate failed records.
///
/// Persisted records are keyed by their store identity; records without one
/// (e.g. a failed insert) fall back to a hash of their serialized content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordKey {
    Id(RecordId),
    Content(u64),
}

impl core::fmt::Display for RecordKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            RecordKey::Id(id) => write!(f, "id:{id}"),
            RecordKey::Content(hash) => write!(f, "content:{hash:016x}"),
        }
    }
}

/// A typed entity that can be written to a record store.
///
/// `Serialize + DeserializeOwned` is required so failed sub-batches can be
/// persisted for deferred retries and rehydrated into the same concrete type.
pub trait Record: Clone + core::fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Name of the entity type (e.g. `"Account"`). Batches are homogeneous on this.
    fn entity_type(&self) -> &str;

    /// Store identity, present once the record has been persisted.
    fn record_id(&self) -> Option<&RecordId>;

    /// Deduplication key: identity if present, else a content hash.
    fn record_key(&self) -> RecordKey {
        match self.record_id() {
            Some(id) => RecordKey::Id(id.clone()),
            None => RecordKey::Content(content_hash(self)),
        }
    }
}

/// Stable-within-process hash of a record's serialized form.
///
/// Falls back to the `Debug` rendering if serialization fails so the key is
/// always defined.
pub fn content_hash<R: Record>(record: &R) -> u64 {
    let mut hasher = DefaultHasher::new();
    match serde_json::to_vec(record) {
        Ok(bytes) => bytes.hash(&mut hasher),
        Err(_) => format!("{record:?}").hash(&mut hasher),
    }
    hasher.finish()
}

/// Dynamically-shaped record: an entity type name plus named fields.
///
/// Useful when the set of entity types is only known at runtime. Fields are
/// kept in a `BTreeMap` so the serialized form (and therefore the content
/// hash) is independent of insertion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SObject {
    pub entity_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,
    #[serde(default)]
    pub fields: BTreeMap<String, JsonValue>,
}

impl SObject {
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            id: None,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<RecordId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn field(&self, name: &str) -> Option<&JsonValue> {
        self.fields.get(name)
    }
}

impl Record for SObject {
    fn entity_type(&self) -> &str {
        &self.entity_type
    }

    fn record_id(&self) -> Option<&RecordId> {
        self.id.as_ref()
    }
}
