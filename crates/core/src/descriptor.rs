//! Operation descriptors: what to do with a batch.

use serde::{Deserialize, Serialize};

use crate::error::{BulkError, BulkResult};

/// Bulk write operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// Insert new records.
    Insert,
    /// Update existing records by identity.
    Update,
    /// Insert or update records matched on an external id field.
    Upsert,
    /// Delete records by identity.
    Delete,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::Insert => "insert",
            OperationKind::Update => "update",
            OperationKind::Upsert => "upsert",
            OperationKind::Delete => "delete",
        }
    }
}

impl core::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for OperationKind {
    type Err = BulkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "insert" => Ok(OperationKind::Insert),
            "update" => Ok(OperationKind::Update),
            "upsert" => Ok(OperationKind::Upsert),
            "delete" => Ok(OperationKind::Delete),
            other => Err(BulkError::validation(format!(
                "unknown operation kind: {other}"
            ))),
        }
    }
}

/// Immutable description of a bulk operation.
///
/// Construct through [`OperationDescriptor::insert`] and friends, which
/// enforce that `external_id_field` is present exactly when the operation is
/// an upsert. Fields are private so a descriptor cannot drift after creation;
/// deserialized descriptors should be checked with [`validate`](Self::validate).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationDescriptor {
    kind: OperationKind,
    entity_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    external_id_field: Option<String>,
}

impl OperationDescriptor {
    pub fn new(
        kind: OperationKind,
        entity_type: impl Into<String>,
        external_id_field: Option<String>,
    ) -> BulkResult<Self> {
        let descriptor = Self {
            kind,
            entity_type: entity_type.into(),
            external_id_field,
        };
        descriptor.validate()?;
        Ok(descriptor)
    }

    pub fn insert(entity_type: impl Into<String>) -> BulkResult<Self> {
        Self::new(OperationKind::Insert, entity_type, None)
    }

    pub fn update(entity_type: impl Into<String>) -> BulkResult<Self> {
        Self::new(OperationKind::Update, entity_type, None)
    }

    pub fn upsert(
        entity_type: impl Into<String>,
        external_id_field: impl Into<String>,
    ) -> BulkResult<Self> {
        Self::new(
            OperationKind::Upsert,
            entity_type,
            Some(external_id_field.into()),
        )
    }

    pub fn delete(entity_type: impl Into<String>) -> BulkResult<Self> {
        Self::new(OperationKind::Delete, entity_type, None)
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn external_id_field(&self) -> Option<&str> {
        self.external_id_field.as_deref()
    }

    /// Check the descriptor is well-formed.
    pub fn validate(&self) -> BulkResult<()> {
        if self.entity_type.trim().is_empty() {
            return Err(BulkError::validation("entity type name must not be blank"));
        }

        match (self.kind, self.external_id_field.as_deref()) {
            (OperationKind::Upsert, None) => Err(BulkError::validation(
                "upsert requires an external id field",
            )),
            (OperationKind::Upsert, Some(field)) if field.trim().is_empty() => Err(
                BulkError::validation("upsert external id field must not be blank"),
            ),
            (OperationKind::Upsert, Some(_)) => Ok(()),
            (kind, Some(field)) => Err(BulkError::validation(format!(
                "external id field '{field}' is only valid for upsert (got {kind})"
            ))),
            (_, None) => Ok(()),
        }
    }
}
