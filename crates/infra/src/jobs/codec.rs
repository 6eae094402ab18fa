//! JSON codec for persisted retry payloads.

use bulkdml_core::{BulkError, Record};

/// Codec error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("failed to encode records: {0}")]
    Encode(String),
    #[error("failed to decode '{entity_type}' records: {message}")]
    Decode { entity_type: String, message: String },
    #[error("payload record at index {index} has entity type '{found}', expected '{expected}'")]
    EntityTypeMismatch {
        index: usize,
        expected: String,
        found: String,
    },
}

impl From<CodecError> for BulkError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Encode(_) => BulkError::scheduling(err.to_string()),
            CodecError::Decode { .. } | CodecError::EntityTypeMismatch { .. } => {
                BulkError::deserialization(err.to_string())
            }
        }
    }
}

/// Encodes record batches as a JSON array and decodes them into a concrete
/// record type chosen by the caller.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonRecordCodec;

impl JsonRecordCodec {
    pub fn encode<R: Record>(records: &[R]) -> Result<String, CodecError> {
        serde_json::to_string(records).map_err(|e| CodecError::Encode(e.to_string()))
    }

    /// Decode `payload` as `R` and check every record declares `entity_type`.
    pub fn decode<R: Record>(payload: &str, entity_type: &str) -> Result<Vec<R>, CodecError> {
        let records: Vec<R> = serde_json::from_str(payload).map_err(|e| CodecError::Decode {
            entity_type: entity_type.to_string(),
            message: e.to_string(),
        })?;

        if let Some((index, record)) = records
            .iter()
            .enumerate()
            .find(|(_, r)| r.entity_type() != entity_type)
        {
            return Err(CodecError::EntityTypeMismatch {
                index,
                expected: entity_type.to_string(),
                found: record.entity_type().to_string(),
            });
        }

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bulkdml_core::SObject;
    use proptest::prelude::*;

    #[test]
    fn corrupt_payload_is_a_decode_error() {
        let err = JsonRecordCodec::decode::<SObject>("{not json", "Account").unwrap_err();
        assert!(matches!(err, CodecError::Decode { .. }));
        assert!(matches!(BulkError::from(err), BulkError::Deserialization(_)));
    }

    #[test]
    fn wrong_entity_type_is_rejected() {
        let payload =
            JsonRecordCodec::encode(&[SObject::new("Account"), SObject::new("Contact")]).unwrap();
        let err = JsonRecordCodec::decode::<SObject>(&payload, "Account").unwrap_err();
        assert_eq!(
            err,
            CodecError::EntityTypeMismatch {
                index: 1,
                expected: "Account".to_string(),
                found: "Contact".to_string(),
            }
        );
    }

    fn arb_record() -> impl Strategy<Value = SObject> {
        (
            prop::option::of("[a-zA-Z0-9]{15,18}"),
            prop::collection::btree_map("[A-Z][a-z]{1,8}(__c)?", any::<i64>(), 0..6),
            prop::collection::btree_map("[A-Z][a-z]{1,8}", ".{0,20}", 0..4),
        )
            .prop_map(|(id, numbers, texts)| {
                let mut record = SObject::new("Account");
                if let Some(id) = id {
                    record = record.with_id(id);
                }
                for (name, value) in numbers {
                    record = record.with_field(name, value);
                }
                for (name, value) in texts {
                    record = record.with_field(format!("{name}Text"), value);
                }
                record
            })
    }

    proptest! {
        /// Property: decoding an encoded batch reproduces every field value.
        #[test]
        fn decode_inverts_encode(records in prop::collection::vec(arb_record(), 0..20)) {
            let payload = JsonRecordCodec::encode(&records).unwrap();
            let decoded = JsonRecordCodec::decode::<SObject>(&payload, "Account").unwrap();
            prop_assert_eq!(decoded, records);
        }
    }
}
