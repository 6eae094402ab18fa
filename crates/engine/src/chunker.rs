//! Quota-aware batch splitting.
//!
//! Both splitters consume the batch and hand records out in order: the
//! concatenation of the returned chunks is always the input sequence.

use serde::Serialize;

use bulkdml_core::{BulkError, BulkResult, Record};

/// Ordered, homogeneous slice of a batch sized for one store call.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk<R> {
    index: usize,
    entity_type: String,
    records: Vec<R>,
}

impl<R> Chunk<R> {
    /// Position of this chunk in its split (0-based).
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn records(&self) -> &[R] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn into_records(self) -> Vec<R> {
        self.records
    }
}

/// Record-count and byte limits for one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkQuota {
    max_records: usize,
    max_bytes: usize,
}

impl ChunkQuota {
    pub fn new(max_records: i64, max_bytes: usize) -> BulkResult<Self> {
        let max_records = validate_chunk_size(max_records)?;
        if max_bytes == 0 {
            return Err(BulkError::validation(
                "chunk byte limit must be positive (got 0)",
            ));
        }
        Ok(Self {
            max_records,
            max_bytes,
        })
    }

    pub fn max_records(&self) -> usize {
        self.max_records
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }
}

/// Validate a caller-supplied chunk size.
pub fn validate_chunk_size(chunk_size: i64) -> BulkResult<usize> {
    usize::try_from(chunk_size)
        .ok()
        .filter(|n| *n > 0)
        .ok_or_else(|| {
            BulkError::validation(format!("chunk size must be positive (got {chunk_size})"))
        })
}

/// Split `records` into chunks of exactly `chunk_size` records (the last
/// chunk may be shorter).
///
/// Fails with a validation error if `chunk_size <= 0` or the batch mixes
/// entity types. An empty batch yields no chunks.
pub fn split<R: Record>(records: Vec<R>, chunk_size: i64) -> BulkResult<Vec<Chunk<R>>> {
    let chunk_size = validate_chunk_size(chunk_size)?;
    let Some(entity_type) = homogeneous_entity_type(&records)? else {
        return Ok(Vec::new());
    };

    let mut chunks = Vec::with_capacity(records.len().div_ceil(chunk_size));
    let mut current = Vec::with_capacity(chunk_size.min(records.len()));

    for record in records {
        current.push(record);
        if current.len() == chunk_size {
            let full = std::mem::replace(&mut current, Vec::with_capacity(chunk_size));
            chunks.push(make_chunk(chunks.len(), &entity_type, full));
        }
    }
    if !current.is_empty() {
        chunks.push(make_chunk(chunks.len(), &entity_type, current));
    }

    Ok(chunks)
}

/// Split `records` so that no chunk exceeds either the record count or the
/// serialized byte size (as a JSON array) of `quota`.
///
/// A single record whose serialized form alone exceeds the byte limit cannot
/// be placed in any chunk and fails the split with a validation error.
pub fn split_by_quota<R: Record>(records: Vec<R>, quota: ChunkQuota) -> BulkResult<Vec<Chunk<R>>> {
    let Some(entity_type) = homogeneous_entity_type(&records)? else {
        return Ok(Vec::new());
    };

    let mut chunks = Vec::new();
    let mut current: Vec<R> = Vec::new();
    let mut current_bytes = 0usize;

    for (idx, record) in records.into_iter().enumerate() {
        let record_bytes = serialized_len(&record).map_err(|e| {
            BulkError::validation(format!("record at index {idx} could not be serialized: {e}"))
        })?;

        if array_len(1, record_bytes) > quota.max_bytes {
            return Err(BulkError::validation(format!(
                "record at index {idx} is {record_bytes} bytes, larger than the chunk limit of {} bytes",
                quota.max_bytes
            )));
        }

        let would_be = array_len(current.len() + 1, current_bytes + record_bytes);
        if !current.is_empty() && (current.len() == quota.max_records || would_be > quota.max_bytes)
        {
            let full = std::mem::take(&mut current);
            chunks.push(make_chunk(chunks.len(), &entity_type, full));
            current_bytes = 0;
        }

        current_bytes += record_bytes;
        current.push(record);
    }
    if !current.is_empty() {
        chunks.push(make_chunk(chunks.len(), &entity_type, current));
    }

    Ok(chunks)
}

/// Size of a JSON array holding `count` elements totalling `element_bytes`.
fn array_len(count: usize, element_bytes: usize) -> usize {
    2 + element_bytes + count.saturating_sub(1)
}

pub(crate) fn serialized_len<T: Serialize + ?Sized>(value: &T) -> Result<usize, serde_json::Error> {
    serde_json::to_vec(value).map(|bytes| bytes.len())
}

fn homogeneous_entity_type<R: Record>(records: &[R]) -> BulkResult<Option<String>> {
    let Some(first) = records.first() else {
        return Ok(None);
    };
    let expected = first.entity_type();

    if let Some((idx, odd)) = records
        .iter()
        .enumerate()
        .find(|(_, r)| r.entity_type() != expected)
    {
        return Err(BulkError::validation(format!(
            "batch is not homogeneous: record at index {idx} has entity type '{}', expected '{expected}'",
            odd.entity_type()
        )));
    }

    Ok(Some(expected.to_string()))
}

fn make_chunk<R>(index: usize, entity_type: &str, records: Vec<R>) -> Chunk<R> {
    Chunk {
        index,
        entity_type: entity_type.to_string(),
        records,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bulkdml_core::SObject;
    use proptest::prelude::*;

    fn accounts(n: usize) -> Vec<SObject> {
        (0..n)
            .map(|i| SObject::new("Account").with_field("Seq", i as i64))
            .collect()
    }

    #[test]
    fn splits_250_into_100_100_50() {
        let chunks = split(accounts(250), 100).unwrap();
        let sizes: Vec<_> = chunks.iter().map(Chunk::len).collect();
        assert_eq!(sizes, vec![100, 100, 50]);
        assert_eq!(chunks[2].index(), 2);
        assert_eq!(chunks[0].entity_type(), "Account");
    }

    #[test]
    fn empty_batch_yields_no_chunks() {
        assert!(split(Vec::<SObject>::new(), 10).unwrap().is_empty());
    }

    #[test]
    fn non_positive_chunk_size_is_rejected() {
        for size in [0, -1] {
            let err = split(accounts(3), size).unwrap_err();
            assert!(err.is_validation());
            assert!(err.to_string().contains(&format!("got {size}")));
        }
        // Even an empty batch is rejected: the size is checked first.
        assert!(split(Vec::<SObject>::new(), 0).is_err());
    }

    #[test]
    fn mixed_entity_types_are_rejected() {
        let mut records = accounts(2);
        records.push(SObject::new("Contact"));

        let err = split(records, 10).unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("'Contact'"));
    }

    #[test]
    fn byte_quota_closes_chunks_early() {
        let records: Vec<SObject> = (0..6)
            .map(|i| SObject::new("Note").with_field("Body", "x".repeat(40 + i)))
            .collect();
        let one = serialized_len(&records[0]).unwrap();
        let quota = ChunkQuota::new(100, 3 * one).unwrap();

        let chunks = split_by_quota(records.clone(), quota).unwrap();
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(serialized_len(chunk.records()).unwrap() <= quota.max_bytes());
        }
        let flat: Vec<_> = chunks.into_iter().flat_map(Chunk::into_records).collect();
        assert_eq!(flat, records);
    }

    #[test]
    fn record_larger_than_byte_quota_is_rejected() {
        let records = vec![SObject::new("Note").with_field("Body", "x".repeat(500))];
        let err = split_by_quota(records, ChunkQuota::new(10, 100).unwrap()).unwrap_err();
        assert!(err.to_string().contains("larger than the chunk limit"));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            ..ProptestConfig::default()
        })]

        /// Property: chunk count is ceil(n / size), every chunk but the last is
        /// full, and concatenation reproduces the input.
        #[test]
        fn split_partitions_in_order(n in 1usize..400, size in 1i64..120) {
            let records = accounts(n);
            let chunks = split(records.clone(), size).unwrap();
            let size = size as usize;

            prop_assert_eq!(chunks.len(), n.div_ceil(size));
            for chunk in &chunks[..chunks.len() - 1] {
                prop_assert_eq!(chunk.len(), size);
            }
            let last = chunks.last().unwrap().len();
            prop_assert!(last >= 1 && last <= size);

            let flat: Vec<_> = chunks.into_iter().flat_map(Chunk::into_records).collect();
            prop_assert_eq!(flat, records);
        }

        /// Property: byte-aware splitting honours both limits and preserves order.
        #[test]
        fn split_by_quota_respects_limits(
            bodies in prop::collection::vec(0usize..64, 1..80),
            max_records in 1i64..20,
        ) {
            let records: Vec<SObject> = bodies
                .iter()
                .map(|len| SObject::new("Note").with_field("Body", "y".repeat(*len)))
                .collect();
            let quota = ChunkQuota::new(max_records, 512).unwrap();
            let chunks = split_by_quota(records.clone(), quota).unwrap();

            for chunk in &chunks {
                prop_assert!(!chunk.is_empty());
                prop_assert!(chunk.len() <= quota.max_records());
                prop_assert!(serialized_len(chunk.records()).unwrap() <= quota.max_bytes());
            }
            let flat: Vec<_> = chunks.into_iter().flat_map(Chunk::into_records).collect();
            prop_assert_eq!(flat, records);
        }
    }
}
