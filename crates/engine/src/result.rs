//! Aggregated outcome of a `process` call.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use bulkdml_core::{BulkError, Record, RecordKey, RetryJobId};

/// One record the store rejected, with the first error seen for it.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedRecord<R> {
    pub key: RecordKey,
    pub record: R,
    pub error: String,
    pub chunk_index: usize,
}

/// A chunk that never reached the store, or whose whole call was refused.
///
/// Its records are neither counted as successes nor added to the failed set;
/// structural problems are not retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkError {
    pub chunk_index: usize,
    pub record_count: usize,
    pub error: BulkError,
}

/// Failed records deduplicated by [`RecordKey`], in first-seen order.
///
/// Re-encountering the same logical failure (same identity, or same content
/// for records without identity) never grows the set.
#[derive(Debug, Clone)]
pub struct FailedRecordSet<R> {
    entries: Vec<FailedRecord<R>>,
    keys: HashSet<RecordKey>,
}

impl<R: Record> FailedRecordSet<R> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            keys: HashSet::new(),
        }
    }

    /// Insert a failure; returns `false` if its key was already present.
    pub fn insert(&mut self, record: R, error: impl Into<String>, chunk_index: usize) -> bool {
        let key = record.record_key();
        if !self.keys.insert(key.clone()) {
            return false;
        }
        self.entries.push(FailedRecord {
            key,
            record,
            error: error.into(),
            chunk_index,
        });
        true
    }

    pub fn contains(&self, key: &RecordKey) -> bool {
        self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FailedRecord<R>> {
        self.entries.iter()
    }

    pub fn records(&self) -> Vec<R> {
        self.entries.iter().map(|f| f.record.clone()).collect()
    }

    pub fn into_records(self) -> Vec<R> {
        self.entries.into_iter().map(|f| f.record).collect()
    }

    /// First error message, used as a summary for the whole set.
    pub fn first_error(&self) -> Option<&str> {
        self.entries.first().map(|f| f.error.as_str())
    }
}

impl<R: Record> Default for FailedRecordSet<R> {
    fn default() -> Self {
        Self::new()
    }
}

/// What a `process` call wrote and what it could not.
#[derive(Debug, Clone)]
pub struct ExecutionResult<R> {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub chunk_count: usize,
    pub success_count: usize,
    pub failed_records: FailedRecordSet<R>,
    /// Chunks aborted by a structural error, in chunk order.
    pub chunk_errors: Vec<ChunkError>,
    /// Bounded, timestamped run log.
    pub log: String,
    /// Retry job created for the failures, if one was scheduled.
    pub retry_job: Option<RetryJobId>,
    /// Why scheduling a retry failed, if it did. Write outcomes above are
    /// still accurate in that case.
    pub retry_error: Option<String>,
}

impl<R: Record> ExecutionResult<R> {
    pub fn failure_count(&self) -> usize {
        self.failed_records.len()
    }

    /// `true` when every chunk was written and no record is left failing.
    pub fn is_complete(&self) -> bool {
        self.failed_records.is_empty() && self.chunk_errors.is_empty()
    }

    /// The first structural error, if any chunk was aborted.
    pub fn first_chunk_error(&self) -> Option<&BulkError> {
        self.chunk_errors.first().map(|c| &c.error)
    }

    /// Records that never got a per-record outcome.
    pub fn aborted_record_count(&self) -> usize {
        self.chunk_errors.iter().map(|c| c.record_count).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bulkdml_core::SObject;
    use proptest::prelude::*;

    #[test]
    fn duplicate_identity_is_ignored() {
        let mut set = FailedRecordSet::new();
        assert!(set.insert(SObject::new("Account").with_id("001A"), "LOCKED", 0));
        assert!(!set.insert(
            SObject::new("Account").with_id("001A").with_field("Name", "changed"),
            "LOCKED",
            3
        ));

        assert_eq!(set.len(), 1);
        assert_eq!(set.iter().next().unwrap().chunk_index, 0);
        assert_eq!(set.first_error(), Some("LOCKED"));
    }

    proptest! {
        /// Property: no two entries share a key, whatever the insertion pattern.
        #[test]
        fn keys_are_unique(ids in prop::collection::vec(0u8..20, 0..200)) {
            let mut set = FailedRecordSet::new();
            for (chunk, id) in ids.iter().enumerate() {
                let record = if id % 2 == 0 {
                    SObject::new("Account").with_id(format!("001{id}"))
                } else {
                    SObject::new("Account").with_field("Seq", *id as i64)
                };
                set.insert(record, "ERR", chunk);
            }

            let distinct: HashSet<_> = ids.iter().collect();
            prop_assert_eq!(set.len(), distinct.len());
            let keys: HashSet<_> = set.iter().map(|f| f.key.clone()).collect();
            prop_assert_eq!(keys.len(), set.len());
        }
    }
}
