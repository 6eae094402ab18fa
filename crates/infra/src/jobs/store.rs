//! Retry job storage.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;

use bulkdml_core::{BulkError, RetryJobId};

use super::types::{JobFinish, RetryJob, RetryJobStatus};

/// Retry job store abstraction.
///
/// Status changes go through [`try_claim`](Self::try_claim) and
/// [`finish`](Self::finish) only; both are conditional on the current status
/// so two runners can never advance the same job.
pub trait RetryJobStore: Send + Sync {
    /// Persist a new job.
    fn insert(&self, job: RetryJob) -> Result<RetryJobId, JobStoreError>;

    /// Get a job by ID.
    fn get(&self, id: RetryJobId) -> Result<Option<RetryJob>, JobStoreError>;

    /// Delete a job only if it is still `Pending`. Returns whether a row was
    /// removed.
    fn delete_pending(&self, id: RetryJobId) -> Result<bool, JobStoreError>;

    /// Atomically transition `Pending → Running`.
    ///
    /// Returns the claimed job, or `None` if the job is missing or not pending.
    fn try_claim(&self, id: RetryJobId) -> Result<Option<RetryJob>, JobStoreError>;

    /// Transition a `Running` job to its terminal state.
    fn finish(&self, id: RetryJobId, finish: JobFinish) -> Result<RetryJob, JobStoreError>;

    /// List jobs by status, oldest first.
    fn list_by_status(
        &self,
        status: Option<RetryJobStatus>,
        limit: usize,
    ) -> Result<Vec<RetryJob>, JobStoreError>;

    /// Get job statistics.
    fn stats(&self) -> Result<JobStats, JobStoreError>;

    /// Every job in the retry chain containing `id`, first attempt first.
    fn chain(&self, id: RetryJobId) -> Result<Vec<RetryJob>, JobStoreError> {
        let Some(mut current) = self.get(id)? else {
            return Err(JobStoreError::NotFound(id));
        };

        while let Some(prev) = current.predecessor_id {
            match self.get(prev)? {
                Some(job) => current = job,
                None => break,
            }
        }

        let mut chain = vec![current];
        while let Some(next) = chain.last().and_then(|j| j.successor_id) {
            match self.get(next)? {
                Some(job) if !chain.iter().any(|j| j.id == job.id) => chain.push(job),
                _ => break,
            }
        }
        Ok(chain)
    }
}

/// Job store error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobStoreError {
    #[error("retry job not found: {0}")]
    NotFound(RetryJobId),
    #[error("retry job already exists: {0}")]
    AlreadyExists(RetryJobId),
    #[error("retry job {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: RetryJobId,
        from: RetryJobStatus,
        to: RetryJobStatus,
    },
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<JobStoreError> for BulkError {
    fn from(err: JobStoreError) -> Self {
        BulkError::store(err.to_string())
    }
}

/// Job statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct JobStats {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    /// Failed jobs that handed their records to a successor.
    pub superseded: usize,
}

impl JobStats {
    pub fn total(&self) -> usize {
        self.pending + self.running + self.completed + self.failed
    }
}

/// In-memory job store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryRetryJobStore {
    jobs: RwLock<HashMap<RetryJobId, RetryJob>>,
}

impl InMemoryRetryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn len(&self) -> usize {
        self.read().map(|jobs| jobs.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<RetryJobId, RetryJob>>, JobStoreError> {
        self.jobs
            .read()
            .map_err(|_| JobStoreError::Storage("retry job lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<RetryJobId, RetryJob>>, JobStoreError> {
        self.jobs
            .write()
            .map_err(|_| JobStoreError::Storage("retry job lock poisoned".to_string()))
    }
}

impl RetryJobStore for InMemoryRetryJobStore {
    fn insert(&self, job: RetryJob) -> Result<RetryJobId, JobStoreError> {
        let mut jobs = self.write()?;
        if jobs.contains_key(&job.id) {
            return Err(JobStoreError::AlreadyExists(job.id));
        }
        let id = job.id;
        jobs.insert(id, job);
        Ok(id)
    }

    fn get(&self, id: RetryJobId) -> Result<Option<RetryJob>, JobStoreError> {
        Ok(self.read()?.get(&id).cloned())
    }

    fn delete_pending(&self, id: RetryJobId) -> Result<bool, JobStoreError> {
        let mut jobs = self.write()?;
        match jobs.get(&id) {
            Some(job) if job.status == RetryJobStatus::Pending => {
                jobs.remove(&id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn try_claim(&self, id: RetryJobId) -> Result<Option<RetryJob>, JobStoreError> {
        let mut jobs = self.write()?;
        match jobs.get_mut(&id) {
            Some(job) if job.status == RetryJobStatus::Pending => {
                job.status = RetryJobStatus::Running;
                job.updated_at = Utc::now();
                Ok(Some(job.clone()))
            }
            _ => Ok(None),
        }
    }

    fn finish(&self, id: RetryJobId, finish: JobFinish) -> Result<RetryJob, JobStoreError> {
        let mut jobs = self.write()?;
        let job = jobs.get_mut(&id).ok_or(JobStoreError::NotFound(id))?;
        if job.status != RetryJobStatus::Running {
            return Err(JobStoreError::InvalidTransition {
                id,
                from: job.status,
                to: finish.status(),
            });
        }
        finish.apply(job);
        Ok(job.clone())
    }

    fn list_by_status(
        &self,
        status: Option<RetryJobStatus>,
        limit: usize,
    ) -> Result<Vec<RetryJob>, JobStoreError> {
        let jobs = self.read()?;
        let mut result: Vec<_> = jobs
            .values()
            .filter(|j| status.is_none_or(|s| j.status == s))
            .cloned()
            .collect();

        result.sort_by_key(|j| (j.created_at, j.id));
        result.truncate(limit);
        Ok(result)
    }

    fn stats(&self) -> Result<JobStats, JobStoreError> {
        let jobs = self.read()?;
        let mut stats = JobStats::default();

        for job in jobs.values() {
            match job.status {
                RetryJobStatus::Pending => stats.pending += 1,
                RetryJobStatus::Running => stats.running += 1,
                RetryJobStatus::Completed => stats.completed += 1,
                RetryJobStatus::Failed => {
                    stats.failed += 1;
                    if job.successor_id.is_some() {
                        stats.superseded += 1;
                    }
                }
            }
        }

        Ok(stats)
    }
}

impl<S: RetryJobStore + ?Sized> RetryJobStore for Arc<S> {
    fn insert(&self, job: RetryJob) -> Result<RetryJobId, JobStoreError> {
        (**self).insert(job)
    }

    fn get(&self, id: RetryJobId) -> Result<Option<RetryJob>, JobStoreError> {
        (**self).get(id)
    }

    fn delete_pending(&self, id: RetryJobId) -> Result<bool, JobStoreError> {
        (**self).delete_pending(id)
    }

    fn try_claim(&self, id: RetryJobId) -> Result<Option<RetryJob>, JobStoreError> {
        (**self).try_claim(id)
    }

    fn finish(&self, id: RetryJobId, finish: JobFinish) -> Result<RetryJob, JobStoreError> {
        (**self).finish(id, finish)
    }

    fn list_by_status(
        &self,
        status: Option<RetryJobStatus>,
        limit: usize,
    ) -> Result<Vec<RetryJob>, JobStoreError> {
        (**self).list_by_status(status, limit)
    }

    fn stats(&self) -> Result<JobStats, JobStoreError> {
        (**self).stats()
    }

    fn chain(&self, id: RetryJobId) -> Result<Vec<RetryJob>, JobStoreError> {
        (**self).chain(id)
    }
}
