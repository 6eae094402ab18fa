//! Deferred retries of failed sub-batches.
//!
//! ## Design
//!
//! - Failed records are persisted as a `RetryJob` row (JSON payload plus the
//!   entity type name) before anything is scheduled
//! - Each rerun is a new row chained to its predecessor; rows are never
//!   moved back to `Pending`
//! - A conditional `Pending → Running` claim makes duplicate invocations harmless
//! - Reruns are exponential-backoff delayed, capped at `RetryConfig::max_delay`
//!
//! ## Components
//!
//! - `RetryHandler`: validates, persists and schedules retry jobs
//! - `ScheduledRetryRunner`: claims a job, reruns it, settles its status
//! - `RetryJobStore`: persistence for jobs (in-memory or Postgres)
//! - `JobScheduler`: deferred invocation (inline, queued, background thread)
//! - `RecordTypeRegistry`: entity type name → typed replay

pub mod codec;
pub mod handler;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod registry;
pub mod runner;
pub mod runtime;
pub mod scheduler;
pub mod store;
pub mod types;

pub use codec::{CodecError, JsonRecordCodec};
pub use handler::{RetryHandler, SerializedRetry};
#[cfg(feature = "postgres")]
pub use postgres::PostgresRetryJobStore;
pub use registry::{RecordTypeRegistry, ReplayOutcome, ReplayTarget, TypedReplay};
pub use runner::{RunOutcome, ScheduledRetryRunner};
pub use runtime::RetryRuntime;
pub use scheduler::{
    InlineScheduler, JobHandle, JobScheduler, QueuedScheduler, SchedulerError, ThreadScheduler,
    UnitOfWork,
};
pub use store::{InMemoryRetryJobStore, JobStats, JobStoreError, RetryJobStore};
pub use types::{Backoff, JobFinish, RetryJob, RetryJobStatus};
