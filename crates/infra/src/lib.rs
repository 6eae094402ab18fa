//! Infrastructure layer: retry job persistence, scheduling, config.
//!
//! ```text
//! Processor ──RetrySink──> RetryHandler ──insert──> RetryJobStore
//!                               │
//!                               └──schedule_at──> JobScheduler
//!                                                    │ (later, or inline)
//!                                                    ▼
//!                                        ScheduledRetryRunner
//!                                          ├─ try_claim (Pending → Running)
//!                                          ├─ RecordTypeRegistry → TypedReplay → Processor
//!                                          └─ finish / RetryHandler (successor)
//! ```

pub mod config;
pub mod jobs;


pub use config::{BulkConfig, RetryConfig};
pub use jobs::{RetryHandler, RetryRuntime, RunOutcome, ScheduledRetryRunner};
