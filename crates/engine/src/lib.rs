//! `bulkdml-engine`
//!
//! **Responsibility:** turn one large homogeneous batch into quota-sized store
//! calls and report what happened to every record.
//!
//! ```text
//! Processor::process
//!   ├─ chunker::split / split_by_quota
//!   └─ for each chunk
//!        ├─ HookManager::dispatch_pre
//!        ├─ OperationExecutor::execute ──> RecordStore::write
//!        ├─ HookManager::dispatch_post
//!        └─ HookManager::dispatch_error (records failed, or the chunk was aborted)
//!   └─ RetrySink::schedule_retry (deduplicated failures, when enabled)
//! ```
//!
//! No IO happens here except through the injected `RecordStore`.

pub mod chunker;
pub mod context;
pub mod executor;
pub mod hooks;
pub mod processor;
pub mod result;
pub mod store;

pub use chunker::{Chunk, ChunkQuota, split, split_by_quota};
pub use context::{ExecutionContext, LogLevel, RunMetadata};
pub use executor::OperationExecutor;
pub use hooks::{ErrorCallback, HookError, HookManager, PostChunkHook, PreChunkHook};
pub use processor::{Processor, ProcessorConfig, RetryPolicy, RetryRequest, RetrySink};
pub use result::{ChunkError, ExecutionResult, FailedRecord, FailedRecordSet};
pub use store::{FieldDescribe, InMemoryRecordStore, RecordOutcome, RecordStore, StoreError, StoreQuota};
