//! Chunk lifecycle callbacks with per-callback failure isolation.
//!
//! Three ordered lists are kept: pre-chunk, post-chunk and error callbacks.
//! A callback that returns an error or panics is logged through the
//! `ExecutionContext` at warn level and the remaining callbacks still run.
//! Nothing a callback does can abort the write pipeline.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use thiserror::Error;

use bulkdml_core::{BulkError, Record};

use crate::chunker::Chunk;
use crate::context::ExecutionContext;
use crate::store::RecordOutcome;

/// Error returned by a callback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct HookError(String);

impl HookError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Runs before a chunk is sent to the store.
pub trait PreChunkHook<R>: Send + Sync {
    fn name(&self) -> &str {
        "pre-chunk"
    }

    fn before_chunk(&self, chunk: &Chunk<R>, ctx: &ExecutionContext) -> Result<(), HookError>;
}

/// Runs after the store returned outcomes for a chunk.
pub trait PostChunkHook<R>: Send + Sync {
    fn name(&self) -> &str {
        "post-chunk"
    }

    fn after_chunk(
        &self,
        chunk: &Chunk<R>,
        outcomes: &[RecordOutcome],
        ctx: &ExecutionContext,
    ) -> Result<(), HookError>;
}

/// Runs with the records of a chunk that failed (per-record or structurally).
pub trait ErrorCallback<R>: Send + Sync {
    fn name(&self) -> &str {
        "error"
    }

    fn on_error(
        &self,
        records: &[R],
        ctx: &ExecutionContext,
        error: &BulkError,
    ) -> Result<(), HookError>;
}

struct FnPreHook<F>(F);

impl<R, F> PreChunkHook<R> for FnPreHook<F>
where
    F: Fn(&Chunk<R>, &ExecutionContext) -> Result<(), HookError> + Send + Sync,
{
    fn before_chunk(&self, chunk: &Chunk<R>, ctx: &ExecutionContext) -> Result<(), HookError> {
        (self.0)(chunk, ctx)
    }
}

struct FnPostHook<F>(F);

impl<R, F> PostChunkHook<R> for FnPostHook<F>
where
    F: Fn(&Chunk<R>, &[RecordOutcome], &ExecutionContext) -> Result<(), HookError> + Send + Sync,
{
    fn after_chunk(
        &self,
        chunk: &Chunk<R>,
        outcomes: &[RecordOutcome],
        ctx: &ExecutionContext,
    ) -> Result<(), HookError> {
        (self.0)(chunk, outcomes, ctx)
    }
}

struct FnErrorCallback<F>(F);

impl<R, F> ErrorCallback<R> for FnErrorCallback<F>
where
    F: Fn(&[R], &ExecutionContext, &BulkError) -> Result<(), HookError> + Send + Sync,
{
    fn on_error(
        &self,
        records: &[R],
        ctx: &ExecutionContext,
        error: &BulkError,
    ) -> Result<(), HookError> {
        (self.0)(records, ctx, error)
    }
}

/// Registry and dispatcher for chunk callbacks.
///
/// Register everything up front, then share the manager (typically behind an
/// `Arc`) with every `Processor` that should fire the same callbacks.
pub struct HookManager<R> {
    pre: Vec<Arc<dyn PreChunkHook<R>>>,
    post: Vec<Arc<dyn PostChunkHook<R>>>,
    error: Vec<Arc<dyn ErrorCallback<R>>>,
}

impl<R: Record> HookManager<R> {
    pub fn new() -> Self {
        Self {
            pre: Vec::new(),
            post: Vec::new(),
            error: Vec::new(),
        }
    }

    pub fn register_pre(&mut self, hook: impl PreChunkHook<R> + 'static) -> &mut Self {
        self.pre.push(Arc::new(hook));
        self
    }

    pub fn register_post(&mut self, hook: impl PostChunkHook<R> + 'static) -> &mut Self {
        self.post.push(Arc::new(hook));
        self
    }

    pub fn register_error(&mut self, hook: impl ErrorCallback<R> + 'static) -> &mut Self {
        self.error.push(Arc::new(hook));
        self
    }

    pub fn on_pre<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&Chunk<R>, &ExecutionContext) -> Result<(), HookError> + Send + Sync + 'static,
    {
        self.register_pre(FnPreHook(f))
    }

    pub fn on_post<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&Chunk<R>, &[RecordOutcome], &ExecutionContext) -> Result<(), HookError>
            + Send
            + Sync
            + 'static,
    {
        self.register_post(FnPostHook(f))
    }

    pub fn on_error<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&[R], &ExecutionContext, &BulkError) -> Result<(), HookError> + Send + Sync + 'static,
    {
        self.register_error(FnErrorCallback(f))
    }

    pub fn len(&self) -> usize {
        self.pre.len() + self.post.len() + self.error.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dispatch_pre(&self, chunk: &Chunk<R>, ctx: &ExecutionContext) {
        for hook in &self.pre {
            let name = hook_name(|| hook.name().to_string(), "pre-chunk");
            isolated(ctx, "pre-chunk", &name, || hook.before_chunk(chunk, ctx));
        }
    }

    pub fn dispatch_post(&self, chunk: &Chunk<R>, outcomes: &[RecordOutcome], ctx: &ExecutionContext) {
        for hook in &self.post {
            let name = hook_name(|| hook.name().to_string(), "post-chunk");
            isolated(ctx, "post-chunk", &name, || {
                hook.after_chunk(chunk, outcomes, ctx)
            });
        }
    }

    /// Run every error callback, each behind its own boundary.
    ///
    /// The dispatch first snapshots the callback list with each callback's
    /// name. That step runs behind a second boundary: if it fails (a `name`
    /// that panics), no error callback runs for this dispatch and the failure
    /// is logged at error level. It never propagates to the caller.
    pub fn dispatch_error(&self, records: &[R], ctx: &ExecutionContext, error: &BulkError) {
        let dispatched = panic::catch_unwind(AssertUnwindSafe(|| {
            let callbacks: Vec<(String, &Arc<dyn ErrorCallback<R>>)> = self
                .error
                .iter()
                .map(|hook| (hook.name().to_string(), hook))
                .collect();

            for (name, hook) in callbacks {
                isolated(ctx, "error", &name, || hook.on_error(records, ctx, error));
            }
        }));

        if let Err(payload) = dispatched {
            ctx.error(format!(
                "error callback dispatch aborted: {}",
                panic_message(payload.as_ref())
            ));
        }
    }
}

impl<R: Record> Default for HookManager<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> std::fmt::Debug for HookManager<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookManager")
            .field("pre", &self.pre.len())
            .field("post", &self.post.len())
            .field("error", &self.error.len())
            .finish()
    }
}

/// A pre/post hook whose `name` panics is still run, under the stage name.
fn hook_name<F>(name: F, fallback: &str) -> String
where
    F: FnOnce() -> String,
{
    panic::catch_unwind(AssertUnwindSafe(name)).unwrap_or_else(|_| fallback.to_string())
}

fn isolated<F>(ctx: &ExecutionContext, stage: &str, name: &str, f: F)
where
    F: FnOnce() -> Result<(), HookError>,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => ctx.warn(format!("{stage} hook '{name}' failed: {err}")),
        Err(payload) => ctx.warn(format!(
            "{stage} hook '{name}' panicked: {}",
            panic_message(payload.as_ref())
        )),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
