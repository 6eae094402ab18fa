//! Shared state of the retry machinery.

use std::sync::Arc;

use crate::config::RetryConfig;

use super::registry::RecordTypeRegistry;
use super::scheduler::JobScheduler;
use super::store::RetryJobStore;

/// Job store, scheduler, type registry and config shared by the
/// [`RetryHandler`](super::RetryHandler) and every
/// [`ScheduledRetryRunner`](super::ScheduledRetryRunner) it schedules.
///
/// Processors registered in the registry are detached (no retry sink), so the
/// runtime never owns a path back to itself.
pub struct RetryRuntime {
    store: Arc<dyn RetryJobStore>,
    scheduler: Arc<dyn JobScheduler>,
    registry: RecordTypeRegistry,
    config: RetryConfig,
}

impl RetryRuntime {
    pub fn new<St, Sc>(store: St, scheduler: Sc, config: RetryConfig) -> Arc<Self>
    where
        St: RetryJobStore + 'static,
        Sc: JobScheduler + 'static,
    {
        Arc::new(Self {
            store: Arc::new(store),
            scheduler: Arc::new(scheduler),
            registry: RecordTypeRegistry::new(),
            config,
        })
    }

    pub fn store(&self) -> &dyn RetryJobStore {
        self.store.as_ref()
    }

    pub fn scheduler(&self) -> &dyn JobScheduler {
        self.scheduler.as_ref()
    }

    pub fn registry(&self) -> &RecordTypeRegistry {
        &self.registry
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }
}

impl std::fmt::Debug for RetryRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryRuntime")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
