//! Deferred invocation of retry runs.
//!
//! A scheduler is handed a unit of work and a delay and promises at most one
//! invocation at or after the delay. Three implementations are provided:
//!
//! - [`InlineScheduler`]: runs the work immediately on the calling thread,
//!   ignoring the delay (constrained/test execution contexts).
//! - [`QueuedScheduler`]: holds work until the owner drives it with
//!   `run_next`/`run_due`/`run_all` (simulations and tests).
//! - [`ThreadScheduler`]: a background thread with a due-time queue.

use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::BinaryHeap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use bulkdml_core::BulkError;

/// Work handed to a scheduler.
pub type UnitOfWork = Box<dyn FnOnce() + Send + 'static>;

/// Opaque handle of a scheduled unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobHandle(u64);

impl JobHandle {
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Scheduler error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    #[error("scheduler is shut down")]
    ShutDown,
    #[error("scheduler rejected work: {0}")]
    Rejected(String),
}

impl From<SchedulerError> for BulkError {
    fn from(err: SchedulerError) -> Self {
        BulkError::scheduling(err.to_string())
    }
}

/// Deferred job scheduler abstraction.
pub trait JobScheduler: Send + Sync {
    /// Invoke `work` once, no earlier than `delay` from now (or immediately in
    /// degraded contexts).
    fn schedule_at(&self, delay: Duration, work: UnitOfWork) -> Result<JobHandle, SchedulerError>;
}

impl<S: JobScheduler + ?Sized> JobScheduler for Arc<S> {
    fn schedule_at(&self, delay: Duration, work: UnitOfWork) -> Result<JobHandle, SchedulerError> {
        (**self).schedule_at(delay, work)
    }
}

fn run_isolated(scheduler: &str, handle: JobHandle, work: UnitOfWork) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(work)) {
        Ok(()) => true,
        Err(_) => {
            error!(scheduler, %handle, "scheduled work panicked");
            false
        }
    }
}

/// Runs work immediately, on the caller's thread.
#[derive(Debug, Default)]
pub struct InlineScheduler {
    next: AtomicU64,
}

impl InlineScheduler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobScheduler for InlineScheduler {
    fn schedule_at(&self, delay: Duration, work: UnitOfWork) -> Result<JobHandle, SchedulerError> {
        let handle = JobHandle(self.next.fetch_add(1, Ordering::SeqCst) + 1);
        debug!(%handle, delay_ms = delay.as_millis() as u64, "running scheduled work inline");
        run_isolated("inline", handle, work);
        Ok(handle)
    }
}

struct Queued {
    handle: JobHandle,
    due: Instant,
    work: UnitOfWork,
}

/// Holds work until explicitly driven.
///
/// Every requested delay is recorded so tests can assert on backoff.
#[derive(Default)]
pub struct QueuedScheduler {
    queue: Mutex<Vec<Queued>>,
    delays: Mutex<Vec<Duration>>,
    next: AtomicU64,
    rejecting: AtomicBool,
}

impl QueuedScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `schedule_at` calls fail (or succeed again).
    pub fn set_rejecting(&self, rejecting: bool) {
        self.rejecting.store(rejecting, Ordering::SeqCst);
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Delays requested so far, in scheduling order.
    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Run the oldest queued unit regardless of its due time.
    pub fn run_next(&self) -> bool {
        let next = {
            let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
            if queue.is_empty() {
                None
            } else {
                Some(queue.remove(0))
            }
        };

        match next {
            Some(queued) => {
                run_isolated("queued", queued.handle, queued.work);
                true
            }
            None => false,
        }
    }

    /// Run every unit that is due now. Work scheduled by those units waits
    /// for the next call.
    pub fn run_due(&self) -> usize {
        let now = Instant::now();
        let due: Vec<Queued> = {
            let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
            let (due, waiting) = queue.drain(..).partition(|q| q.due <= now);
            *queue = waiting;
            due
        };

        let count = due.len();
        for queued in due {
            run_isolated("queued", queued.handle, queued.work);
        }
        count
    }

    /// Run queued units, including ones they schedule, until the queue is empty.
    pub fn run_all(&self) -> usize {
        let mut count = 0;
        while self.run_next() {
            count += 1;
        }
        count
    }
}

impl std::fmt::Debug for QueuedScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedScheduler")
            .field("pending", &self.pending())
            .field("rejecting", &self.rejecting.load(Ordering::SeqCst))
            .finish()
    }
}

impl JobScheduler for QueuedScheduler {
    fn schedule_at(&self, delay: Duration, work: UnitOfWork) -> Result<JobHandle, SchedulerError> {
        if self.rejecting.load(Ordering::SeqCst) {
            return Err(SchedulerError::Rejected("queue is not accepting work".to_string()));
        }

        let handle = JobHandle(self.next.fetch_add(1, Ordering::SeqCst) + 1);
        self.delays
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(delay);
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Queued {
                handle,
                due: Instant::now() + delay,
                work,
            });
        Ok(handle)
    }
}

struct Entry {
    due: Instant,
    handle: JobHandle,
    work: UnitOfWork,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        (self.due, self.handle) == (other.due, other.handle)
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        (self.due, self.handle).cmp(&(other.due, other.handle))
    }
}

enum Command {
    Schedule(Entry),
    Shutdown,
}

/// Background-thread scheduler.
///
/// Work runs sequentially on one named thread in due-time order. Dropping the
/// scheduler (or calling [`shutdown`](Self::shutdown)) stops the thread; work
/// that is not yet due is discarded with a warning.
pub struct ThreadScheduler {
    commands: mpsc::Sender<Command>,
    join: Mutex<Option<thread::JoinHandle<()>>>,
    next: AtomicU64,
    executed: Arc<AtomicU64>,
}

impl ThreadScheduler {
    /// Spawn the scheduler thread.
    pub fn spawn(name: impl Into<String>) -> Result<Self, SchedulerError> {
        let name = name.into();
        let (tx, rx) = mpsc::channel::<Command>();
        let executed = Arc::new(AtomicU64::new(0));
        let executed_clone = executed.clone();

        let thread_name = name.clone();
        let join = thread::Builder::new()
            .name(name)
            .spawn(move || scheduler_loop(thread_name, rx, executed_clone))
            .map_err(|e| SchedulerError::Rejected(format!("failed to spawn scheduler thread: {e}")))?;

        Ok(Self {
            commands: tx,
            join: Mutex::new(Some(join)),
            next: AtomicU64::new(0),
            executed,
        })
    }

    /// Units of work run so far.
    pub fn executed(&self) -> u64 {
        self.executed.load(Ordering::SeqCst)
    }

    /// Stop the thread and wait for it. Idempotent.
    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
        let join = self.join.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(join) = join {
            if join.thread().id() == thread::current().id() {
                return;
            }
            let _ = join.join();
        }
    }
}

impl Drop for ThreadScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for ThreadScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadScheduler")
            .field("executed", &self.executed())
            .finish_non_exhaustive()
    }
}

impl JobScheduler for ThreadScheduler {
    fn schedule_at(&self, delay: Duration, work: UnitOfWork) -> Result<JobHandle, SchedulerError> {
        let handle = JobHandle(self.next.fetch_add(1, Ordering::SeqCst) + 1);
        self.commands
            .send(Command::Schedule(Entry {
                due: Instant::now() + delay,
                handle,
                work,
            }))
            .map_err(|_| SchedulerError::ShutDown)?;
        Ok(handle)
    }
}

fn scheduler_loop(name: String, commands: mpsc::Receiver<Command>, executed: Arc<AtomicU64>) {
    info!(scheduler = %name, "retry scheduler started");
    let mut queue: BinaryHeap<Reverse<Entry>> = BinaryHeap::new();

    loop {
        while queue
            .peek()
            .is_some_and(|Reverse(next)| next.due <= Instant::now())
        {
            if let Some(Reverse(entry)) = queue.pop() {
                run_isolated(&name, entry.handle, entry.work);
                executed.fetch_add(1, Ordering::SeqCst);
            }
        }

        let command = match queue.peek() {
            Some(Reverse(next)) => {
                commands.recv_timeout(next.due.saturating_duration_since(Instant::now()))
            }
            None => commands.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        match command {
            Ok(Command::Schedule(entry)) => queue.push(Reverse(entry)),
            Ok(Command::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
    }

    if !queue.is_empty() {
        warn!(scheduler = %name, discarded = queue.len(), "retry scheduler stopped with work queued");
    }
    info!(scheduler = %name, "retry scheduler stopped");
}
