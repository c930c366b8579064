//! # Execution contexts for deferred deliveries.
//!
//! Three collaborator traits receive units of work ([`Job`]s) from the
//! dispatcher, plus the default tokio-backed implementations the bus creates
//! when the caller supplies none.
//!
//! ## Architecture
//! ```text
//! Dispatcher ── MainThread ──► MainThreadScheduler::schedule(job)   (caller supplied)
//!     │
//!     ├──── Background ──► BackgroundPoster::enqueue(job)
//!     │                        └─ SerialWorker: [unbounded FIFO] ──► one task ──► spawn_blocking(job).await
//!     │
//!     └──── Async ───────► AsyncExecutor::execute(job)
//!                              └─ BlockingPool: Handle::spawn_blocking(job)
//! ```
//!
//! ## Rules
//! - **FIFO**: `SerialWorker` runs one job at a time in submission order, across all publishers
//! - **No ordering** between jobs handed to `BlockingPool`
//! - **Drain on shutdown**: both defaults refuse new work after `shutdown()` but finish queued work
//! - **No silent drops**: a job the runtime refuses is reported as [`Rejected`]
//! - **Non-blocking**: enqueue never waits on a running handler

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::runtime::{Handle, Runtime, RuntimeFlavor};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::config::BusConfig;
use crate::error::{panic_message, BusError, Rejected};

/// A deferred handler invocation.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs jobs on one designated thread (typically a UI thread).
pub trait MainThreadScheduler: Send + Sync {
    /// True if the caller is on the designated thread.
    fn is_main_thread(&self) -> bool;

    /// Queues `job` for execution on the designated thread.
    fn schedule(&self, job: Job) -> Result<(), Rejected>;
}

/// Serialized single-consumer worker for [`DeliveryMode::Background`](crate::DeliveryMode::Background).
pub trait BackgroundPoster: Send + Sync {
    /// Appends `job` to the FIFO queue.
    fn enqueue(&self, job: Job) -> Result<(), Rejected>;

    /// Stops accepting jobs; queued jobs still run.
    fn shutdown(&self);
}

/// Unordered pool for [`DeliveryMode::Async`](crate::DeliveryMode::Async).
pub trait AsyncExecutor: Send + Sync {
    /// Runs `job` on some pool thread.
    fn execute(&self, job: Job) -> Result<(), Rejected>;

    /// Stops accepting jobs; running jobs complete.
    fn shutdown(&self);
}

/// Default [`BackgroundPoster`]: an unbounded queue drained by one task.
///
/// Each job runs on tokio's blocking pool, and the next job is taken only
/// after the previous one returned.
pub struct SerialWorker {
    sender: Mutex<Option<mpsc::UnboundedSender<Job>>>,
}

impl SerialWorker {
    /// Name reported in [`Rejected`].
    pub const NAME: &'static str = "serial-worker";

    /// Spawns the draining task on `handle`.
    #[must_use]
    pub fn spawn(handle: &Handle) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        handle.spawn(async move {
            while let Some(job) = rx.recv().await {
                if let Err(err) = tokio::task::spawn_blocking(job).await {
                    if err.is_panic() {
                        let payload = err.into_panic();
                        error!(
                            worker = Self::NAME,
                            panic = %panic_message(payload.as_ref()),
                            "background job panicked"
                        );
                    } else {
                        warn!(worker = Self::NAME, "background job cancelled");
                    }
                }
            }
            debug!(worker = Self::NAME, "queue closed and drained");
        });
        Self {
            sender: Mutex::new(Some(tx)),
        }
    }
}

impl BackgroundPoster for SerialWorker {
    fn enqueue(&self, job: Job) -> Result<(), Rejected> {
        let guard = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        let rejected = Rejected { worker: Self::NAME };
        match guard.as_ref() {
            Some(tx) => tx.send(job).map_err(|_| rejected),
            None => Err(rejected),
        }
    }

    fn shutdown(&self) {
        let closed = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some();
        if closed {
            debug!(worker = Self::NAME, "stopped accepting jobs");
        }
    }
}

/// Default [`AsyncExecutor`]: tokio's blocking thread pool.
pub struct BlockingPool {
    handle: Handle,
    open: AtomicBool,
}

impl BlockingPool {
    /// Name reported in [`Rejected`].
    pub const NAME: &'static str = "blocking-pool";

    /// Pool backed by `handle`'s blocking threads.
    #[must_use]
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            open: AtomicBool::new(true),
        }
    }
}

impl AsyncExecutor for BlockingPool {
    fn execute(&self, job: Job) -> Result<(), Rejected> {
        if !self.open.load(Ordering::Acquire) {
            return Err(Rejected { worker: Self::NAME });
        }
        let dropped = Arc::new(AtomicBool::new(false));
        let pending = Pending {
            job: Some(job),
            dropped: Arc::clone(&dropped),
        };
        // Panics are caught inside the job; the join handle is not needed.
        // A runtime that is shutting down drops the closure before returning.
        drop(self.handle.spawn_blocking(move || pending.run()));
        if dropped.load(Ordering::Acquire) {
            return Err(Rejected { worker: Self::NAME });
        }
        Ok(())
    }

    fn shutdown(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            debug!(worker = Self::NAME, "stopped accepting jobs");
        }
    }
}

/// A job handed to tokio that notices being dropped without running.
struct Pending {
    job: Option<Job>,
    dropped: Arc<AtomicBool>,
}

impl Pending {
    fn run(mut self) {
        if let Some(job) = self.job.take() {
            job();
        }
    }
}

impl Drop for Pending {
    fn drop(&mut self) {
        if self.job.is_some() {
            self.dropped.store(true, Ordering::Release);
            warn!(worker = BlockingPool::NAME, "runtime shut down before job ran");
        }
    }
}

/// Runtime backing the default workers.
pub(crate) enum WorkerRuntime {
    Borrowed(Handle),
    Owned {
        handle: Handle,
        runtime: Option<Runtime>,
        grace: Duration,
    },
}

impl WorkerRuntime {
    /// Uses `explicit` if given, else the ambient multi-thread runtime, else
    /// builds one. A current-thread runtime is never borrowed: its tasks only
    /// progress while that runtime is being driven, and synchronous publishers
    /// do not drive it.
    pub(crate) fn resolve(explicit: Option<Handle>, config: &BusConfig) -> Result<Self, BusError> {
        if let Some(handle) = explicit {
            return Ok(Self::Borrowed(handle));
        }
        if let Ok(handle) = Handle::try_current() {
            if handle.runtime_flavor() == RuntimeFlavor::MultiThread {
                return Ok(Self::Borrowed(handle));
            }
        }

        let mut builder = tokio::runtime::Builder::new_multi_thread();
        builder.thread_name("eventflow-worker").enable_time();
        if let Some(threads) = config.worker_threads() {
            builder.worker_threads(threads);
        }
        let runtime = builder.build()?;
        debug!("started owned worker runtime");
        Ok(Self::Owned {
            handle: runtime.handle().clone(),
            runtime: Some(runtime),
            grace: config.shutdown_grace(),
        })
    }

    pub(crate) fn handle(&self) -> Handle {
        match self {
            Self::Borrowed(handle) | Self::Owned { handle, .. } => handle.clone(),
        }
    }
}

impl Drop for WorkerRuntime {
    fn drop(&mut self) {
        let Self::Owned { runtime, grace, .. } = self else {
            return;
        };
        let Some(runtime) = runtime.take() else {
            return;
        };
        // Blocking inside an async context panics.
        if Handle::try_current().is_ok() {
            runtime.shutdown_background();
        } else {
            runtime.shutdown_timeout(*grace);
        }
    }
}
