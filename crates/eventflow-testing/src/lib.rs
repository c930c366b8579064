//! Testing utilities for the eventflow dispatch engine.
//!
//! - [`Recorder`]: thread-safe call log with blocking waits for deferred deliveries
//! - [`ManualScheduler`]: a main-thread scheduler driven by the test
//! - [`ErrorLog`]: an error handler that records every failure it sees
//! - [`ThreadWorker`]: an external single-thread worker that counts shutdown calls
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use eventflow_core::{impl_event, DeliveryMode, EventBus, MethodTable, Subscriber};
//! use eventflow_testing::Recorder;
//!
//! #[derive(Debug)]
//! struct Ping(u32);
//! impl_event!(Ping);
//!
//! #[derive(Default)]
//! struct Listener(Recorder<u32>);
//!
//! impl Subscriber for Listener {
//!     fn declare(methods: &mut MethodTable<Self>) {
//!         methods
//!             .on("on_ping", |l: &Listener, p: &Ping| {
//!                 l.0.record(p.0);
//!                 Ok(())
//!             })
//!             .mode(DeliveryMode::Async);
//!     }
//! }
//!
//! let bus = EventBus::new().unwrap();
//! let listener = Arc::new(Listener::default());
//! bus.register(&listener).unwrap();
//! bus.post(Ping(7)).unwrap();
//! assert!(listener.0.wait_for(1, Duration::from_secs(5)));
//! assert_eq!(listener.0.snapshot(), vec![7]);
//! ```

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use eventflow_core::{
    AsyncExecutor, BackgroundPoster, ErrorContext, ErrorHandler, InvocationError, Job,
    MainThreadScheduler, Rejected,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Polls `condition` every few milliseconds until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(2));
    }
}

/// Thread-safe, ordered log of values recorded by handlers.
pub struct Recorder<T> {
    entries: Mutex<Vec<T>>,
    changed: Condvar,
}

impl<T> Default for Recorder<T> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            changed: Condvar::new(),
        }
    }
}

impl<T: Clone> Recorder<T> {
    /// Empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `value` and wakes waiters.
    pub fn record(&self, value: T) {
        lock(&self.entries).push(value);
        self.changed.notify_all();
    }

    /// Copy of everything recorded so far, in order.
    pub fn snapshot(&self) -> Vec<T> {
        lock(&self.entries).clone()
    }

    /// Number of recorded values.
    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    /// True if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Blocks until at least `count` values are recorded or `timeout` passes.
    pub fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let guard = lock(&self.entries);
        let (guard, _) = self
            .changed
            .wait_timeout_while(guard, timeout, |entries| entries.len() < count)
            .unwrap_or_else(PoisonError::into_inner);
        guard.len() >= count
    }
}

/// A main-thread scheduler whose queue is drained explicitly by the test.
///
/// The "main thread" is whichever thread last called
/// [`claim_current_thread`](Self::claim_current_thread); none by default.
#[derive(Default)]
pub struct ManualScheduler {
    queue: Mutex<VecDeque<Job>>,
    main: Mutex<Option<ThreadId>>,
    closed: AtomicBool,
    executed: Mutex<Vec<ThreadId>>,
}

impl ManualScheduler {
    /// Scheduler with no designated thread.
    pub fn new() -> Self {
        Self::default()
    }

    /// Designates the calling thread as the main thread.
    pub fn claim_current_thread(&self) {
        *lock(&self.main) = Some(thread::current().id());
    }

    /// Runs every queued job on the calling thread; returns how many ran.
    ///
    /// Jobs scheduled while draining run in the same call.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            let next = lock(&self.queue).pop_front();
            let Some(job) = next else {
                return ran;
            };
            lock(&self.executed).push(thread::current().id());
            job();
            ran += 1;
        }
    }

    /// Number of queued jobs.
    pub fn pending(&self) -> usize {
        lock(&self.queue).len()
    }

    /// Threads that ran jobs, in order.
    pub fn executed_on(&self) -> Vec<ThreadId> {
        lock(&self.executed).clone()
    }

    /// Makes further `schedule` calls fail.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl MainThreadScheduler for ManualScheduler {
    fn is_main_thread(&self) -> bool {
        *lock(&self.main) == Some(thread::current().id())
    }

    fn schedule(&self, job: Job) -> Result<(), Rejected> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Rejected {
                worker: "manual-scheduler",
            });
        }
        lock(&self.queue).push_back(job);
        Ok(())
    }
}

/// One failure seen by [`ErrorLog`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorRecord {
    /// [`InvocationError::as_label`] of the failure.
    pub label: &'static str,
    /// Rendered failure.
    pub message: String,
    /// Type name of the failing subscriber.
    pub subscriber: &'static str,
    /// Failing method name.
    pub method: String,
    /// Type name of the event being handled.
    pub event: &'static str,
    /// True if the context carried a method descriptor.
    pub has_descriptor: bool,
}

/// Error handler that records failures. Clones share one log.
///
/// With [`failing`](Self::failing), the handler itself returns an error after
/// recording, to exercise the bus's handling of a broken error handler.
#[derive(Clone, Default)]
pub struct ErrorLog {
    records: Arc<Recorder<ErrorRecord>>,
    fail: bool,
}

impl ErrorLog {
    /// Recording handler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Recording handler that then fails.
    pub fn failing() -> Self {
        Self {
            records: Arc::default(),
            fail: true,
        }
    }

    /// Failures recorded so far.
    pub fn records(&self) -> Vec<ErrorRecord> {
        self.records.snapshot()
    }

    /// Blocks until `count` failures are recorded or `timeout` passes.
    pub fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        self.records.wait_for(count, timeout)
    }
}

impl ErrorHandler for ErrorLog {
    fn handle_error(&self, error: &InvocationError, context: &ErrorContext) -> anyhow::Result<()> {
        self.records.record(ErrorRecord {
            label: error.as_label(),
            message: error.to_string(),
            subscriber: context.subscriber().type_name(),
            method: context.method_name().to_owned(),
            event: context.event().type_name(),
            has_descriptor: context.method_descriptor().is_some(),
        });
        if self.fail {
            anyhow::bail!("error log refused {}", error.as_label());
        }
        Ok(())
    }
}

/// External worker backed by one dedicated OS thread.
///
/// Usable as both [`BackgroundPoster`] and [`AsyncExecutor`]. Counts
/// `shutdown` calls so tests can check who stopped it.
pub struct ThreadWorker {
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    shutdowns: AtomicUsize,
    thread: ThreadId,
}

impl ThreadWorker {
    /// Starts the worker thread.
    pub fn spawn() -> io::Result<Arc<Self>> {
        let (tx, rx) = mpsc::channel::<Job>();
        let handle = thread::Builder::new()
            .name("thread-worker".into())
            .spawn(move || {
                for job in rx {
                    job();
                }
            })?;
        Ok(Arc::new(Self {
            sender: Mutex::new(Some(tx)),
            shutdowns: AtomicUsize::new(0),
            thread: handle.thread().id(),
        }))
    }

    /// How many times `shutdown` was called.
    pub fn shutdown_calls(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }

    /// Id of the worker thread.
    pub fn thread_id(&self) -> ThreadId {
        self.thread
    }

    fn submit(&self, job: Job) -> Result<(), Rejected> {
        let rejected = Rejected {
            worker: "thread-worker",
        };
        match lock(&self.sender).as_ref() {
            Some(tx) => tx.send(job).map_err(|_| rejected),
            None => Err(rejected),
        }
    }

    fn stop(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        lock(&self.sender).take();
    }
}

impl BackgroundPoster for ThreadWorker {
    fn enqueue(&self, job: Job) -> Result<(), Rejected> {
        self.submit(job)
    }

    fn shutdown(&self) {
        self.stop();
    }
}

impl AsyncExecutor for ThreadWorker {
    fn execute(&self, job: Job) -> Result<(), Rejected> {
        self.submit(job)
    }

    fn shutdown(&self) {
        self.stop();
    }
}
