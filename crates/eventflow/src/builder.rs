//! Builder for [`EventBus`].

use std::sync::Arc;

use tokio::runtime::Handle;

use crate::bus::EventBus;
use crate::config::BusConfig;
use crate::dispatch::Dispatcher;
use crate::error::BusError;
use crate::guard::{ErrorHandler, InvocationGuard};
use crate::inspector::{InspectorChain, SubscriberIndex, SubscriberInspector};
use crate::worker::{
    AsyncExecutor, BackgroundPoster, BlockingPool, MainThreadScheduler, SerialWorker,
    WorkerRuntime,
};

/// Configures and builds an [`EventBus`].
///
/// Every collaborator is optional. Background and async workers default to
/// [`SerialWorker`] and [`BlockingPool`] on a tokio runtime: the one passed to
/// [`runtime`](Self::runtime), else the ambient multi-thread runtime, else one
/// the bus builds and owns. No runtime is touched when both workers are
/// supplied.
#[derive(Default)]
pub struct EventBusBuilder {
    config: BusConfig,
    error_handler: Option<Arc<dyn ErrorHandler>>,
    main_thread: Option<Arc<dyn MainThreadScheduler>>,
    background: Option<Arc<dyn BackgroundPoster>>,
    pool: Option<Arc<dyn AsyncExecutor>>,
    inspectors: Vec<Arc<dyn SubscriberInspector>>,
    runtime: Option<Handle>,
}

impl EventBusBuilder {
    /// Builder with [`BusConfig::default`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: BusConfig) -> Self {
        self.config = config;
        self
    }

    /// See [`BusConfig::strict`].
    pub fn strict(mut self, strict: bool) -> Self {
        self.config.strict = strict;
        self
    }

    /// See [`BusConfig::log_handler_errors`].
    pub fn log_handler_errors(mut self, enabled: bool) -> Self {
        self.config.log_handler_errors = enabled;
        self
    }

    /// See [`BusConfig::log_no_subscriber`].
    pub fn log_no_subscriber(mut self, enabled: bool) -> Self {
        self.config.log_no_subscriber = enabled;
        self
    }

    /// See [`BusConfig::send_dead_event`].
    pub fn send_dead_event(mut self, enabled: bool) -> Self {
        self.config.send_dead_event = enabled;
        self
    }

    /// See [`BusConfig::send_subscriber_exception_event`].
    pub fn send_subscriber_exception_event(mut self, enabled: bool) -> Self {
        self.config.send_subscriber_exception_event = enabled;
        self
    }

    /// See [`BusConfig::use_index`].
    pub fn use_index(mut self, enabled: bool) -> Self {
        self.config.use_index = enabled;
        self
    }

    /// See [`BusConfig::inline_on_primary_thread`].
    pub fn inline_on_primary_thread(mut self, enabled: bool) -> Self {
        self.config.inline_on_primary_thread = enabled;
        self
    }

    /// Routes handler failures to `handler` instead of the log.
    pub fn error_handler(mut self, handler: impl ErrorHandler + 'static) -> Self {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    /// Enables [`DeliveryMode::MainThread`](crate::DeliveryMode::MainThread).
    pub fn main_thread(mut self, scheduler: Arc<dyn MainThreadScheduler>) -> Self {
        self.main_thread = Some(scheduler);
        self
    }

    /// Uses an external serialized worker. The bus never shuts it down.
    pub fn background_poster(mut self, poster: Arc<dyn BackgroundPoster>) -> Self {
        self.background = Some(poster);
        self
    }

    /// Uses an external pool. The bus never shuts it down.
    pub fn async_executor(mut self, executor: Arc<dyn AsyncExecutor>) -> Self {
        self.pool = Some(executor);
        self
    }

    /// Adds a precomputed subscriber index, consulted before declarations.
    pub fn index(self, index: SubscriberIndex) -> Self {
        self.inspector(Arc::new(index))
    }

    /// Adds a custom inspector, consulted before declarations in the order added.
    pub fn inspector(mut self, inspector: Arc<dyn SubscriberInspector>) -> Self {
        self.inspectors.push(inspector);
        self
    }

    /// Runs default workers on `handle` instead of the ambient or an owned runtime.
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    /// Builds the bus.
    ///
    /// Fails only if a default worker is needed and its runtime cannot be started.
    pub fn build(self) -> Result<EventBus, BusError> {
        let mut runtime = None;

        let (background, owns_background): (Arc<dyn BackgroundPoster>, bool) =
            match self.background {
                Some(external) => (external, false),
                None => {
                    let handle = worker_handle(&mut runtime, &self.runtime, &self.config)?;
                    (Arc::new(SerialWorker::spawn(&handle)), true)
                }
            };
        let (pool, owns_pool): (Arc<dyn AsyncExecutor>, bool) = match self.pool {
            Some(external) => (external, false),
            None => {
                let handle = worker_handle(&mut runtime, &self.runtime, &self.config)?;
                (Arc::new(BlockingPool::new(handle)), true)
            }
        };

        let dispatcher = Dispatcher::new(
            self.main_thread,
            background,
            pool,
            self.config.inline_on_primary_thread,
        )
        .with_ownership(owns_background, owns_pool);

        let guard = InvocationGuard::new(
            self.error_handler,
            self.config.log_handler_errors,
            self.config.send_subscriber_exception_event,
        );

        let preferred = if self.config.use_index {
            self.inspectors
        } else {
            Vec::new()
        };

        Ok(EventBus::from_parts(
            self.config,
            InspectorChain::new(preferred),
            dispatcher,
            guard,
            runtime,
        ))
    }
}

/// Handle of the runtime backing default workers, resolving it on first use.
fn worker_handle(
    runtime: &mut Option<WorkerRuntime>,
    explicit: &Option<Handle>,
    config: &BusConfig,
) -> Result<Handle, BusError> {
    if let Some(resolved) = runtime {
        return Ok(resolved.handle());
    }
    let resolved = WorkerRuntime::resolve(explicit.clone(), config)?;
    let handle = resolved.handle();
    *runtime = Some(resolved);
    Ok(handle)
}
