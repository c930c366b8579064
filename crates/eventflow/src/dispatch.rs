//! Delivery-mode routing.
//!
//! The dispatcher receives a ready unit of work for one subscription and
//! decides which execution context runs it. It never invokes handlers
//! directly; the job does, through the invocation guard.

use std::sync::Arc;

use tracing::debug;

use crate::error::BusError;
use crate::event::AnyEvent;
use crate::mode::DeliveryMode;
use crate::registry::Subscription;
use crate::worker::{AsyncExecutor, BackgroundPoster, Job, MainThreadScheduler};

/// Routes jobs by delivery mode. Owns references to every worker.
pub(crate) struct Dispatcher {
    main_thread: Option<Arc<dyn MainThreadScheduler>>,
    background: Arc<dyn BackgroundPoster>,
    pool: Arc<dyn AsyncExecutor>,
    inline_on_primary: bool,
    owns_background: bool,
    owns_pool: bool,
}

impl Dispatcher {
    pub(crate) fn new(
        main_thread: Option<Arc<dyn MainThreadScheduler>>,
        background: Arc<dyn BackgroundPoster>,
        pool: Arc<dyn AsyncExecutor>,
        inline_on_primary: bool,
    ) -> Self {
        Self {
            main_thread,
            background,
            pool,
            inline_on_primary,
            owns_background: false,
            owns_pool: false,
        }
    }

    /// Marks which workers were created by the bus and must be stopped by it.
    pub(crate) fn with_ownership(mut self, background: bool, pool: bool) -> Self {
        self.owns_background = background;
        self.owns_pool = pool;
        self
    }

    /// Runs `job` inline or hands it to the worker for the subscription's mode.
    ///
    /// Only enqueueing happens on the caller's thread for deferred modes.
    pub(crate) fn route(
        &self,
        subscription: &Subscription,
        event: &dyn AnyEvent,
        job: Job,
    ) -> Result<(), BusError> {
        let mode = subscription.mode();
        let rejected = |source| BusError::WorkerRejected {
            mode,
            event: event.type_name(),
            source,
        };

        match mode {
            DeliveryMode::Inline => {
                job();
                Ok(())
            }
            DeliveryMode::MainThread => {
                let Some(scheduler) = &self.main_thread else {
                    return Err(BusError::MissingScheduler {
                        method: subscription.describe(),
                        event: event.type_name(),
                    });
                };
                if self.inline_on_primary && scheduler.is_main_thread() {
                    job();
                    return Ok(());
                }
                scheduler.schedule(job).map_err(rejected)
            }
            DeliveryMode::Background => self.background.enqueue(job).map_err(rejected),
            DeliveryMode::Async => self.pool.execute(job).map_err(rejected),
        }
    }

    /// Stops the workers the bus created. External workers are left running.
    pub(crate) fn shutdown_owned(&self) {
        if self.owns_background {
            self.background.shutdown();
        }
        if self.owns_pool {
            self.pool.shutdown();
        }
        debug!(
            background = self.owns_background,
            pool = self.owns_pool,
            "owned workers stopped"
        );
    }

    pub(crate) fn has_main_thread(&self) -> bool {
        self.main_thread.is_some()
    }
}
