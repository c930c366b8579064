//! # Per-invocation fault isolation.
//!
//! Every handler call goes through [`InvocationGuard::invoke`], which turns
//! any outcome into either success or a reported [`InvocationError`]:
//!
//! ```text
//! invoke(subscription, event)
//!     │
//!     ├─ no invoker bound ─────────────► Mechanism ──┐
//!     ├─ catch_unwind(invoker(..))                   │
//!     │     ├─ Ok(Err(Handler|Mechanism)) ───────────┤
//!     │     └─ panic ──────────────────► Panicked ───┤
//!     │                                              ▼
//!     │                              ErrorHandler::handle_error(err, ctx)
//!     │                              (or tracing::error! if none)
//!     │                                   │
//!     │                                   └─ handler errs/panics ─► logged, swallowed
//!     │
//!     └─ optionally post SubscriberExceptionEvent (never for one)
//! ```
//!
//! Nothing escapes `invoke`; the dispatch loop always continues.
//!
//! **Warning**: `AssertUnwindSafe` is used, so a handler that panics while
//! holding a lock on shared state may leave it poisoned or inconsistent.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, trace};

use crate::bus::EventBus;
use crate::error::{panic_message, InvocationError};
use crate::event::{EventRef, SubscriberExceptionEvent};
use crate::registry::Subscription;
use crate::subscriber::{MethodDescriptor, Origin, SubscriberHandle, SubscriberMethod};

/// Receives handler failures.
///
/// Implemented for any `Fn(&InvocationError, &ErrorContext) -> anyhow::Result<()>`.
/// An error or panic from the handler itself is logged and never reaches the
/// dispatch loop.
pub trait ErrorHandler: Send + Sync {
    /// Handles one failure.
    fn handle_error(&self, error: &InvocationError, context: &ErrorContext) -> anyhow::Result<()>;
}

impl<F> ErrorHandler for F
where
    F: Fn(&InvocationError, &ErrorContext) -> anyhow::Result<()> + Send + Sync,
{
    fn handle_error(&self, error: &InvocationError, context: &ErrorContext) -> anyhow::Result<()> {
        self(error, context)
    }
}

/// Where and when a handler failure happened.
pub struct ErrorContext {
    bus: EventBus,
    event: EventRef,
    subscriber: SubscriberHandle,
    method: SubscriberMethod,
    occurred_at: DateTime<Utc>,
}

impl ErrorContext {
    /// The bus that dispatched the failing handler.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// The event being handled.
    pub fn event(&self) -> &EventRef {
        &self.event
    }

    /// The failing subscriber.
    pub fn subscriber(&self) -> &SubscriberHandle {
        &self.subscriber
    }

    /// Name of the failing method.
    pub fn method_name(&self) -> &str {
        self.method.name()
    }

    /// Full method descriptor. Only available for self-declared methods;
    /// methods from a precomputed index carry none.
    pub fn method_descriptor(&self) -> Option<MethodDescriptor> {
        (self.method.origin() == Origin::Declared)
            .then(|| self.method.descriptor(self.subscriber.type_name()))
    }

    /// When the failure was observed.
    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}

impl fmt::Debug for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorContext")
            .field("bus", &self.bus.id())
            .field("event", &self.event.type_name())
            .field("subscriber", &self.subscriber.type_name())
            .field("method", &self.method.name())
            .field("occurred_at", &self.occurred_at)
            .finish()
    }
}

/// Isolates handler calls and reports their failures.
pub(crate) struct InvocationGuard {
    error_handler: Option<Arc<dyn ErrorHandler>>,
    log_errors: bool,
    send_exception_event: bool,
}

impl InvocationGuard {
    pub(crate) fn new(
        error_handler: Option<Arc<dyn ErrorHandler>>,
        log_errors: bool,
        send_exception_event: bool,
    ) -> Self {
        Self {
            error_handler,
            log_errors,
            send_exception_event,
        }
    }

    /// Calls the subscription's handler with `event`. Never panics, never fails.
    pub(crate) fn invoke(&self, bus: &EventBus, subscription: &Subscription, event: &EventRef) {
        let outcome = match subscription.method().invoker() {
            None => Err(InvocationError::Mechanism(format!(
                "no invoker bound for {}",
                subscription.describe()
            ))),
            Some(invoker) => {
                let target = subscription.subscriber().target();
                catch_unwind(AssertUnwindSafe(|| invoker(target, event.as_ref())))
                    .unwrap_or_else(|payload| {
                        Err(InvocationError::Panicked(panic_message(payload.as_ref())))
                    })
            }
        };

        match outcome {
            Ok(()) => trace!(
                bus = %bus.id(),
                subscriber = subscription.subscriber().type_name(),
                method = subscription.method().name(),
                "handler completed"
            ),
            Err(err) => self.report(bus, subscription, event, err),
        }
    }

    fn report(
        &self,
        bus: &EventBus,
        subscription: &Subscription,
        event: &EventRef,
        err: InvocationError,
    ) {
        let context = ErrorContext {
            bus: bus.clone(),
            event: EventRef::clone(event),
            subscriber: subscription.subscriber().clone(),
            method: subscription.method().clone(),
            occurred_at: Utc::now(),
        };

        match &self.error_handler {
            Some(handler) => Self::notify(handler.as_ref(), &err, &context),
            None if self.log_errors => error!(
                bus = %bus.id(),
                event = event.type_name(),
                subscriber = context.subscriber.type_name(),
                method = context.method_name(),
                label = err.as_label(),
                error = ?err,
                "subscriber failed"
            ),
            None => {}
        }

        if self.send_exception_event && !event.is::<SubscriberExceptionEvent>() && !bus.is_shutdown()
        {
            let exception = SubscriberExceptionEvent {
                bus: bus.id(),
                causing_event: context.event,
                subscriber: context.subscriber.type_name(),
                method: context.method.name().to_owned().into(),
                label: err.as_label(),
                message: err.to_string(),
                occurred_at: context.occurred_at,
            };
            if let Err(post_err) = bus.post(exception) {
                error!(
                    bus = %bus.id(),
                    error = %post_err,
                    "failed to post subscriber exception event"
                );
            }
        }
    }

    fn notify(handler: &dyn ErrorHandler, err: &InvocationError, context: &ErrorContext) {
        match catch_unwind(AssertUnwindSafe(|| handler.handle_error(err, context))) {
            Ok(Ok(())) => {}
            Ok(Err(handler_err)) => error!(
                bus = %context.bus.id(),
                method = context.method_name(),
                original = %err,
                error = ?handler_err,
                "error handler failed"
            ),
            Err(payload) => error!(
                bus = %context.bus.id(),
                method = context.method_name(),
                original = %err,
                panic = %panic_message(payload.as_ref()),
                "error handler panicked"
            ),
        }
    }
}
