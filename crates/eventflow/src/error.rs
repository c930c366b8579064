//! Error types for the dispatch engine.
//!
//! - [`BusError`]: configuration and invalid-usage errors. In lenient mode the
//!   bus logs them and turns the operation into a no-op; in strict mode they are
//!   returned to the caller.
//! - [`InvocationError`]: failures of a single handler invocation. These never
//!   reach the publisher; they are routed to the configured
//!   [`ErrorHandler`](crate::ErrorHandler) or logged.
//! - [`Rejected`]: returned by worker collaborators that no longer accept work.

use std::borrow::Cow;

use thiserror::Error;

use crate::mode::DeliveryMode;

/// Errors raised by bus operations.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum BusError {
    /// The bus has left the `Active` state.
    #[error("event bus {bus} has been shut down; cannot {operation} {target}")]
    ShutDown {
        /// Short id of the bus instance.
        bus: String,
        /// The rejected operation (`register`, `post`, ...).
        operation: &'static str,
        /// Type name of the subscriber or event involved.
        target: &'static str,
    },

    /// A handler requested main-thread delivery but no scheduler is installed.
    #[error("no main-thread scheduler installed, required by {method} for event {event}")]
    MissingScheduler {
        /// Subscriber method that requested [`DeliveryMode::MainThread`].
        method: String,
        /// Type name of the event being delivered.
        event: &'static str,
    },

    /// A worker collaborator refused the unit of work.
    #[error("{mode} delivery of {event} rejected: {source}")]
    WorkerRejected {
        /// Delivery mode that was being used.
        mode: DeliveryMode,
        /// Type name of the event being delivered.
        event: &'static str,
        /// The worker's rejection.
        #[source]
        source: Rejected,
    },

    /// A subscriber descriptor lacks an event type.
    #[error("subscriber method {subscriber}#{method} does not declare an event type")]
    MalformedDescriptor {
        /// Type name of the subscriber.
        subscriber: &'static str,
        /// Declared method name.
        method: Cow<'static, str>,
    },

    /// The bus could not start the runtime backing its default workers.
    #[error("failed to start worker runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

impl BusError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            BusError::ShutDown { .. } => "bus_shut_down",
            BusError::MissingScheduler { .. } => "bus_missing_scheduler",
            BusError::WorkerRejected { .. } => "bus_worker_rejected",
            BusError::MalformedDescriptor { .. } => "bus_malformed_descriptor",
            BusError::Runtime(_) => "bus_runtime",
        }
    }

    /// True for errors caused by missing or closed collaborators.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            BusError::MissingScheduler { .. } | BusError::WorkerRejected { .. } | BusError::Runtime(_)
        )
    }
}

/// Failure of a single handler invocation.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum InvocationError {
    /// The handler body returned an error.
    #[error("handler failed: {0:#}")]
    Handler(anyhow::Error),

    /// The handler body panicked.
    #[error("handler panicked: {0}")]
    Panicked(String),

    /// The invocation machinery itself failed (missing invoker, type mismatch).
    #[error("invocation failed: {0}")]
    Mechanism(String),
}

impl InvocationError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use eventflow_core::InvocationError;
    ///
    /// let err = InvocationError::Mechanism("no invoker".into());
    /// assert_eq!(err.as_label(), "invocation_mechanism");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            InvocationError::Handler(_) => "handler_failed",
            InvocationError::Panicked(_) => "handler_panicked",
            InvocationError::Mechanism(_) => "invocation_mechanism",
        }
    }

    /// True when the handler body itself failed (error or panic).
    pub fn is_handler_failure(&self) -> bool {
        matches!(self, InvocationError::Handler(_) | InvocationError::Panicked(_))
    }
}

/// A worker refused a unit of work because it was shut down.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{worker} is no longer accepting work")]
pub struct Rejected {
    /// Name of the refusing worker.
    pub worker: &'static str,
}

/// Extracts a printable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
