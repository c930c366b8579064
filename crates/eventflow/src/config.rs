//! # Bus configuration.
//!
//! [`BusConfig`] holds every policy switch of an [`EventBus`](crate::EventBus).
//! It deserializes from any `serde` format with missing fields taking their
//! defaults, so applications can embed it in their own settings files.
//!
//! ## Sentinel values
//! - `worker_threads = 0` → tokio's default (one per core) for an owned runtime
//! - `shutdown_grace_ms = 0` → an owned runtime is shut down without waiting

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Policy switches of an event bus.
///
/// ## Field semantics
/// - `strict`: configuration and invalid-usage errors are returned as `Err`
///   instead of being logged and ignored
/// - `log_handler_errors`: log handler failures when no error handler is set
/// - `log_no_subscriber`: log (at debug) events that matched nothing
/// - `send_dead_event`: post a [`DeadEvent`](crate::DeadEvent) for unmatched events
/// - `send_subscriber_exception_event`: post a
///   [`SubscriberExceptionEvent`](crate::SubscriberExceptionEvent) after each handler failure
/// - `use_index`: consult installed indexes and custom inspectors before declarations
/// - `inline_on_primary_thread`: run main-thread deliveries inline when the
///   publisher is already on the main thread
/// - `shutdown_grace_ms`: how long dropping the bus waits for an owned runtime
/// - `worker_threads`: worker threads of an owned runtime (`0` = tokio default)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub strict: bool,
    pub log_handler_errors: bool,
    pub log_no_subscriber: bool,
    pub send_dead_event: bool,
    pub send_subscriber_exception_event: bool,
    pub use_index: bool,
    pub inline_on_primary_thread: bool,
    pub shutdown_grace_ms: u64,
    pub worker_threads: usize,
}

impl BusConfig {
    /// Grace period for an owned runtime on drop.
    #[inline]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Worker thread count for an owned runtime, `None` for tokio's default.
    #[inline]
    pub fn worker_threads(&self) -> Option<usize> {
        (self.worker_threads > 0).then_some(self.worker_threads)
    }
}

impl Default for BusConfig {
    /// Lenient, logging, dead events on, exception events off, index on,
    /// 5s grace, default thread count.
    fn default() -> Self {
        Self {
            strict: false,
            log_handler_errors: true,
            log_no_subscriber: true,
            send_dead_event: true,
            send_subscriber_exception_event: false,
            use_index: true,
            inline_on_primary_thread: false,
            shutdown_grace_ms: 5_000,
            worker_threads: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let config: BusConfig =
            serde_json::from_str(r#"{ "strict": true, "worker_threads": 2 }"#).expect("parse");
        assert!(config.strict);
        assert_eq!(config.worker_threads(), Some(2));
        assert!(config.send_dead_event);
        assert!(!config.send_subscriber_exception_event);
        assert_eq!(config.shutdown_grace(), Duration::from_secs(5));
    }

    #[test]
    fn zero_thread_count_means_runtime_default() {
        assert_eq!(BusConfig::default().worker_threads(), None);
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let config: BusConfig =
            serde_json::from_str(r#"{ "log_no_subscriber": false, "color": "blue" }"#)
                .expect("parse");
        assert!(!config.log_no_subscriber);
    }
}
