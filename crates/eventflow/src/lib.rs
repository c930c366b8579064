//! # Eventflow
//!
//! An in-process publish/subscribe dispatch engine: subscribers register
//! handler methods for event types, publishers post events, and the bus
//! routes each event to every matching handler by priority, delivery mode
//! and stickiness.
//!
//! ## Core Concepts
//!
//! - [`Event`] = a plain value; declares its supertypes for polymorphic matching
//! - [`Subscriber`] = a shared value owning handler methods ([`MethodTable`])
//! - [`DeliveryMode`] = which execution context runs a handler
//! - Sticky events = the last posted instance per type, replayed to new sticky handlers
//!
//! ## Architecture
//!
//! ```text
//! register(&Arc<S>)
//!     │
//!     ▼
//! InspectorChain (SubscriberIndex? ─► Subscriber::declare)
//!     │
//!     ▼ validate
//! SubscriptionRegistry ◄── sticky replay ── StickyStore
//!     ▲                                         ▲
//!     │ lookup(T) for T in closure              │ put
//!     │                                         │
//! post(e) ─► EventTypeResolver ─────────────────┘ (post_sticky)
//!     │
//!     ▼ per subscription, priority desc
//! Dispatcher
//!     ├─ Inline ──────► job() on the publisher thread
//!     ├─ MainThread ──► MainThreadScheduler (caller supplied)
//!     ├─ Background ──► SerialWorker (single FIFO consumer)
//!     └─ Async ───────► BlockingPool (unordered)
//!                            │
//!                            ▼
//!                    InvocationGuard ─► handler
//!                            │
//!                            └─ failure ─► ErrorHandler | tracing
//! ```
//!
//! ## Key Invariants
//!
//! 1. **One delivery per registration** - a (subscriber, method) pair is registered at most once
//! 2. **Priority order** - within one type, higher priority is attempted first
//! 3. **Closure order** - the concrete type is matched before its supertypes
//! 4. **Fault isolation** - handler errors and panics never reach the publisher
//! 5. **No DeadEvent recursion** - an unmatched `DeadEvent` is dropped
//! 6. **One-way lifecycle** - `Active → ShuttingDown → Shutdown`
//!
//! ## Guarantees
//!
//! - **Inline is synchronous**: inline handlers have returned when `post` returns
//! - **Background is FIFO**: across all publishers and event types
//! - **Async is unordered**: jobs may run concurrently
//! - **Snapshots**: a `post` never observes a half-updated subscription list
//!
//! ## Example
//!
//! ```
//! use std::sync::{Arc, Mutex};
//! use eventflow_core::{impl_event, EventBus, MethodTable, Subscriber};
//!
//! #[derive(Debug)]
//! struct Config { mode: &'static str }
//! impl_event!(Config);
//!
//! #[derive(Default)]
//! struct Theme { mode: Mutex<Option<&'static str>> }
//!
//! impl Subscriber for Theme {
//!     fn declare(methods: &mut MethodTable<Self>) {
//!         methods
//!             .on("apply", |theme: &Theme, config: &Config| {
//!                 *theme.mode.lock().unwrap() = Some(config.mode);
//!                 Ok(())
//!             })
//!             .sticky(true);
//!     }
//! }
//!
//! let bus = EventBus::new()?;
//! bus.post_sticky(Config { mode: "dark" })?;
//!
//! // Registered after the post, still receives it.
//! let theme = Arc::new(Theme::default());
//! bus.register(&theme)?;
//! assert_eq!(*theme.mode.lock().unwrap(), Some("dark"));
//! # Ok::<(), eventflow_core::BusError>(())
//! ```
//!
//! ## What This Is Not
//!
//! Eventflow is **not**:
//! - A cross-process or networked message bus
//! - An event log (nothing is persisted)
//! - Exactly-once delivery
//! - A flow-controlled queue (publishers are never throttled)

// Core modules
mod builder;
mod bus;
mod config;
mod dispatch;
mod error;
mod event;
mod event_macro;
mod guard;
mod inspector;
mod mode;
mod registry;
mod resolver;
mod sticky;
mod subscriber;
mod worker;

// Testing utilities are in the separate eventflow-testing crate


// Re-export event model
pub use crate::event::{
    AnyEvent, CancelFlag, Cancelable, DeadEvent, Event, EventRef, EventType,
    SubscriberExceptionEvent,
};

// Re-export subscriber model
pub use crate::subscriber::{
    Invoker, MethodDescriptor, MethodSpec, MethodTable, Origin, Subscriber, SubscriberHandle,
    SubscriberId, SubscriberMethod,
};

// Re-export inspection strategies
pub use inspector::{DeclaredInspector, SubscriberIndex, SubscriberIndexBuilder, SubscriberInspector};

// Re-export error types
pub use crate::error::{BusError, InvocationError, Rejected};

// Re-export error handling
pub use guard::{ErrorContext, ErrorHandler};

// Re-export delivery types
pub use mode::{DeliveryMode, UnknownMode};
pub use worker::{
    AsyncExecutor, BackgroundPoster, BlockingPool, Job, MainThreadScheduler, SerialWorker,
};

// Re-export engine components
pub use registry::{Subscription, SubscriptionList, SubscriptionRegistry};
pub use resolver::EventTypeResolver;
pub use sticky::StickyStore;

// Re-export bus types (primary entry point)
pub use builder::EventBusBuilder;
pub use bus::{BusState, EventBus};
pub use config::BusConfig;
