//! # The event bus facade.
//!
//! [`EventBus`] composes the resolver, registry, sticky store, dispatcher and
//! invocation guard, and owns the lifecycle state.
//!
//! ## Lifecycle
//! ```text
//! Active ──shutdown()──► ShuttingDown ──(owned workers closed)──► Shutdown
//!                                                                    │
//!                                              shutdown() again ─────┘ (no-op)
//! ```
//!
//! Outside `Active`, `register`, `unregister`, `post` and `post_sticky` are
//! rejected: logged and ignored, or returned as [`BusError::ShutDown`] when
//! [`BusConfig::strict`] is set.
//!
//! ## Post
//! ```text
//! post(e) ──► closure_of(type(e)) ──► for each type T (concrete first):
//!                                         for each subscription of T (priority desc):
//!                                             canceled? ──► stop
//!                                             route(job) ──► Inline | MainThread | Background | Async
//!          no subscription matched ──► post(DeadEvent(e))   (never for a DeadEvent)
//! ```

use std::any::type_name;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::builder::EventBusBuilder;
use crate::config::BusConfig;
use crate::dispatch::Dispatcher;
use crate::error::BusError;
use crate::event::{DeadEvent, Event, EventRef, EventType, SubscriberExceptionEvent};
use crate::guard::InvocationGuard;
use crate::inspector::InspectorChain;
use crate::registry::{Subscription, SubscriptionRegistry};
use crate::resolver::EventTypeResolver;
use crate::sticky::StickyStore;
use crate::subscriber::{Subscriber, SubscriberHandle, SubscriberId};
use crate::worker::{Job, WorkerRuntime};

/// Lifecycle state of a bus. Transitions are one-way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusState {
    /// Accepting registrations and events.
    Active,
    /// `shutdown()` is closing the owned workers.
    ShuttingDown,
    /// Terminal.
    Shutdown,
}

impl BusState {
    const fn as_u8(self) -> u8 {
        match self {
            BusState::Active => 0,
            BusState::ShuttingDown => 1,
            BusState::Shutdown => 2,
        }
    }

    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => BusState::Active,
            1 => BusState::ShuttingDown,
            _ => BusState::Shutdown,
        }
    }
}

/// In-process publish/subscribe dispatcher.
///
/// Cheap to clone; all clones share one bus.
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicU32, Ordering};
/// use eventflow_core::{impl_event, EventBus, MethodTable, Subscriber};
///
/// #[derive(Debug)]
/// struct Ping(u32);
/// impl_event!(Ping);
///
/// #[derive(Default)]
/// struct Total(AtomicU32);
///
/// impl Subscriber for Total {
///     fn declare(methods: &mut MethodTable<Self>) {
///         methods.on("add", |t: &Total, p: &Ping| {
///             t.0.fetch_add(p.0, Ordering::SeqCst);
///             Ok(())
///         });
///     }
/// }
///
/// let bus = EventBus::new()?;
/// let total = Arc::new(Total::default());
/// bus.register(&total)?;
/// bus.post(Ping(2))?;
/// bus.post(Ping(3))?;
/// assert_eq!(total.0.load(Ordering::SeqCst), 5);
/// # Ok::<(), eventflow_core::BusError>(())
/// ```
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

struct BusInner {
    id: Uuid,
    config: BusConfig,
    state: AtomicU8,
    resolver: EventTypeResolver,
    registry: SubscriptionRegistry,
    sticky: StickyStore,
    inspectors: InspectorChain,
    dispatcher: Dispatcher,
    guard: InvocationGuard,
    // Dropped last: owned workers must be closed before their runtime stops.
    _runtime: Option<WorkerRuntime>,
}

impl EventBus {
    /// Starts configuring a bus.
    pub fn builder() -> EventBusBuilder {
        EventBusBuilder::new()
    }

    /// A bus with default configuration and default workers.
    pub fn new() -> Result<Self, BusError> {
        Self::builder().build()
    }

    pub(crate) fn from_parts(
        config: BusConfig,
        inspectors: InspectorChain,
        dispatcher: Dispatcher,
        guard: InvocationGuard,
        runtime: Option<WorkerRuntime>,
    ) -> Self {
        let bus = Self {
            inner: Arc::new(BusInner {
                id: Uuid::new_v4(),
                config,
                state: AtomicU8::new(BusState::Active.as_u8()),
                resolver: EventTypeResolver::new(),
                registry: SubscriptionRegistry::new(),
                sticky: StickyStore::new(),
                inspectors,
                dispatcher,
                guard,
                _runtime: runtime,
            }),
        };
        debug!(bus = %bus.id(), strict = bus.inner.config.strict, "event bus started");
        bus
    }

    /// Unique id of this bus, used in logs.
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Configuration the bus was built with.
    pub fn config(&self) -> &BusConfig {
        &self.inner.config
    }

    /// Current lifecycle state.
    pub fn state(&self) -> BusState {
        BusState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    /// True once `shutdown()` has been called.
    pub fn is_shutdown(&self) -> bool {
        self.state() != BusState::Active
    }

    /// Registers every handler method of `subscriber`.
    ///
    /// Methods come from the first inspector that knows the subscriber's type.
    /// Sticky methods immediately receive every stored sticky event whose type
    /// closure contains their declared type. Registering the same method of
    /// the same instance again is a logged no-op.
    ///
    /// In strict mode a malformed method rejects the whole registration.
    pub fn register<S: Subscriber>(&self, subscriber: &Arc<S>) -> Result<(), BusError> {
        let handle = SubscriberHandle::new(subscriber);
        if !self.admit("register", handle.type_name())? {
            return Ok(());
        }
        self.register_handle(handle)
    }

    /// Removes every subscription of `subscriber`.
    pub fn unregister<S: Subscriber>(&self, subscriber: &Arc<S>) -> Result<(), BusError> {
        if !self.admit("unregister", type_name::<S>())? {
            return Ok(());
        }
        let removed = self.inner.registry.remove(SubscriberId::of(subscriber));
        if removed == 0 {
            warn!(
                bus = %self.id(),
                subscriber = type_name::<S>(),
                "subscriber to unregister was not registered"
            );
        } else {
            debug!(
                bus = %self.id(),
                subscriber = type_name::<S>(),
                removed,
                "subscriber unregistered"
            );
        }
        Ok(())
    }

    /// True if `subscriber` has at least one active subscription.
    pub fn is_registered<S: Subscriber>(&self, subscriber: &Arc<S>) -> bool {
        self.inner.registry.contains(SubscriberId::of(subscriber))
    }

    /// Publishes `event` to every matching subscription.
    ///
    /// Inline handlers have run when this returns; other modes have only been
    /// enqueued. Handler failures never surface here. In strict mode,
    /// configuration errors are returned after the remaining subscriptions
    /// have been attempted.
    pub fn post<E: Event>(&self, event: E) -> Result<(), BusError> {
        self.post_ref(Arc::new(event))
    }

    /// Publishes an already shared event.
    pub fn post_ref(&self, event: EventRef) -> Result<(), BusError> {
        if !self.admit("post", event.type_name())? {
            return Ok(());
        }
        self.publish(event)
    }

    /// Stores `event` as the sticky event of its type, then posts it.
    pub fn post_sticky<E: Event>(&self, event: E) -> Result<(), BusError> {
        self.post_sticky_ref(Arc::new(event))
    }

    /// Sticky variant of [`EventBus::post_ref`].
    pub fn post_sticky_ref(&self, event: EventRef) -> Result<(), BusError> {
        if !self.admit("post_sticky", event.type_name())? {
            return Ok(());
        }
        self.inner.sticky.put(EventRef::clone(&event));
        self.publish(event)
    }

    /// Current sticky event of exactly type `E`.
    pub fn sticky_event<E: Event>(&self) -> Option<Arc<E>> {
        self.inner
            .sticky
            .get(EventType::of::<E>())
            .and_then(|event| event.into_any().downcast::<E>().ok())
    }

    /// Removes and returns the sticky event of exactly type `E`.
    pub fn remove_sticky_event<E: Event>(&self) -> Option<Arc<E>> {
        self.inner
            .sticky
            .remove(EventType::of::<E>())
            .and_then(|event| event.into_any().downcast::<E>().ok())
    }

    /// Drops every sticky event.
    pub fn remove_all_sticky_events(&self) {
        self.inner.sticky.clear();
    }

    /// True if posting an `E` would reach at least one subscription.
    pub fn has_subscribers_for<E: Event>(&self) -> bool {
        self.inner
            .resolver
            .closure_of(EventType::of::<E>())
            .iter()
            .any(|ty| self.inner.registry.lookup(*ty).is_some())
    }

    /// Stops the bus.
    ///
    /// Background and async workers created by the bus stop accepting work
    /// and drain what is queued; workers supplied to the builder are left to
    /// their owner. Calling this again has no effect.
    pub fn shutdown(&self) {
        let claimed = self.inner.state.compare_exchange(
            BusState::Active.as_u8(),
            BusState::ShuttingDown.as_u8(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        if claimed.is_err() {
            debug!(bus = %self.id(), "shutdown already requested");
            return;
        }
        info!(bus = %self.id(), subscriptions = self.inner.registry.len(), "shutting down");
        self.inner.dispatcher.shutdown_owned();
        self.inner
            .state
            .store(BusState::Shutdown.as_u8(), Ordering::Release);
    }

    /// Ok(true) if the bus accepts `operation`; otherwise rejects per strictness.
    fn admit(&self, operation: &'static str, target: &'static str) -> Result<bool, BusError> {
        if self.state() == BusState::Active {
            return Ok(true);
        }
        self.reject(BusError::ShutDown {
            bus: self.id().to_string(),
            operation,
            target,
        })
        .map(|()| false)
    }

    /// Strict: returns `err`. Lenient: logs it.
    fn reject(&self, err: BusError) -> Result<(), BusError> {
        if self.inner.config.strict {
            return Err(err);
        }
        warn!(bus = %self.id(), label = err.as_label(), error = %err, "operation ignored");
        Ok(())
    }

    fn register_handle(&self, handle: SubscriberHandle) -> Result<(), BusError> {
        let (specs, source) = self
            .inner
            .inspectors
            .inspect(&handle)
            .unwrap_or((Vec::new(), "none"));

        // Validate everything first so a strict failure leaves nothing behind.
        let mut methods = Vec::with_capacity(specs.len());
        for spec in specs {
            match spec.validate(handle.type_name()) {
                Ok(method) => methods.push(method),
                Err(err) => self.reject(err)?,
            }
        }
        if methods.is_empty() {
            warn!(
                bus = %self.id(),
                subscriber = handle.type_name(),
                source,
                "subscriber has no handler methods"
            );
            return Ok(());
        }

        let mut sticky = Vec::new();
        let mut added = 0usize;
        for method in methods {
            let subscription = Arc::new(Subscription::new(handle.clone(), method));
            if !self.inner.registry.add(Arc::clone(&subscription)) {
                warn!(
                    bus = %self.id(),
                    subscriber = handle.type_name(),
                    method = subscription.method().name(),
                    "already registered; ignoring duplicate"
                );
                continue;
            }
            added += 1;
            if subscription.is_sticky() {
                sticky.push(subscription);
            }
        }
        debug!(
            bus = %self.id(),
            subscriber = handle.type_name(),
            source,
            added,
            "subscriber registered"
        );

        let mut first_err = None;
        for subscription in &sticky {
            if let Err(err) = self.replay_sticky(subscription) {
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    fn replay_sticky(&self, subscription: &Arc<Subscription>) -> Result<(), BusError> {
        let declared = subscription.event_type();
        let mut first_err = None;
        for (concrete, event) in self.inner.sticky.snapshot() {
            if !self.inner.resolver.is_assignable(concrete, declared) {
                continue;
            }
            trace!(
                bus = %self.id(),
                event = concrete.name(),
                method = subscription.method().name(),
                "replaying sticky event"
            );
            if let Err(err) = self.deliver(subscription, &event) {
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    fn publish(&self, event: EventRef) -> Result<(), BusError> {
        let closure = self.inner.resolver.closure_of(event.event_type());
        let mut matched = false;
        let mut first_err = None;

        'closure: for ty in closure.iter() {
            let Some(subscriptions) = self.inner.registry.lookup(*ty) else {
                continue;
            };
            matched = true;
            for subscription in subscriptions.iter() {
                if event.is_canceled() {
                    trace!(bus = %self.id(), event = event.type_name(), "event canceled");
                    break 'closure;
                }
                if let Err(err) = self.deliver(subscription, &event) {
                    first_err.get_or_insert(err);
                }
            }
        }

        if !matched {
            self.no_subscribers(event)?;
        }
        first_err.map_or(Ok(()), Err)
    }

    fn no_subscribers(&self, event: EventRef) -> Result<(), BusError> {
        if self.inner.config.log_no_subscriber {
            debug!(
                bus = %self.id(),
                event = event.type_name(),
                "no subscribers registered for event"
            );
        }
        let wrappable = !event.is::<DeadEvent>() && !event.is::<SubscriberExceptionEvent>();
        if self.inner.config.send_dead_event && wrappable {
            return self.publish(Arc::new(DeadEvent::new(event)));
        }
        Ok(())
    }

    /// Routes one subscription's unit of work. Routing errors go through
    /// [`EventBus::reject`].
    fn deliver(&self, subscription: &Arc<Subscription>, event: &EventRef) -> Result<(), BusError> {
        let job = self.unit_of_work(subscription, event);
        match self
            .inner
            .dispatcher
            .route(subscription, event.as_ref(), job)
        {
            Ok(()) => Ok(()),
            Err(err) => self.reject(err),
        }
    }

    fn unit_of_work(&self, subscription: &Arc<Subscription>, event: &EventRef) -> Job {
        let bus = self.clone();
        let subscription = Arc::clone(subscription);
        let event = EventRef::clone(event);
        Box::new(move || {
            // Deferred jobs may run after a later subscriber canceled.
            if event.is_canceled() {
                trace!(bus = %bus.id(), event = event.type_name(), "skipping canceled event");
                return;
            }
            bus.inner.guard.invoke(&bus, &subscription, &event);
        })
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .field("subscriptions", &self.inner.registry.len())
            .field("sticky_events", &self.inner.sticky.len())
            .field("main_thread", &self.inner.dispatcher.has_main_thread())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impl_event;
    use crate::subscriber::MethodTable;
    use std::sync::Mutex;

    #[derive(Debug)]
    struct Ping;
    impl_event!(Ping);

    #[derive(Default)]
    struct Log(Mutex<Vec<&'static str>>);

    impl Subscriber for Log {
        fn declare(methods: &mut MethodTable<Self>) {
            methods.on("on_ping", |log: &Log, _: &Ping| {
                log.0.lock().expect("log").push("ping");
                Ok(())
            });
        }
    }

    #[test]
    fn shutdown_is_idempotent_and_terminal() {
        let bus = EventBus::new().expect("bus");
        assert_eq!(bus.state(), BusState::Active);
        bus.shutdown();
        bus.shutdown();
        assert_eq!(bus.state(), BusState::Shutdown);
        assert!(bus.is_shutdown());
    }

    #[test]
    fn lenient_bus_ignores_operations_after_shutdown() {
        let bus = EventBus::new().expect("bus");
        let log = Arc::new(Log::default());
        bus.register(&log).expect("registered");
        bus.shutdown();

        bus.post(Ping).expect("ignored");
        bus.post_sticky(Ping).expect("ignored");
        bus.unregister(&log).expect("ignored");
        assert!(log.0.lock().expect("log").is_empty());
        assert!(bus.sticky_event::<Ping>().is_none());
        assert!(bus.is_registered(&log));
    }

    #[test]
    fn strict_bus_reports_operations_after_shutdown() {
        let bus = EventBus::builder().strict(true).build().expect("bus");
        bus.shutdown();
        let err = bus.post(Ping).unwrap_err();
        assert_eq!(err.as_label(), "bus_shut_down");
        let err = bus.register(&Arc::new(Log::default())).unwrap_err();
        assert!(err.to_string().contains("cannot register"));
    }

    #[test]
    fn debug_output_names_the_bus() {
        let bus = EventBus::new().expect("bus");
        let rendered = format!("{bus:?}");
        assert!(rendered.contains(&bus.id().to_string()));
        assert!(rendered.contains("Active"));
    }
}
