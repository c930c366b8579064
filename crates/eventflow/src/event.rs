//! Event model.
//!
//! Events are plain Rust values implementing [`Event`]. Polymorphic matching
//! is declared, not inferred: an event type lists its direct supertypes via
//! [`Event::supertypes`], and a handler declared for any type in the resulting
//! closure receives the event. Supertypes may be "interface" marker types that
//! are never instantiated.
//!
//! Once posted, events travel as [`EventRef`] (`Arc<dyn AnyEvent>`).

use std::any::{Any, TypeId};
use std::borrow::Cow;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Identity of an event type. Compared by [`TypeId`] only.
#[derive(Clone, Copy)]
pub struct EventType {
    id: TypeId,
    name: &'static str,
    supertypes: fn() -> Vec<EventType>,
}

impl EventType {
    /// Returns the identity of `E`.
    pub fn of<E: Event>() -> Self {
        Self {
            id: TypeId::of::<E>(),
            name: std::any::type_name::<E>(),
            supertypes: E::supertypes,
        }
    }

    /// Underlying type id.
    pub fn id(&self) -> TypeId {
        self.id
    }

    /// Fully qualified type name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Type name without its module path.
    pub fn short_name(&self) -> &'static str {
        let base = self.name.split('<').next().unwrap_or(self.name);
        match base.rfind("::") {
            Some(idx) => &self.name[idx + 2..],
            None => self.name,
        }
    }

    /// Direct supertypes as declared by the type.
    pub fn supertypes(&self) -> Vec<EventType> {
        (self.supertypes)()
    }
}

impl PartialEq for EventType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for EventType {}

impl Hash for EventType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

/// A value that can be published through the bus.
///
/// All methods have defaults; most events only need `impl Event for T {}` or
/// [`impl_event!`](crate::impl_event).
///
/// ```
/// use std::any::Any;
/// use eventflow_core::{Event, EventType};
///
/// #[derive(Debug)]
/// struct Notification; // interface-like marker, never posted
/// impl Event for Notification {}
///
/// #[derive(Debug)]
/// struct Ping { seq: u32 }
///
/// #[derive(Debug)]
/// struct UrgentPing { ping: Ping }
///
/// impl Event for Ping {
///     fn supertypes() -> Vec<EventType> {
///         vec![EventType::of::<Notification>()]
///     }
/// }
///
/// impl Event for UrgentPing {
///     fn supertypes() -> Vec<EventType> {
///         vec![EventType::of::<Ping>()]
///     }
///
///     // Typed `Ping` handlers receive the embedded ping.
///     fn view(&self, ty: EventType) -> Option<&dyn Any> {
///         (ty == EventType::of::<Ping>()).then_some(&self.ping as &dyn Any)
///     }
/// }
/// ```
pub trait Event: fmt::Debug + Send + Sync + Sized + 'static {
    /// Direct supertypes of this type (parent types and implemented markers).
    fn supertypes() -> Vec<EventType> {
        Vec::new()
    }

    /// Borrows this event as an ancestor type, for typed handlers declared on
    /// that ancestor. The event's own type is handled automatically.
    fn view(&self, ty: EventType) -> Option<&dyn Any> {
        let _ = ty;
        None
    }

    /// Exposes the event's cancellation flag, if it has one.
    fn cancelable(&self) -> Option<&dyn Cancelable> {
        None
    }
}

/// Object-safe view of any [`Event`]; implemented for every event type.
pub trait AnyEvent: fmt::Debug + Send + Sync + 'static {
    /// The concrete type of this event.
    fn event_type(&self) -> EventType;

    /// Upcast for downcasting to the concrete type.
    fn as_any(&self) -> &dyn Any;

    /// Upcast of a shared event for downcasting to `Arc<E>`.
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;

    /// Borrows the event as `ty` (itself or an embedded ancestor).
    fn view_as(&self, ty: EventType) -> Option<&dyn Any>;

    /// The event's cancellation flag, if any.
    fn cancel_flag(&self) -> Option<&dyn Cancelable>;
}

impl<E: Event> AnyEvent for E {
    fn event_type(&self) -> EventType {
        EventType::of::<E>()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn view_as(&self, ty: EventType) -> Option<&dyn Any> {
        if ty.id() == TypeId::of::<E>() {
            Some(self)
        } else {
            Event::view(self, ty)
        }
    }

    fn cancel_flag(&self) -> Option<&dyn Cancelable> {
        Event::cancelable(self)
    }
}

impl dyn AnyEvent {
    /// True if the concrete type is `E`.
    pub fn is<E: Event>(&self) -> bool {
        self.as_any().is::<E>()
    }

    /// Downcasts to the concrete type.
    pub fn downcast_ref<E: Event>(&self) -> Option<&E> {
        self.as_any().downcast_ref::<E>()
    }

    /// Borrows the event as `E`, which may be an embedded ancestor.
    pub fn view<E: Event>(&self) -> Option<&E> {
        self.view_as(EventType::of::<E>())?.downcast_ref::<E>()
    }

    /// True if the event is cancelable and has been canceled.
    pub fn is_canceled(&self) -> bool {
        self.cancel_flag().is_some_and(|flag| flag.is_canceled())
    }

    /// Fully qualified name of the concrete type.
    pub fn type_name(&self) -> &'static str {
        self.event_type().name()
    }
}

/// A shared, type-erased event.
pub type EventRef = Arc<dyn AnyEvent>;

/// Mutable cancellation capability of an event.
///
/// Once canceled, subscriptions ordered after the canceling one are skipped
/// for that event instance. Deferred deliveries re-check the flag right
/// before the handler runs.
pub trait Cancelable: Send + Sync {
    /// True once [`Cancelable::cancel`] has been called.
    fn is_canceled(&self) -> bool;

    /// Marks the event canceled.
    fn cancel(&self);
}

/// Thread-safe cancellation flag to embed in cancelable events.
#[derive(Default)]
pub struct CancelFlag(AtomicBool);

impl CancelFlag {
    /// New, not canceled.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Cancelable for CancelFlag {
    fn is_canceled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }
}

impl fmt::Debug for CancelFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CancelFlag").field(&self.is_canceled()).finish()
    }
}

/// Posted in place of an event that matched no subscriptions.
///
/// A `DeadEvent` that itself matches nothing is dropped, never re-wrapped.
#[derive(Debug, Clone)]
pub struct DeadEvent {
    event: EventRef,
}

impl DeadEvent {
    /// Wraps the unmatched event.
    pub fn new(event: EventRef) -> Self {
        Self { event }
    }

    /// The event nobody subscribed to.
    pub fn event(&self) -> &EventRef {
        &self.event
    }

    /// Downcasts the wrapped event.
    pub fn downcast_ref<E: Event>(&self) -> Option<&E> {
        self.event.downcast_ref::<E>()
    }
}

impl Event for DeadEvent {}

/// Posted after a handler failure when
/// [`BusConfig::send_subscriber_exception_event`](crate::BusConfig) is on.
///
/// Failures while handling a `SubscriberExceptionEvent` do not produce another.
#[derive(Debug, Clone)]
pub struct SubscriberExceptionEvent {
    /// Id of the bus that dispatched the failing handler.
    pub bus: Uuid,
    /// The event being handled when the failure occurred.
    pub causing_event: EventRef,
    /// Type name of the failing subscriber.
    pub subscriber: &'static str,
    /// Name of the failing subscriber method.
    pub method: Cow<'static, str>,
    /// Stable label of the failure (see [`InvocationError::as_label`](crate::InvocationError::as_label)).
    pub label: &'static str,
    /// Rendered failure message.
    pub message: String,
    /// When the failure was observed.
    pub occurred_at: DateTime<Utc>,
}

impl Event for SubscriberExceptionEvent {}
