//! Subscribers and their handler methods.
//!
//! A subscriber is any `Send + Sync` value registered behind an `Arc`. Its
//! handler methods are described by [`MethodSpec`]s, produced either by the
//! subscriber itself ([`Subscriber::declare`]) or by a precomputed
//! [`SubscriberIndex`](crate::SubscriberIndex). Registration validates each
//! spec into an immutable [`SubscriberMethod`].
//!
//! ```
//! use eventflow_core::{impl_event, DeliveryMode, MethodTable, Subscriber};
//!
//! #[derive(Debug)]
//! struct Ping;
//! impl_event!(Ping);
//!
//! struct Logger;
//!
//! impl Subscriber for Logger {
//!     fn declare(methods: &mut MethodTable<Self>) {
//!         methods
//!             .on("on_ping", |_: &Logger, _: &Ping| Ok(()))
//!             .mode(DeliveryMode::Background)
//!             .priority(10);
//!     }
//! }
//! ```

use std::any::{type_name, Any, TypeId};
use std::borrow::Cow;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use smallvec::SmallVec;
use tracing::warn;

use crate::error::{BusError, InvocationError};
use crate::event::{AnyEvent, Event, EventType};
use crate::mode::DeliveryMode;

/// Calls a handler: `(subscriber, event) -> outcome`.
pub type Invoker = Arc<
    dyn Fn(&(dyn Any + Send + Sync), &dyn AnyEvent) -> Result<(), InvocationError> + Send + Sync,
>;

/// A value that declares its own handler methods.
///
/// Types known to an installed [`SubscriberIndex`](crate::SubscriberIndex)
/// may keep the default, which declares nothing.
pub trait Subscriber: Send + Sync + Sized + 'static {
    /// Adds this type's handler methods to `methods`.
    fn declare(methods: &mut MethodTable<Self>) {
        let _ = methods;
    }
}

/// Identity of a registered subscriber instance (its allocation address).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(usize);

impl SubscriberId {
    /// Identity of the value behind `subscriber`.
    pub fn of<S: ?Sized>(subscriber: &Arc<S>) -> Self {
        Self(Arc::as_ptr(subscriber) as *const () as usize)
    }
}

/// Type-erased, shared reference to a registered subscriber.
#[derive(Clone)]
pub struct SubscriberHandle {
    target: Arc<dyn Any + Send + Sync>,
    id: SubscriberId,
    type_id: TypeId,
    type_name: &'static str,
    declare: fn() -> Vec<MethodSpec>,
}

impl SubscriberHandle {
    /// Wraps `subscriber`, keeping it alive while registered.
    pub fn new<S: Subscriber>(subscriber: &Arc<S>) -> Self {
        let target: Arc<dyn Any + Send + Sync> = Arc::clone(subscriber) as _;
        Self {
            target,
            id: SubscriberId::of(subscriber),
            type_id: TypeId::of::<S>(),
            type_name: type_name::<S>(),
            declare: declared_methods::<S>,
        }
    }

    /// Instance identity.
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Type id of the subscriber.
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Type name of the subscriber.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// The subscriber value.
    pub fn target(&self) -> &(dyn Any + Send + Sync) {
        self.target.as_ref()
    }

    /// Downcasts the subscriber value.
    pub fn downcast_ref<S: Any>(&self) -> Option<&S> {
        self.target.downcast_ref::<S>()
    }

    /// Runs the subscriber type's own [`Subscriber::declare`].
    pub(crate) fn declared(&self) -> Vec<MethodSpec> {
        (self.declare)()
    }
}

impl fmt::Debug for SubscriberHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberHandle")
            .field("type", &self.type_name)
            .field("id", &self.id)
            .finish()
    }
}

fn declared_methods<S: Subscriber>() -> Vec<MethodSpec> {
    let mut table = MethodTable::<S>::new();
    S::declare(&mut table);
    table.into_specs()
}

/// Which inspection strategy produced a method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// From [`Subscriber::declare`].
    Declared,
    /// From a precomputed [`SubscriberIndex`](crate::SubscriberIndex).
    Indexed,
}

/// Raw, unvalidated description of one handler method.
#[derive(Clone)]
pub struct MethodSpec {
    name: Cow<'static, str>,
    event_type: Option<EventType>,
    mode: DeliveryMode,
    priority: i32,
    sticky: bool,
    invoker: Option<Invoker>,
    origin: Origin,
}

impl MethodSpec {
    /// A spec with only a name: no event type, no invoker, inline, priority 0.
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            name: name.into(),
            event_type: None,
            mode: DeliveryMode::Inline,
            priority: 0,
            sticky: false,
            invoker: None,
            origin: Origin::Declared,
        }
    }

    /// A spec for `E` with no invoker bound; invoking it reports a mechanism failure.
    pub fn unbound<E: Event>(name: impl Into<Cow<'static, str>>) -> Self {
        let mut spec = Self::new(name);
        spec.event_type(EventType::of::<E>());
        spec
    }

    /// Method name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sets the declared event type.
    pub fn event_type(&mut self, ty: EventType) -> &mut Self {
        self.event_type = Some(ty);
        self
    }

    /// Sets the delivery mode.
    pub fn mode(&mut self, mode: DeliveryMode) -> &mut Self {
        self.mode = mode;
        self
    }

    /// Sets the delivery mode by name. Unknown names log a warning and fall
    /// back to [`DeliveryMode::Inline`].
    pub fn mode_named(&mut self, name: &str) -> &mut Self {
        self.mode = match name.parse::<DeliveryMode>() {
            Ok(mode) => mode,
            Err(err) => {
                warn!(method = %self.name, error = %err, "falling back to inline delivery");
                DeliveryMode::Inline
            }
        };
        self
    }

    /// Sets the priority; higher runs earlier.
    pub fn priority(&mut self, priority: i32) -> &mut Self {
        self.priority = priority;
        self
    }

    /// Marks the method as wanting sticky replay on registration.
    pub fn sticky(&mut self, sticky: bool) -> &mut Self {
        self.sticky = sticky;
        self
    }

    /// Binds the invoker.
    pub fn invoker(&mut self, invoker: Invoker) -> &mut Self {
        self.invoker = Some(invoker);
        self
    }

    pub(crate) fn set_origin(&mut self, origin: Origin) {
        self.origin = origin;
    }

    /// Validates into an immutable method of `subscriber`.
    pub(crate) fn validate(self, subscriber: &'static str) -> Result<SubscriberMethod, BusError> {
        let Some(event_type) = self.event_type else {
            return Err(BusError::MalformedDescriptor {
                subscriber,
                method: self.name,
            });
        };
        Ok(SubscriberMethod {
            name: self.name,
            event_type,
            mode: self.mode,
            priority: self.priority,
            sticky: self.sticky,
            invoker: self.invoker,
            origin: self.origin,
        })
    }
}

impl fmt::Debug for MethodSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodSpec")
            .field("name", &self.name)
            .field("event_type", &self.event_type)
            .field("mode", &self.mode)
            .field("priority", &self.priority)
            .field("sticky", &self.sticky)
            .field("bound", &self.invoker.is_some())
            .field("origin", &self.origin)
            .finish()
    }
}

/// Typed builder of [`MethodSpec`]s for subscriber type `S`.
pub struct MethodTable<S> {
    specs: SmallVec<[MethodSpec; 4]>,
    origin: Origin,
    _subscriber: PhantomData<fn(&S)>,
}

impl<S: Send + Sync + 'static> MethodTable<S> {
    /// Empty table of declared methods.
    pub fn new() -> Self {
        Self::with_origin(Origin::Declared)
    }

    pub(crate) fn with_origin(origin: Origin) -> Self {
        Self {
            specs: SmallVec::new(),
            origin,
            _subscriber: PhantomData,
        }
    }

    /// Adds a typed handler for `E`.
    ///
    /// The handler also receives events whose closure contains `E`, provided
    /// they can be viewed as `E` (see [`Event::view`]); otherwise the
    /// invocation fails with [`InvocationError::Mechanism`].
    pub fn on<E, F>(&mut self, name: &'static str, handler: F) -> &mut MethodSpec
    where
        E: Event,
        F: Fn(&S, &E) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let invoker: Invoker = Arc::new(
            move |target: &(dyn Any + Send + Sync),
                  event: &dyn AnyEvent|
                  -> Result<(), InvocationError> {
                let subscriber = downcast_subscriber::<S>(target)?;
                let typed = event.view::<E>().ok_or_else(|| {
                    InvocationError::Mechanism(format!(
                        "argument type mismatch for {}#{}: expected {}, got {}",
                        type_name::<S>(),
                        name,
                        type_name::<E>(),
                        event.type_name()
                    ))
                })?;
                handler(subscriber, typed).map_err(InvocationError::Handler)
            },
        );
        let mut spec = MethodSpec::new(name);
        spec.event_type(EventType::of::<E>()).invoker(invoker);
        self.push(spec)
    }

    /// Adds a handler declared on `E` that receives the erased event, for
    /// marker types and handlers that downcast themselves.
    pub fn on_any<E, F>(&mut self, name: &'static str, handler: F) -> &mut MethodSpec
    where
        E: Event,
        F: Fn(&S, &dyn AnyEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let invoker: Invoker = Arc::new(
            move |target: &(dyn Any + Send + Sync),
                  event: &dyn AnyEvent|
                  -> Result<(), InvocationError> {
                let subscriber = downcast_subscriber::<S>(target)?;
                handler(subscriber, event).map_err(InvocationError::Handler)
            },
        );
        let mut spec = MethodSpec::new(name);
        spec.event_type(EventType::of::<E>()).invoker(invoker);
        self.push(spec)
    }

    /// Adds a prepared spec.
    pub fn push(&mut self, mut spec: MethodSpec) -> &mut MethodSpec {
        spec.set_origin(self.origin);
        let idx = self.specs.len();
        self.specs.push(spec);
        &mut self.specs[idx]
    }

    /// Number of methods so far.
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    /// True if no methods were added.
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Consumes the table.
    pub fn into_specs(self) -> Vec<MethodSpec> {
        self.specs.into_vec()
    }
}

impl<S: Send + Sync + 'static> Default for MethodTable<S> {
    fn default() -> Self {
        Self::new()
    }
}

fn downcast_subscriber<S: Any>(target: &(dyn Any + Send + Sync)) -> Result<&S, InvocationError> {
    target.downcast_ref::<S>().ok_or_else(|| {
        InvocationError::Mechanism(format!("subscriber target is not a {}", type_name::<S>()))
    })
}

/// Validated, immutable handler method.
#[derive(Clone)]
pub struct SubscriberMethod {
    name: Cow<'static, str>,
    event_type: EventType,
    mode: DeliveryMode,
    priority: i32,
    sticky: bool,
    invoker: Option<Invoker>,
    origin: Origin,
}

impl SubscriberMethod {
    /// Method name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared event type.
    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    /// Delivery mode.
    pub fn mode(&self) -> DeliveryMode {
        self.mode
    }

    /// Priority; higher runs earlier.
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// True if sticky events are replayed on registration.
    pub fn is_sticky(&self) -> bool {
        self.sticky
    }

    /// Bound invoker, if any.
    pub fn invoker(&self) -> Option<&Invoker> {
        self.invoker.as_ref()
    }

    /// Strategy that produced this method.
    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// Describes this method as declared on `subscriber`.
    pub fn descriptor(&self, subscriber: &'static str) -> MethodDescriptor {
        MethodDescriptor {
            subscriber,
            method: self.name.clone(),
            event_type: self.event_type,
            mode: self.mode,
            priority: self.priority,
            sticky: self.sticky,
        }
    }

    /// True if both describe the same method (name and event type).
    pub(crate) fn same_method(&self, other: &SubscriberMethod) -> bool {
        self.name == other.name && self.event_type == other.event_type
    }
}

impl fmt::Debug for SubscriberMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberMethod")
            .field("name", &self.name)
            .field("event_type", &self.event_type)
            .field("mode", &self.mode)
            .field("priority", &self.priority)
            .field("sticky", &self.sticky)
            .finish()
    }
}

/// Full description of a handler method, reported with failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    /// Type name of the subscriber.
    pub subscriber: &'static str,
    /// Method name.
    pub method: Cow<'static, str>,
    /// Declared event type.
    pub event_type: EventType,
    /// Delivery mode.
    pub mode: DeliveryMode,
    /// Priority.
    pub priority: i32,
    /// Sticky flag.
    pub sticky: bool,
}

impl fmt::Display for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}({})", self.subscriber, self.method, self.event_type.name())
    }
}
