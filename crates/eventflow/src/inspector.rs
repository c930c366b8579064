//! Subscriber inspection strategies.
//!
//! The bus asks a chain of [`SubscriberInspector`]s for a subscriber's
//! methods and uses the first answer:
//!
//! 1. any configured precomputed tables ([`SubscriberIndex`]) or custom
//!    inspectors, when `use_index` is enabled;
//! 2. [`DeclaredInspector`], which runs the subscriber's own
//!    [`Subscriber::declare`](crate::Subscriber::declare). Always present.
//!
//! An inspector returns `None` when it has no information about the type.
//! `Some(vec![])` is an answer ("no methods") and stops the chain.

use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;

use crate::subscriber::{MethodSpec, MethodTable, Origin, SubscriberHandle};

/// Produces handler method descriptions for a subscriber.
pub trait SubscriberInspector: Send + Sync {
    /// Methods of `subscriber`, or `None` if this inspector does not know its type.
    fn inspect(&self, subscriber: &SubscriberHandle) -> Option<Vec<MethodSpec>>;

    /// Name used in logs.
    fn name(&self) -> &'static str {
        type_name::<Self>()
    }
}

/// Runs [`Subscriber::declare`](crate::Subscriber::declare), caching per type.
#[derive(Default)]
pub struct DeclaredInspector {
    cache: DashMap<TypeId, Arc<[MethodSpec]>>,
}

impl DeclaredInspector {
    /// Creates an inspector with an empty cache.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SubscriberInspector for DeclaredInspector {
    fn inspect(&self, subscriber: &SubscriberHandle) -> Option<Vec<MethodSpec>> {
        if let Some(hit) = self.cache.get(&subscriber.type_id()) {
            return Some(hit.to_vec());
        }
        let declared: Arc<[MethodSpec]> = subscriber.declared().into();
        let cached = self
            .cache
            .entry(subscriber.type_id())
            .or_insert(declared)
            .to_vec();
        Some(cached)
    }

    fn name(&self) -> &'static str {
        "declared"
    }
}

/// Precomputed method table keyed by subscriber type.
///
/// Built once at the composition root, typically by generated code:
///
/// ```
/// use eventflow_core::{impl_event, SubscriberIndex};
///
/// #[derive(Debug)]
/// struct Ping;
/// impl_event!(Ping);
///
/// struct Metrics;
///
/// let index = SubscriberIndex::builder()
///     .subscriber::<Metrics>(|t| {
///         t.on("count_ping", |_: &Metrics, _: &Ping| Ok(())).mode_named("async");
///     })
///     .build();
/// assert_eq!(index.len(), 1);
/// ```
#[derive(Default, Clone)]
pub struct SubscriberIndex {
    tables: HashMap<TypeId, Arc<[MethodSpec]>>,
}

impl SubscriberIndex {
    /// Starts an empty index.
    pub fn builder() -> SubscriberIndexBuilder {
        SubscriberIndexBuilder::default()
    }

    /// True if the index has a table for type `S`.
    pub fn knows<S: 'static>(&self) -> bool {
        self.tables.contains_key(&TypeId::of::<S>())
    }

    /// Number of subscriber types in the index.
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// True if no subscriber types are indexed.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

impl SubscriberInspector for SubscriberIndex {
    fn inspect(&self, subscriber: &SubscriberHandle) -> Option<Vec<MethodSpec>> {
        self.tables
            .get(&subscriber.type_id())
            .map(|table| table.to_vec())
    }

    fn name(&self) -> &'static str {
        "index"
    }
}

/// Builder for [`SubscriberIndex`].
#[derive(Default)]
pub struct SubscriberIndexBuilder {
    tables: HashMap<TypeId, Vec<MethodSpec>>,
}

impl SubscriberIndexBuilder {
    /// Adds methods for subscriber type `S`. Calling this with an empty body
    /// records that `S` has no handler methods.
    pub fn subscriber<S: Send + Sync + 'static>(
        mut self,
        describe: impl FnOnce(&mut MethodTable<S>),
    ) -> Self {
        let mut table = MethodTable::<S>::with_origin(Origin::Indexed);
        describe(&mut table);
        self.tables
            .entry(TypeId::of::<S>())
            .or_default()
            .extend(table.into_specs());
        self
    }

    /// Freezes the index.
    pub fn build(self) -> SubscriberIndex {
        SubscriberIndex {
            tables: self
                .tables
                .into_iter()
                .map(|(ty, specs)| (ty, Arc::from(specs)))
                .collect(),
        }
    }
}

/// Ordered inspectors consulted at registration.
pub(crate) struct InspectorChain {
    inspectors: Vec<Arc<dyn SubscriberInspector>>,
}

impl InspectorChain {
    /// `preferred` inspectors first, then the declaring fallback.
    pub(crate) fn new(preferred: Vec<Arc<dyn SubscriberInspector>>) -> Self {
        let mut inspectors = preferred;
        inspectors.push(Arc::new(DeclaredInspector::new()));
        Self { inspectors }
    }

    /// First answer in the chain, with the name of the inspector that gave it.
    pub(crate) fn inspect(
        &self,
        subscriber: &SubscriberHandle,
    ) -> Option<(Vec<MethodSpec>, &'static str)> {
        self.inspectors.iter().find_map(|inspector| {
            inspector
                .inspect(subscriber)
                .map(|specs| (specs, inspector.name()))
        })
    }
}
