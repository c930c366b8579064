//! Event type closure resolution.
//!
//! The closure of a concrete type is the type itself followed by every
//! supertype reachable through [`Event::supertypes`](crate::Event::supertypes),
//! in breadth-first order, each type at most once. Closures are computed
//! lazily and cached for the life of the resolver; the cache never evicts.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use dashmap::DashMap;
use smallvec::SmallVec;

use crate::event::EventType;

/// Cached breadth-first supertype closure per concrete event type.
#[derive(Default)]
pub struct EventTypeResolver {
    cache: DashMap<EventType, Arc<[EventType]>>,
}

impl EventTypeResolver {
    /// Creates an empty resolver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the closure of `concrete`; the first element is always `concrete`.
    ///
    /// Concurrent first calls for the same type may both compute, but every
    /// caller observes the first closure that was cached.
    pub fn closure_of(&self, concrete: EventType) -> Arc<[EventType]> {
        if let Some(hit) = self.cache.get(&concrete) {
            return Arc::clone(hit.value());
        }
        let computed = Self::compute(concrete);
        Arc::clone(self.cache.entry(concrete).or_insert(computed).value())
    }

    /// True if a handler declared for `declared` accepts events of `concrete`.
    pub fn is_assignable(&self, concrete: EventType, declared: EventType) -> bool {
        concrete == declared || self.closure_of(concrete).contains(&declared)
    }

    /// Number of cached closures.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// True if nothing has been resolved yet.
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    fn compute(root: EventType) -> Arc<[EventType]> {
        let mut order: SmallVec<[EventType; 8]> = SmallVec::new();
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([root]);

        while let Some(current) = queue.pop_front() {
            if !seen.insert(current) {
                continue;
            }
            order.push(current);
            for parent in current.supertypes() {
                if !seen.contains(&parent) {
                    queue.push_back(parent);
                }
            }
        }

        Arc::from(order.as_slice())
    }
}
