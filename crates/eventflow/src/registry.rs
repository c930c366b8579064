//! Subscription registry.
//!
//! Maps each event type to a priority-ordered list of subscriptions. Lists
//! are copy-on-write: a mutation builds a new list under the entry's shard
//! lock and swaps it in, so [`SubscriptionRegistry::lookup`] hands out an
//! immutable snapshot that concurrent mutations never tear.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;

use crate::event::EventType;
use crate::mode::DeliveryMode;
use crate::subscriber::{SubscriberHandle, SubscriberId, SubscriberMethod};

/// One registered handler method bound to one subscriber instance.
///
/// Two subscriptions are equal when they bind the same subscriber instance to
/// the same method (name and event type).
pub struct Subscription {
    subscriber: SubscriberHandle,
    method: SubscriberMethod,
}

impl Subscription {
    /// Binds `method` to `subscriber`.
    pub fn new(subscriber: SubscriberHandle, method: SubscriberMethod) -> Self {
        Self { subscriber, method }
    }

    /// The subscriber.
    pub fn subscriber(&self) -> &SubscriberHandle {
        &self.subscriber
    }

    /// The handler method.
    pub fn method(&self) -> &SubscriberMethod {
        &self.method
    }

    /// Declared event type.
    pub fn event_type(&self) -> EventType {
        self.method.event_type()
    }

    /// Delivery mode.
    pub fn mode(&self) -> DeliveryMode {
        self.method.mode()
    }

    /// Priority; higher runs earlier.
    pub fn priority(&self) -> i32 {
        self.method.priority()
    }

    /// True if sticky events are replayed on registration.
    pub fn is_sticky(&self) -> bool {
        self.method.is_sticky()
    }

    /// `Subscriber#method` for logs.
    pub fn describe(&self) -> String {
        format!("{}#{}", self.subscriber.type_name(), self.method.name())
    }
}

impl PartialEq for Subscription {
    fn eq(&self, other: &Self) -> bool {
        self.subscriber.id() == other.subscriber.id() && self.method.same_method(&other.method)
    }
}

impl Eq for Subscription {}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("subscriber", &self.subscriber.type_name())
            .field("method", &self.method.name())
            .field("event_type", &self.event_type())
            .field("mode", &self.mode())
            .field("priority", &self.priority())
            .field("sticky", &self.is_sticky())
            .finish()
    }
}

/// Immutable, priority-ordered snapshot of one event type's subscriptions.
pub type SubscriptionList = Arc<Vec<Arc<Subscription>>>;

/// Concurrent map from event type to ordered subscriptions.
#[derive(Default)]
pub struct SubscriptionRegistry {
    entries: DashMap<EventType, SubscriptionList>,
}

impl SubscriptionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `subscription` under its declared event type.
    ///
    /// Returns `false` (and changes nothing) if an equal subscription is
    /// already present. Placement is after every subscription of equal or
    /// higher priority, so ties keep insertion order.
    pub fn add(&self, subscription: Arc<Subscription>) -> bool {
        let mut entry = self.entries.entry(subscription.event_type()).or_default();
        if entry.iter().any(|existing| **existing == *subscription) {
            return false;
        }
        let priority = subscription.priority();
        let mut next = Vec::with_capacity(entry.len() + 1);
        next.extend(entry.iter().cloned());
        let at = next.partition_point(|existing| existing.priority() >= priority);
        next.insert(at, subscription);
        *entry = Arc::new(next);
        true
    }

    /// Removes every subscription of `subscriber`; returns how many were removed.
    pub fn remove(&self, subscriber: SubscriberId) -> usize {
        let mut removed = 0;
        for mut entry in self.entries.iter_mut() {
            let before = entry.len();
            if entry.iter().all(|s| s.subscriber().id() != subscriber) {
                continue;
            }
            let kept: Vec<_> = entry
                .iter()
                .filter(|s| s.subscriber().id() != subscriber)
                .cloned()
                .collect();
            removed += before - kept.len();
            *entry = Arc::new(kept);
        }
        if removed > 0 {
            self.entries.retain(|_, list| !list.is_empty());
        }
        removed
    }

    /// Snapshot of subscriptions declared for exactly `event_type`.
    pub fn lookup(&self, event_type: EventType) -> Option<SubscriptionList> {
        self.entries
            .get(&event_type)
            .map(|list| Arc::clone(list.value()))
            .filter(|list| !list.is_empty())
    }

    /// True if `subscriber` has at least one subscription.
    pub fn contains(&self, subscriber: SubscriberId) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.iter().any(|s| s.subscriber().id() == subscriber))
    }

    /// Total number of subscriptions.
    pub fn len(&self) -> usize {
        self.entries.iter().map(|entry| entry.len()).sum()
    }

    /// True if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
