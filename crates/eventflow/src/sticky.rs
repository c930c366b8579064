//! Last-event-per-type store for sticky publishing.

use dashmap::DashMap;

use crate::event::{EventRef, EventType};

/// Holds the most recent sticky event of each concrete type.
#[derive(Default)]
pub struct StickyStore {
    events: DashMap<EventType, EventRef>,
}

impl StickyStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `event` under its concrete type, returning the one it replaced.
    pub fn put(&self, event: EventRef) -> Option<EventRef> {
        self.events.insert(event.event_type(), event)
    }

    /// Current sticky event of exactly `event_type`.
    pub fn get(&self, event_type: EventType) -> Option<EventRef> {
        self.events.get(&event_type).map(|e| EventRef::clone(e.value()))
    }

    /// Removes and returns the sticky event of exactly `event_type`.
    pub fn remove(&self, event_type: EventType) -> Option<EventRef> {
        self.events.remove(&event_type).map(|(_, event)| event)
    }

    /// Drops every sticky event.
    pub fn clear(&self) {
        self.events.clear();
    }

    /// Copies the current contents. No shard lock is held once this returns,
    /// so callers may deliver the events without blocking writers.
    pub fn snapshot(&self) -> Vec<(EventType, EventRef)> {
        self.events
            .iter()
            .map(|entry| (*entry.key(), EventRef::clone(entry.value())))
            .collect()
    }

    /// Number of stored events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// True if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::impl_event;

    #[derive(Debug)]
    struct Config {
        mode: &'static str,
    }
    #[derive(Debug)]
    struct Session;
    impl_event!(Config, Session);

    #[test]
    fn put_replaces_the_previous_event_of_the_same_type() {
        let store = StickyStore::new();
        assert!(store.put(Arc::new(Config { mode: "light" })).is_none());
        let replaced = store.put(Arc::new(Config { mode: "dark" })).expect("replaced");
        assert_eq!(replaced.downcast_ref::<Config>().map(|c| c.mode), Some("light"));

        let current = store.get(EventType::of::<Config>()).expect("stored");
        assert_eq!(current.downcast_ref::<Config>().map(|c| c.mode), Some("dark"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn remove_and_clear() {
        let store = StickyStore::new();
        store.put(Arc::new(Config { mode: "dark" }));
        store.put(Arc::new(Session));

        assert!(store.remove(EventType::of::<Session>()).is_some());
        assert!(store.remove(EventType::of::<Session>()).is_none());
        assert_eq!(store.snapshot().len(), 1);

        store.clear();
        assert!(store.is_empty());
    }
}
