use crate::descriptor::TypeDescriptor;
use crate::handler::Payload;
use crate::key::{Route, SubscriptionKey, TopicPattern};
use fxhash::FxHashMap;
use std::collections::VecDeque;
use std::sync::Arc;

/// Bounded, most-recent-first payload history per route.
///
/// Effective capacity of a topic: its exact override, else the most specific
/// matching pattern override (longest pattern source, earliest set on ties),
/// else the default. A type resolves through its breadth-first ancestry, so an
/// override on a supertype applies to every subtype without its own.
#[derive(Debug, Default)]
pub(crate) struct RecencyCache {
    default_capacity: usize,
    topics: FxHashMap<Arc<str>, usize>,
    patterns: Vec<(TopicPattern, usize)>,
    types: FxHashMap<TypeDescriptor, usize>,
    items: FxHashMap<Route, VecDeque<Payload>>,
}

impl RecencyCache {
    pub(crate) fn new(default_capacity: usize) -> Self {
        Self { default_capacity, ..Self::default() }
    }

    pub(crate) const fn default_capacity(&self) -> usize {
        self.default_capacity
    }

    pub(crate) fn set_default_capacity(&mut self, capacity: usize) {
        self.default_capacity = capacity;
        self.reconcile();
    }

    /// Overrides the capacity for one key. Exact and polymorphic type keys
    /// share the same override.
    pub(crate) fn set_capacity(&mut self, key: SubscriptionKey, capacity: usize) {
        match key {
            SubscriptionKey::Topic(topic) => {
                self.topics.insert(topic, capacity);
            },
            SubscriptionKey::Pattern(pattern) => {
                match self.patterns.iter_mut().find(|(existing, _)| *existing == pattern) {
                    Some((_, slot)) => *slot = capacity,
                    None => self.patterns.push((pattern, capacity)),
                }
            },
            SubscriptionKey::Type(ty) | SubscriptionKey::ExactType(ty) => {
                self.types.insert(ty, capacity);
            },
        }
        self.reconcile();
    }

    pub(crate) fn capacity(&self, route: &Route) -> usize {
        match route {
            Route::Topic(topic) => self.topic_capacity(topic),
            Route::Type(ty) => ty
                .ancestry()
                .into_iter()
                .find_map(|ancestor| self.types.get(ancestor).copied())
                .unwrap_or(self.default_capacity),
        }
    }

    fn topic_capacity(&self, topic: &str) -> usize {
        if let Some(capacity) = self.topics.get(topic) {
            return *capacity;
        }
        let mut best: Option<(&TopicPattern, usize)> = None;
        for (pattern, capacity) in &self.patterns {
            if !pattern.is_match(topic) {
                continue;
            }
            if best.is_none_or(|(current, _)| pattern.as_str().len() > current.as_str().len()) {
                best = Some((pattern, *capacity));
            }
        }
        best.map_or(self.default_capacity, |(_, capacity)| capacity)
    }

    /// Inserts at the head and evicts from the tail.
    pub(crate) fn record(&mut self, route: &Route, payload: Payload) {
        let capacity = self.capacity(route);
        if capacity == 0 {
            return;
        }
        let items = self.items.entry(route.clone()).or_default();
        items.push_front(payload);
        items.truncate(capacity);
    }

    pub(crate) fn get(&self, route: &Route) -> Vec<Payload> {
        self.items.get(route).map(|items| items.iter().cloned().collect()).unwrap_or_default()
    }

    pub(crate) fn last(&self, route: &Route) -> Option<Payload> {
        self.items.get(route).and_then(|items| items.front().cloned())
    }

    pub(crate) fn clear(&mut self, route: &Route) {
        self.items.remove(route);
    }

    /// Clears every cached topic the pattern matches.
    pub(crate) fn clear_matching(&mut self, pattern: &TopicPattern) {
        self.items.retain(|route, _| route.topic().is_none_or(|topic| !pattern.is_match(topic)));
    }

    pub(crate) fn clear_all(&mut self) {
        self.items.clear();
    }

    /// Applies the current capacities to what is already cached. Shrinking
    /// drops the oldest items; growing keeps everything.
    fn reconcile(&mut self) {
        let capacities: Vec<(Route, usize)> =
            self.items.keys().map(|route| (route.clone(), self.capacity(route))).collect();
        for (route, capacity) in capacities {
            if capacity == 0 {
                self.items.remove(&route);
            } else if let Some(items) = self.items.get_mut(&route) {
                items.truncate(capacity);
            }
        }
    }
}
