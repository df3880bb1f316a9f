use crate::handler::{Held, HandlerId};
use crate::key::SubscriptionKey;
use fxhash::FxHashMap;
use std::fmt;
use std::sync::Arc;

struct Entry<T: ?Sized> {
    held: Held<T>,
    id: HandlerId,
    priority: i32,
    seq: u64,
}

/// A registered entry copied out of the registry for one publication.
pub(crate) struct Candidate<T: ?Sized> {
    pub(crate) key: SubscriptionKey,
    pub(crate) id: HandlerId,
    pub(crate) held: Held<T>,
}

/// An entry whose owner was still alive when the publication resolved it.
pub(crate) struct Live<T: ?Sized> {
    pub(crate) target: Arc<T>,
    pub(crate) id: HandlerId,
}

/// Per-key ordered entries.
///
/// Each list stays sorted by ascending priority; equal priorities keep
/// registration order. Entries are unique per key by [`HandlerId`].
pub(crate) struct Registry<T: ?Sized> {
    lists: FxHashMap<SubscriptionKey, Vec<Entry<T>>>,
    next_seq: u64,
}

impl<T: ?Sized> fmt::Debug for Registry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.lists.iter().map(|(key, list)| {
                (key, list.iter().map(|entry| (entry.priority, &entry.held)).collect::<Vec<_>>())
            }))
            .finish()
    }
}

impl<T: ?Sized> Default for Registry<T> {
    fn default() -> Self {
        Self { lists: FxHashMap::default(), next_seq: 0 }
    }
}

impl<T: ?Sized> Registry<T> {
    /// Returns `false` if `id` is already registered under `key`.
    pub(crate) fn insert(
        &mut self,
        key: SubscriptionKey,
        id: HandlerId,
        held: Held<T>,
        priority: i32,
    ) -> bool {
        let list = self.lists.entry(key).or_default();
        list.retain(|entry| entry.held.is_alive());
        if list.iter().any(|entry| entry.id == id) {
            return false;
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        let at = list.partition_point(|entry| entry.priority <= priority);
        list.insert(at, Entry { held, id, priority, seq });
        true
    }

    pub(crate) fn remove(&mut self, key: &SubscriptionKey, id: HandlerId) -> bool {
        let Some(list) = self.lists.get_mut(key) else {
            return false;
        };
        let before = list.len();
        list.retain(|entry| entry.id != id);
        let removed = list.len() != before;
        if list.is_empty() {
            self.lists.remove(key);
        }
        removed
    }

    /// Drops entries that a publication found dead.
    pub(crate) fn prune(&mut self, stale: &[(SubscriptionKey, HandlerId)]) {
        for (key, id) in stale {
            self.remove(key, *id);
        }
    }

    /// All entries under every key accepted by `filter`, merged into one
    /// sequence ordered by priority then registration.
    pub(crate) fn candidates(
        &self,
        mut filter: impl FnMut(&SubscriptionKey) -> bool,
    ) -> Vec<Candidate<T>> {
        let mut merged: Vec<(i32, u64, Candidate<T>)> = self
            .lists
            .iter()
            .filter(|(key, _)| filter(key))
            .flat_map(|(key, list)| {
                list.iter().map(|entry| {
                    (
                        entry.priority,
                        entry.seq,
                        Candidate { key: key.clone(), id: entry.id, held: entry.held.clone() },
                    )
                })
            })
            .collect();
        merged.sort_by_key(|(priority, seq, _)| (*priority, *seq));
        merged.into_iter().map(|(_, _, candidate)| candidate).collect()
    }

    pub(crate) fn contains(&self, key: &SubscriptionKey, id: HandlerId) -> bool {
        self.lists.get(key).is_some_and(|list| list.iter().any(|entry| entry.id == id))
    }

    pub(crate) fn len(&self) -> usize {
        self.lists.values().map(Vec::len).sum()
    }

    /// Removes everything and returns how many entries were dropped.
    pub(crate) fn clear(&mut self) -> usize {
        let count = self.len();
        self.lists.clear();
        count
    }
}

/// Resolves candidates outside the registry lock: liveness probes and weak
/// upgrades run here. Dead entries are returned for pruning.
pub(crate) fn resolve<T: ?Sized>(
    candidates: Vec<Candidate<T>>,
) -> (Vec<Live<T>>, Vec<(SubscriptionKey, HandlerId)>) {
    let mut live = Vec::with_capacity(candidates.len());
    let mut stale = Vec::new();
    for Candidate { key, id, held } in candidates {
        match held.resolve() {
            Some(target) => live.push(Live { target, id }),
            None => stale.push((key, id)),
        }
    }
    (live, stale)
}
