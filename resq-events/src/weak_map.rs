//! A map whose values are held by weak reference.
//!
//! Used for per-class instance caches, the shared field-store registry and
//! query caches. Dead entries are skipped by every read, dropped the next time
//! a mutable lookup touches them, and swept in bulk once they outnumber the
//! live ones. Iteration follows insertion order.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::rc::{Rc, Weak};

/// Stored entry count below which inserts never sweep.
const PRUNE_FLOOR: usize = 32;

struct Slot<V: ?Sized> {
    seq: u64,
    value: Weak<V>,
}

/// Key → `Weak<V>` map.
pub struct WeakMap<K, V: ?Sized> {
    map: HashMap<K, Slot<V>>,
    next_seq: u64,
    prune_at: usize,
}

impl<K, V: ?Sized> Default for WeakMap<K, V> {
    fn default() -> Self {
        Self {
            map: HashMap::new(),
            next_seq: 0,
            prune_at: PRUNE_FLOOR,
        }
    }
}

impl<K: fmt::Debug, V: ?Sized> fmt::Debug for WeakMap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set()
            .entries(
                self.map
                    .iter()
                    .filter(|(_, s)| s.value.strong_count() > 0)
                    .map(|(k, _)| k),
            )
            .finish()
    }
}

impl<K: Eq + Hash, V: ?Sized> WeakMap<K, V> {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a weak reference to `value`, returning the previous live value.
    ///
    /// Replacing a live entry keeps its position; anything else goes last.
    pub fn insert(&mut self, key: K, value: &Rc<V>) -> Option<Rc<V>> {
        let live = self
            .map
            .get(&key)
            .and_then(|s| s.value.upgrade().map(|v| (s.seq, v)));
        let (seq, previous) = match live {
            Some((seq, previous)) => (seq, Some(previous)),
            None => {
                self.next_seq += 1;
                (self.next_seq, None)
            }
        };
        self.map.insert(
            key,
            Slot {
                seq,
                value: Rc::downgrade(value),
            },
        );
        if self.map.len() > self.prune_at {
            self.prune();
            self.prune_at = (self.map.len() * 2).max(PRUNE_FLOOR);
        }
        previous
    }

    /// Looks up a live value. A dead entry found under `key` is removed.
    pub fn get<Q>(&mut self, key: &Q) -> Option<Rc<V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let value = self.map.get(key)?.value.upgrade();
        if value.is_none() {
            self.map.remove(key);
        }
        value
    }

    /// Looks up a live value without pruning.
    pub fn peek<Q>(&self, key: &Q) -> Option<Rc<V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.get(key).and_then(|s| s.value.upgrade())
    }

    /// Removes an entry, returning its value if it was still alive.
    pub fn remove<Q>(&mut self, key: &Q) -> Option<Rc<V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.remove(key).and_then(|s| s.value.upgrade())
    }

    /// Returns true if `key` maps to a live value.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.get(key).is_some_and(|s| s.value.strong_count() > 0)
    }

    /// Iterates live entries in insertion order. Dead entries are skipped.
    pub fn iter(&self) -> impl Iterator<Item = (&K, Rc<V>)> + '_ {
        let mut live: Vec<(u64, &K, Rc<V>)> = self
            .map
            .iter()
            .filter_map(|(k, s)| s.value.upgrade().map(|v| (s.seq, k, v)))
            .collect();
        live.sort_unstable_by_key(|(seq, _, _)| *seq);
        live.into_iter().map(|(_, k, v)| (k, v))
    }

    /// Iterates live values in insertion order.
    pub fn values(&self) -> impl Iterator<Item = Rc<V>> + '_ {
        self.iter().map(|(_, v)| v)
    }

    /// Drops every dead entry, returning how many were removed.
    pub fn prune(&mut self) -> usize {
        let before = self.map.len();
        self.map.retain(|_, s| s.value.strong_count() > 0);
        before - self.map.len()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.map
            .values()
            .filter(|s| s.value.strong_count() > 0)
            .count()
    }

    /// Returns true if there are no live entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of stored entries including dead ones not yet pruned.
    pub fn raw_len(&self) -> usize {
        self.map.len()
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.map.clear();
        self.prune_at = PRUNE_FLOOR;
    }
}
