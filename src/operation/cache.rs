//! Bounded least-recently-used cache

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

/// Fixed-capacity map evicting the least recently used entry.
///
/// Recency is a monotonically increasing stamp per access; the stamp index
/// gives the eviction candidate in O(log n).
#[derive(Debug, Clone)]
pub struct LruCache<K, V> {
    capacity: usize,
    entries: HashMap<K, (V, u64)>,
    recency: BTreeMap<u64, K>,
    clock: u64,
}

impl<K, V> LruCache<K, V>
where
    K: Clone + Eq + Hash,
{
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            clock: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Look up `key` and mark it most recently used.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let stamp = self.tick();
        let (_, last) = self.entries.get_mut(key)?;
        let previous = std::mem::replace(last, stamp);
        if let Some(k) = self.recency.remove(&previous) {
            self.recency.insert(stamp, k);
        }
        self.entries.get(key).map(|(value, _)| value)
    }

    /// Look up `key` without touching recency.
    pub fn peek(&self, key: &K) -> Option<&V> {
        self.entries.get(key).map(|(value, _)| value)
    }

    /// Insert or replace `key`, returning the entry evicted to make room.
    pub fn insert(&mut self, key: K, value: V) -> Option<(K, V)> {
        let stamp = self.tick();
        if let Some((_, previous)) = self.entries.insert(key.clone(), (value, stamp)) {
            self.recency.remove(&previous);
            self.recency.insert(stamp, key);
            return None;
        }
        self.recency.insert(stamp, key);

        if self.entries.len() <= self.capacity {
            return None;
        }
        let (_, oldest) = self.recency.pop_first()?;
        self.entries
            .remove(&oldest)
            .map(|(value, _)| (oldest, value))
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let (value, stamp) = self.entries.remove(key)?;
        self.recency.remove(&stamp);
        Some(value)
    }

    /// Keys from least to most recently used.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.recency.values()
    }
}
