//! LRU (Least Recently Used) map with a fixed capacity
//!
//! Entries live in a slab whose slots are chained into a doubly-linked recency list,
//! so touching, inserting and evicting are all O(1). Evicted entries are handed back
//! to the caller, which owns any cleanup attached to them.

use std::hash::Hash;

use ahash::AHashMap;

#[derive(Debug, Clone, Copy, Default)]
struct Links {
    newer: Option<usize>,
    older: Option<usize>,
}

/// LRU map with fixed capacity
pub struct LruCache<K, V> {
    index: AHashMap<K, usize>,
    entries: Vec<Option<(K, V)>>,
    links: Vec<Links>,
    free: Vec<usize>,
    newest: Option<usize>,
    oldest: Option<usize>,
    capacity: usize,
}

impl<K, V> LruCache<K, V>
where
    K: Hash + Eq + Clone,
{
    /// Create an empty map holding at most `capacity` entries
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "LRU capacity must be greater than 0");

        Self {
            index: AHashMap::with_capacity(capacity),
            entries: Vec::with_capacity(capacity),
            links: Vec::with_capacity(capacity),
            free: Vec::new(),
            newest: None,
            oldest: None,
            capacity,
        }
    }

    /// Get a value and mark it as most recently used
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let slot = *self.index.get(key)?;
        self.promote(slot);
        self.entries[slot].as_ref().map(|(_, value)| value)
    }

    /// Get a value mutably without changing its recency
    pub fn peek_mut(&mut self, key: &K) -> Option<&mut V> {
        let slot = *self.index.get(key)?;
        self.entries[slot].as_mut().map(|(_, value)| value)
    }

    /// Whether the key is present
    pub fn contains(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    /// Insert a key-value pair as most recently used.
    ///
    /// Returns the least recently used entry if inserting a new key
    /// pushed the map over capacity.
    pub fn put(&mut self, key: K, value: V) -> Option<(K, V)> {
        if let Some(&slot) = self.index.get(&key) {
            if let Some((_, old)) = &mut self.entries[slot] {
                *old = value;
            }
            self.promote(slot);
            return None;
        }

        let evicted = if self.index.len() >= self.capacity {
            self.pop_lru()
        } else {
            None
        };

        let slot = self.claim_slot();
        self.entries[slot] = Some((key.clone(), value));
        self.push_newest(slot);
        self.index.insert(key, slot);
        evicted
    }

    /// Remove a key
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let slot = self.index.remove(key)?;
        self.release_slot(slot).map(|(_, value)| value)
    }

    /// Remove and return the least recently used entry
    pub fn pop_lru(&mut self) -> Option<(K, V)> {
        let slot = self.oldest?;
        let (key, value) = self.release_slot(slot)?;
        self.index.remove(&key);
        Some((key, value))
    }

    /// Iterate over all keys in no particular order
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.index.keys()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether the map is empty
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Maximum number of entries
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Remove all entries
    pub fn clear(&mut self) {
        self.index.clear();
        self.entries.clear();
        self.links.clear();
        self.free.clear();
        self.newest = None;
        self.oldest = None;
    }

    fn promote(&mut self, slot: usize) {
        if self.newest != Some(slot) {
            self.detach(slot);
            self.push_newest(slot);
        }
    }

    fn push_newest(&mut self, slot: usize) {
        self.links[slot] = Links {
            newer: None,
            older: self.newest,
        };
        match self.newest {
            Some(newest) => self.links[newest].newer = Some(slot),
            None => self.oldest = Some(slot),
        }
        self.newest = Some(slot);
    }

    fn detach(&mut self, slot: usize) {
        let Links { newer, older } = self.links[slot];
        match newer {
            Some(newer) => self.links[newer].older = older,
            None => self.newest = older,
        }
        match older {
            Some(older) => self.links[older].newer = newer,
            None => self.oldest = newer,
        }
        self.links[slot] = Links::default();
    }

    fn claim_slot(&mut self) -> usize {
        self.free.pop().unwrap_or_else(|| {
            self.entries.push(None);
            self.links.push(Links::default());
            self.entries.len() - 1
        })
    }

    fn release_slot(&mut self, slot: usize) -> Option<(K, V)> {
        self.detach(slot);
        self.free.push(slot);
        self.entries[slot].take()
    }
}
