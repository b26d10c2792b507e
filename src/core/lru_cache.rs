//! Weight-budgeted LRU container shared by every cache tier
//!
//! **Why**: Video frames and audio segments differ in size by orders of
//! magnitude, so the budget counts caller-supplied weights (bytes), not items.
//!
//! Built on `lru::LruCache::unbounded()`: O(1) promotion on `get`, O(1)
//! eviction via `pop_lru()`. Eviction happens only when an insert (or a
//! smaller budget) leaves the total above `max`.
//!
//! # Policy
//!
//! - Entries never touched after insert evict in insertion order (FIFO ties).
//! - A single entry heavier than the whole budget is still admitted; it
//!   evicts everything else and stays until something replaces it.

use std::hash::Hash;

use log::trace;

struct Slot<V> {
    value: V,
    weight: usize,
}

/// Least-recently-used map with a weight budget
pub struct LruCache<K: Hash + Eq, V> {
    entries: lru::LruCache<K, Slot<V>>,
    max: usize,
    size: usize,
}

impl<K: Hash + Eq, V> std::fmt::Debug for LruCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LruCache")
            .field("len", &self.entries.len())
            .field("size", &self.size)
            .field("max", &self.max)
            .finish()
    }
}

impl<K: Hash + Eq + Clone, V> LruCache<K, V> {
    /// Create cache with a weight budget
    pub fn new(max: usize) -> Self {
        Self {
            entries: lru::LruCache::unbounded(),
            max,
            size: 0,
        }
    }

    /// Current weight budget
    pub fn max(&self) -> usize {
        self.max
    }

    /// Change budget, evicting LRU entries until the total fits.
    ///
    /// Returns evicted keys, oldest first.
    pub fn set_max(&mut self, max: usize) -> Vec<K> {
        self.max = max;
        let mut evicted = Vec::new();
        while self.size > self.max {
            match self.pop_lru() {
                Some(key) => evicted.push(key),
                None => break,
            }
        }
        evicted
    }

    /// Insert or replace `key`, then evict LRU entries (never `key` itself)
    /// until the total fits the budget.
    ///
    /// Returns evicted keys, oldest first.
    pub fn add(&mut self, key: K, value: V, weight: usize) -> Vec<K> {
        if let Some(old) = self.entries.put(key, Slot { value, weight }) {
            self.size = self.size.saturating_sub(old.weight);
        }
        self.size += weight;

        // Just-inserted key is MRU, so it only goes last
        let mut evicted = Vec::new();
        while self.size > self.max && self.entries.len() > 1 {
            match self.pop_lru() {
                Some(k) => evicted.push(k),
                None => break,
            }
        }

        if self.size > self.max {
            trace!(
                "LruCache: oversized entry admitted ({} > budget {})",
                self.size, self.max
            );
        }
        evicted
    }

    /// Lookup and promote to most-recently-used
    pub fn get(&mut self, key: &K) -> Option<&V> {
        self.entries.get(key).map(|slot| &slot.value)
    }

    /// Lookup without touching recency
    pub fn peek(&self, key: &K) -> Option<&V> {
        self.entries.peek(key).map(|slot| &slot.value)
    }

    /// Presence check without touching recency
    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains(key)
    }

    /// Weight recorded for `key`
    pub fn weight_of(&self, key: &K) -> Option<usize> {
        self.entries.peek(key).map(|slot| slot.weight)
    }

    /// Remove regardless of LRU order
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let slot = self.entries.pop(key)?;
        self.size = self.size.saturating_sub(slot.weight);
        Some(slot.value)
    }

    /// Remove every entry whose key matches `pred`. Returns removed keys.
    pub fn remove_where(&mut self, mut pred: impl FnMut(&K) -> bool) -> Vec<K> {
        let doomed: Vec<K> = self
            .entries
            .iter()
            .filter(|(k, _)| pred(k))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &doomed {
            self.remove(key);
        }
        doomed
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.size = 0;
    }

    /// Keys, most recently used first
    pub fn keys(&self) -> Vec<K> {
        self.entries.iter().map(|(k, _)| k.clone()).collect()
    }

    /// Values, most recently used first
    pub fn values(&self) -> Vec<V>
    where
        V: Clone,
    {
        self.entries.iter().map(|(_, slot)| slot.value.clone()).collect()
    }

    /// Total accounted weight
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Accounted weight as a percentage of the budget (0 when budget is 0)
    pub fn percentage(&self) -> f64 {
        if self.max == 0 {
            0.0
        } else {
            self.size as f64 / self.max as f64 * 100.0
        }
    }

    fn pop_lru(&mut self) -> Option<K> {
        let (key, slot) = self.entries.pop_lru()?;
        self.size = self.size.saturating_sub(slot.weight);
        Some(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_evicts_oldest() {
        let mut cache = LruCache::new(10);
        assert!(cache.add("A", 1, 4).is_empty());
        assert!(cache.add("B", 2, 4).is_empty());
        let evicted = cache.add("C", 3, 4);

        assert_eq!(evicted, vec!["A"]);
        assert!(!cache.contains(&"A"));
        assert!(cache.contains(&"B"));
        assert!(cache.contains(&"C"));
        assert_eq!(cache.size(), 8);
    }

    #[test]
    fn test_get_promotes() {
        let mut cache = LruCache::new(10);
        cache.add("A", 1, 4);
        cache.add("B", 2, 4);
        assert_eq!(cache.get(&"A"), Some(&1));

        let evicted = cache.add("C", 3, 4);
        assert_eq!(evicted, vec!["B"]);
        assert!(cache.contains(&"A"));
    }

    #[test]
    fn test_contains_and_peek_do_not_promote() {
        let mut cache = LruCache::new(10);
        cache.add("A", 1, 4);
        cache.add("B", 2, 4);
        assert!(cache.contains(&"A"));
        assert_eq!(cache.peek(&"A"), Some(&1));

        let evicted = cache.add("C", 3, 4);
        assert_eq!(evicted, vec!["A"]);
    }

    #[test]
    fn test_fifo_ties() {
        let mut cache = LruCache::new(100);
        for i in 0..10 {
            cache.add(i, i, 10);
        }
        let evicted = cache.set_max(50);
        assert_eq!(evicted, vec![0, 1, 2, 3, 4]);
        assert_eq!(cache.size(), 50);
    }

    #[test]
    fn test_oversized_singleton_admitted() {
        let mut cache = LruCache::new(10);
        cache.add("A", 1, 3);
        cache.add("B", 2, 3);
        let evicted = cache.add("BIG", 3, 25);

        assert_eq!(evicted, vec!["A", "B"]);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.size(), 25);
        assert!(cache.percentage() > 100.0);

        // Next normal insert pushes the oversized entry out
        let evicted = cache.add("C", 4, 2);
        assert_eq!(evicted, vec!["BIG"]);
        assert_eq!(cache.size(), 2);
    }

    #[test]
    fn test_replace_updates_weight() {
        let mut cache = LruCache::new(10);
        cache.add("A", 1, 6);
        cache.add("A", 2, 3);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.size(), 3);
        assert_eq!(cache.peek(&"A"), Some(&2));
        assert_eq!(cache.weight_of(&"A"), Some(3));
    }

    #[test]
    fn test_remove_and_clear() {
        let mut cache = LruCache::new(10);
        cache.add(1, "a", 2);
        cache.add(2, "b", 2);
        cache.add(3, "c", 2);

        assert_eq!(cache.remove(&2), Some("b"));
        assert_eq!(cache.remove(&2), None);
        assert_eq!(cache.size(), 4);

        let mut removed = cache.remove_where(|k| *k > 1);
        removed.sort();
        assert_eq!(removed, vec![3]);
        assert_eq!(cache.size(), 2);

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn test_introspection() {
        let mut cache = LruCache::new(40);
        cache.add(1, 'a', 10);
        cache.add(2, 'b', 10);
        cache.get(&1);

        assert_eq!(cache.keys(), vec![1, 2]);
        assert_eq!(cache.values(), vec!['a', 'b']);
        assert_eq!(cache.percentage(), 50.0);

        let empty: LruCache<i32, i32> = LruCache::new(0);
        assert_eq!(empty.percentage(), 0.0);
    }

    #[test]
    fn test_weight_never_exceeds_budget() {
        // Pseudo-random add/get/remove mix; weights stay under budget
        let mut cache = LruCache::new(100);
        let mut seed: u64 = 0x2545_F491_4F6C_DD1D;
        for _ in 0..2000 {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            let key = (seed % 37) as u32;
            let weight = (seed >> 8) as usize % 30 + 1;
            match seed % 3 {
                0 => {
                    cache.add(key, key, weight);
                }
                1 => {
                    cache.get(&key);
                }
                _ => {
                    cache.remove(&key);
                }
            }
            assert!(cache.size() <= cache.max());
        }
    }

    #[test]
    fn test_round_trip_before_eviction() {
        let mut cache = LruCache::new(1000);
        for i in 0..50u32 {
            cache.add(i, i * 7, 10);
        }
        for i in 0..50u32 {
            assert_eq!(cache.get(&i), Some(&(i * 7)));
        }
    }
}
