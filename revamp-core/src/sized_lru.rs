use std::hash::Hash;
use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;

/// An LRU cache that tracks the cumulative byte size of its entries and
/// evicts the least-recently-used entry whenever an insert would exceed the
/// configured cap. One `Mutex` serializes every mutation, which keeps the
/// "current size == sum of entry sizes" invariant trivially true instead of
/// relying on per-shard accounting that can drift under concurrent writers.
pub struct SizedLru<K: Hash + Eq, V> {
    inner: Mutex<Inner<K, V>>,
    max_size: usize,
}

struct Inner<K: Hash + Eq, V> {
    cache: LruCache<K, (V, usize)>,
    current_size: usize,
}

impl<K: Hash + Eq + Clone, V: Clone> SizedLru<K, V> {
    pub fn new(max_size: usize) -> Self {
        SizedLru {
            inner: Mutex::new(Inner {
                cache: LruCache::new(NonZeroUsize::new(usize::MAX).unwrap()),
                current_size: 0,
            }),
            max_size,
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let mut guard = self.inner.lock();
        guard.cache.get(key).map(|(v, _)| v.clone())
    }

    /// Inserts `value` of `size` bytes, evicting oldest entries until the
    /// cap is respected. Returns the entries evicted to make room.
    pub fn insert(&self, key: K, value: V, size: usize) -> Vec<(K, V)> {
        let mut guard = self.inner.lock();
        let mut evicted = Vec::new();

        if let Some((_, old_size)) = guard.cache.pop(&key) {
            guard.current_size -= old_size;
        }

        while guard.current_size + size > self.max_size {
            match guard.cache.pop_lru() {
                Some((k, (v, s))) => {
                    guard.current_size -= s;
                    evicted.push((k, v));
                }
                None => break,
            }
        }

        guard.cache.put(key, (value, size));
        guard.current_size += size;
        evicted
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        let mut guard = self.inner.lock();
        guard.cache.pop(key).map(|(v, size)| {
            guard.current_size -= size;
            v
        })
    }

    pub fn clear(&self) {
        let mut guard = self.inner.lock();
        guard.cache.clear();
        guard.current_size = 0;
    }

    pub fn len(&self) -> usize {
        self.inner.lock().cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn current_size(&self) -> usize {
        self.inner.lock().current_size
    }
}

/// A plain bounded-count LRU set, used for the redirect-URL tracker.
pub struct BoundedLruSet<K: Hash + Eq> {
    inner: Mutex<LruCache<K, ()>>,
}

impl<K: Hash + Eq + Clone> BoundedLruSet<K> {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1).unwrap());
        BoundedLruSet { inner: Mutex::new(LruCache::new(capacity)) }
    }

    pub fn insert(&self, key: K) {
        self.inner.lock().put(key, ());
    }

    pub fn contains(&self, key: &K) -> bool {
        self.inner.lock().contains(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_lru_entry_when_cap_exceeded() {
        let cache: SizedLru<&str, &str> = SizedLru::new(10);
        assert!(cache.insert("a", "a", 4).is_empty());
        assert!(cache.insert("b", "b", 4).is_empty());
        let evicted = cache.insert("c", "c", 4);
        assert_eq!(evicted, vec![("a", "a")]);
        assert_eq!(cache.current_size(), 8);
    }

    #[test]
    fn touch_on_get_changes_eviction_order() {
        let cache: SizedLru<&str, &str> = SizedLru::new(10);
        cache.insert("a", "a", 4);
        cache.insert("b", "b", 4);
        cache.get(&"a");
        let evicted = cache.insert("c", "c", 4);
        assert_eq!(evicted, vec![("b", "b")]);
    }

    #[test]
    fn reinsert_replaces_size_accounting() {
        let cache: SizedLru<&str, &str> = SizedLru::new(10);
        cache.insert("a", "a", 4);
        cache.insert("a", "a2", 6);
        assert_eq!(cache.current_size(), 6);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn clear_resets_size_and_count() {
        let cache: SizedLru<&str, &str> = SizedLru::new(10);
        cache.insert("a", "a", 4);
        cache.clear();
        assert_eq!(cache.current_size(), 0);
        assert!(cache.is_empty());
    }

    #[test]
    fn bounded_set_evicts_by_count_not_size() {
        let set: BoundedLruSet<u32> = BoundedLruSet::new(2);
        set.insert(1);
        set.insert(2);
        set.insert(3);
        assert!(!set.contains(&1));
        assert!(set.contains(&2));
        assert!(set.contains(&3));
    }
}
