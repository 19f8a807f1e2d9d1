//! Generic bounded LRU cache (C8). Wraps the `lru` crate's map+list
//! structure rather than reimplementing it — the invariant spec.md §4.8
//! describes ("the map and list must stay in sync") is exactly what that
//! crate already upholds; reimplementing it by hand would just be a worse
//! copy of the same data structure.

use std::hash::Hash;
use std::num::NonZeroUsize;

use lru::LruCache;

pub struct LruMetadataCache<K: Hash + Eq, V> {
    inner: LruCache<K, V>,
}

impl<K: Hash + Eq, V> LruMetadataCache<K, V> {
    pub fn new(max_size: usize) -> Self {
        let cap = NonZeroUsize::new(max_size).unwrap_or_else(|| NonZeroUsize::new(1).unwrap());
        LruMetadataCache { inner: LruCache::new(cap) }
    }

    /// Inserts or refreshes `k`, evicting the least-recently-used entry if
    /// the cache is at capacity.
    pub fn put(&mut self, k: K, v: V) -> Option<V> {
        self.inner.put(k, v)
    }

    /// O(1) lookup that also promotes `k` to most-recently-used.
    pub fn get(&mut self, k: &K) -> Option<&V> {
        self.inner.get(k)
    }

    pub fn exists(&self, k: &K) -> bool {
        self.inner.contains(k)
    }

    pub fn erase(&mut self, k: &K) -> Option<V> {
        self.inner.pop(k)
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }

    pub fn size(&self) -> usize {
        self.inner.len()
    }

    pub fn max_size(&self) -> usize {
        self.inner.cap().get()
    }

    pub fn set_size(&mut self, max_size: usize) {
        let cap = NonZeroUsize::new(max_size).unwrap_or_else(|| NonZeroUsize::new(1).unwrap());
        self.inner.resize(cap);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_least_recently_used_on_overflow() {
        let mut cache: LruMetadataCache<&str, i32> = LruMetadataCache::new(2);
        cache.put("a", 1);
        cache.put("b", 2);
        cache.get(&"a"); // promote "a", leaving "b" as LRU
        cache.put("c", 3);

        assert!(cache.exists(&"a"));
        assert!(!cache.exists(&"b"));
        assert!(cache.exists(&"c"));
    }

    #[test]
    fn set_size_shrinks_and_evicts() {
        let mut cache: LruMetadataCache<&str, i32> = LruMetadataCache::new(3);
        cache.put("a", 1);
        cache.put("b", 2);
        cache.put("c", 3);
        cache.set_size(1);
        assert_eq!(cache.size(), 1);
        assert!(cache.exists(&"c"));
    }
}
