//! LRU cache for open epoch handles
//!
//! A capacity-bounded mapping from epoch start timestamps to opened epoch
//! handles. When an insert would exceed capacity the least recently used
//! entry is removed and handed to the eviction callback, which the
//! database uses to close the evicted epoch.
//!
//! All operations are serialized on an internal mutex. The eviction
//! callback is always invoked after the mutex is released, so it is free
//! to block on I/O without holding up other cache users.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

/// Callback invoked with every evicted entry.
pub type EvictFn<V> = Box<dyn Fn(i64, V) + Send + Sync>;

struct Inner<V> {
    capacity: usize,
    entries: HashMap<i64, V>,
    /// Recency order: front is least recently used, back is most recent.
    order: VecDeque<i64>,
}

impl<V> Inner<V> {
    fn touch(&mut self, key: i64) {
        if let Some(idx) = self.order.iter().position(|&k| k == key) {
            self.order.remove(idx);
        }
        self.order.push_back(key);
    }

    fn detach(&mut self, key: i64) {
        if let Some(idx) = self.order.iter().position(|&k| k == key) {
            self.order.remove(idx);
        }
    }

    /// Removes LRU entries until the capacity invariant holds.
    fn take_excess(&mut self) -> Vec<(i64, V)> {
        let mut evicted = Vec::new();
        while self.entries.len() > self.capacity {
            let Some(key) = self.order.pop_front() else {
                break;
            };
            if let Some(value) = self.entries.remove(&key) {
                evicted.push((key, value));
            }
        }
        evicted
    }
}

/// Capacity-bounded LRU map from epoch timestamps to handles.
pub struct Cache<V> {
    inner: Mutex<Inner<V>>,
    on_evict: EvictFn<V>,
}

impl<V: Clone> Cache<V> {
    /// Creates a cache holding at most `capacity` entries.
    pub fn new(capacity: usize, on_evict: EvictFn<V>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                capacity,
                entries: HashMap::new(),
                order: VecDeque::new(),
            }),
            on_evict,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<V>> {
        // a poisoned cache mutex only means a panic mid-operation; the
        // map itself is still structurally sound
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns the handle for `key` and marks it most recently used.
    pub fn get(&self, key: i64) -> Option<V> {
        let mut inner = self.lock();
        if !inner.entries.contains_key(&key) {
            return None;
        }
        inner.touch(key);
        inner.entries.get(&key).cloned()
    }

    /// Inserts an entry, evicting the least recently used one if the
    /// capacity would be exceeded. The eviction callback runs before this
    /// call returns.
    pub fn add(&self, key: i64, value: V) {
        let evicted = {
            let mut inner = self.lock();
            inner.entries.insert(key, value);
            inner.touch(key);
            inner.take_excess()
        };

        for (k, v) in evicted {
            (self.on_evict)(k, v);
        }
    }

    /// Removes and returns the entry without invoking the eviction
    /// callback. Used by retention, which closes the handle itself.
    pub fn del(&self, key: i64) -> Option<V> {
        let mut inner = self.lock();
        inner.detach(key);
        inner.entries.remove(&key)
    }

    /// Changes the capacity, evicting LRU entries until the invariant
    /// holds. Does not promote any entry.
    pub fn resize(&self, capacity: usize) {
        let evicted = {
            let mut inner = self.lock();
            inner.capacity = capacity;
            inner.take_excess()
        };

        for (k, v) in evicted {
            (self.on_evict)(k, v);
        }
    }

    /// Evicts every entry through the callback, emptying the cache.
    pub fn purge(&self) {
        let evicted: Vec<(i64, V)> = {
            let mut inner = self.lock();
            let keys: Vec<i64> = inner.order.drain(..).collect();
            keys.into_iter()
                .filter_map(|k| inner.entries.remove(&k).map(|v| (k, v)))
                .collect()
        };

        for (k, v) in evicted {
            (self.on_evict)(k, v);
        }
    }

    /// True if `key` is resident. Does not promote the entry.
    pub fn contains(&self, key: i64) -> bool {
        self.lock().entries.contains_key(&key)
    }

    /// Number of resident entries.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// True if no entries are resident.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of resident entries. Does not promote any entry.
    pub fn entries(&self) -> Vec<(i64, V)> {
        let inner = self.lock();
        inner
            .order
            .iter()
            .filter_map(|&k| inner.entries.get(&k).map(|v| (k, v.clone())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_cache(capacity: usize) -> (Cache<i32>, Arc<Mutex<Vec<(i64, i32)>>>) {
        let evicted = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&evicted);
        let cache = Cache::new(
            capacity,
            Box::new(move |k, v| {
                sink.lock().unwrap().push((k, v));
            }),
        );
        (cache, evicted)
    }

    #[test]
    fn test_get_and_add() {
        let (cache, _) = counting_cache(2);

        cache.add(1, 10);
        cache.add(2, 20);

        assert_eq!(cache.get(1), Some(10));
        assert_eq!(cache.get(2), Some(20));
        assert_eq!(cache.get(3), None);
    }

    #[test]
    fn test_add_evicts_lru() {
        let (cache, evicted) = counting_cache(2);

        cache.add(1, 10);
        cache.add(2, 20);
        cache.add(3, 30);

        assert_eq!(cache.get(1), None);
        assert_eq!(cache.get(2), Some(20));
        assert_eq!(cache.get(3), Some(30));
        assert_eq!(*evicted.lock().unwrap(), vec![(1, 10)]);
    }

    #[test]
    fn test_get_promotes() {
        let (cache, evicted) = counting_cache(2);

        cache.add(1, 10);
        cache.add(2, 20);
        // touch 1 so that 2 becomes the LRU entry
        assert_eq!(cache.get(1), Some(10));
        cache.add(3, 30);

        assert_eq!(cache.get(1), Some(10));
        assert_eq!(cache.get(2), None);
        assert_eq!(*evicted.lock().unwrap(), vec![(2, 20)]);
    }

    #[test]
    fn test_del_skips_callback() {
        let (cache, evicted) = counting_cache(2);

        cache.add(1, 10);
        assert_eq!(cache.del(1), Some(10));
        assert_eq!(cache.del(1), None);
        assert!(evicted.lock().unwrap().is_empty());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_resize_evicts_down_to_capacity() {
        let (cache, evicted) = counting_cache(4);

        for i in 0..4 {
            cache.add(i, i as i32);
        }
        cache.resize(2);

        assert_eq!(cache.len(), 2);
        assert_eq!(*evicted.lock().unwrap(), vec![(0, 0), (1, 1)]);
        assert_eq!(cache.get(2), Some(2));
        assert_eq!(cache.get(3), Some(3));
    }

    #[test]
    fn test_purge_evicts_everything() {
        let (cache, evicted) = counting_cache(3);

        for i in 0..3 {
            cache.add(i, i as i32);
        }
        cache.purge();

        assert!(cache.is_empty());
        assert_eq!(evicted.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_residency_matches_last_distinct_keys() {
        // property: after an access sequence, the resident key set equals
        // the last `capacity` distinct keys, and every evicted key was
        // reported exactly once
        let capacity = 3;
        let evictions = Arc::new(AtomicUsize::new(0));
        let count = Arc::clone(&evictions);
        let cache: Cache<i64> = Cache::new(
            capacity,
            Box::new(move |_, _| {
                count.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let sequence: Vec<i64> = vec![1, 2, 3, 1, 4, 5, 2, 6, 3, 3, 7];
        for &key in &sequence {
            if cache.get(key).is_none() {
                cache.add(key, key);
            }
        }

        let mut expected = Vec::new();
        for &key in sequence.iter().rev() {
            if !expected.contains(&key) {
                expected.push(key);
            }
            if expected.len() == capacity {
                break;
            }
        }

        for key in &expected {
            assert!(cache.contains(*key), "expected {} resident", key);
        }
        assert_eq!(cache.len(), capacity);

        let distinct: std::collections::HashSet<i64> = sequence.iter().copied().collect();
        assert_eq!(
            evictions.load(Ordering::SeqCst),
            distinct.len() - capacity,
            "one eviction per key that fell out"
        );
    }

    #[test]
    fn test_entries_snapshot() {
        let (cache, _) = counting_cache(3);

        cache.add(1, 10);
        cache.add(2, 20);

        let mut entries = cache.entries();
        entries.sort();
        assert_eq!(entries, vec![(1, 10), (2, 20)]);
    }
}
