use super::BackendStorage;
use crate::core::CacheKey;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Bounded in-memory store evicting the least recently used entry
pub struct LruStorage<K, V> {
    inner: RwLock<LruInner<K, V>>,
    stats: RwLock<LruStats>,
}

struct LruInner<K, V> {
    /// Cached data with the tick of its last access
    data: HashMap<K, (V, u64)>,

    /// Access order (smallest tick is the least recent)
    lru_order: BTreeMap<u64, K>,

    /// Monotonic access counter
    tick: u64,

    /// Maximum number of entries
    max_size: usize,
}

/// LRU statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LruStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
}

impl<K: CacheKey, V> LruInner<K, V> {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    /// Move an existing key to the most recent position
    fn touch(&mut self, key: &K) {
        let tick = self.next_tick();
        if let Some((_, last)) = self.data.get_mut(key) {
            let previous = std::mem::replace(last, tick);
            self.lru_order.remove(&previous);
            self.lru_order.insert(tick, key.clone());
        }
    }
}

impl<K: CacheKey, V> LruStorage<K, V> {
    /// Create a store holding at most `max_size` entries
    pub fn new(max_size: usize) -> Self {
        Self {
            inner: RwLock::new(LruInner {
                data: HashMap::new(),
                lru_order: BTreeMap::new(),
                tick: 0,
                max_size: max_size.max(1),
            }),
            stats: RwLock::new(LruStats::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.read().max_size
    }

    pub fn stats(&self) -> LruStats {
        self.stats.read().clone()
    }
}

impl<K, V> BackendStorage<K, V> for LruStorage<K, V>
where
    K: CacheKey,
    V: Clone + Send + Sync,
{
    fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.write();
        let mut stats = self.stats.write();

        let value = inner.data.get(key).map(|(value, _)| value.clone());
        match value {
            Some(value) => {
                inner.touch(key);
                stats.hits += 1;
                Some(value)
            }
            None => {
                stats.misses += 1;
                None
            }
        }
    }

    fn add(&self, key: K, value: V) {
        let mut inner = self.inner.write();
        let mut stats = self.stats.write();

        if let Some((_, last)) = inner.data.remove(&key) {
            inner.lru_order.remove(&last);
        }

        // Evict if at capacity
        while inner.data.len() >= inner.max_size {
            let Some((_, evict_key)) = inner.lru_order.pop_first() else {
                break;
            };
            if inner.data.remove(&evict_key).is_some() {
                stats.evictions += 1;
                debug!("LRU EVICT: {:?}", evict_key);
            }
        }

        let tick = inner.next_tick();
        inner.lru_order.insert(tick, key.clone());
        inner.data.insert(key, (value, tick));
        stats.entries = inner.data.len();
    }

    fn remove(&self, key: &K) {
        let mut inner = self.inner.write();
        if let Some((_, last)) = inner.data.remove(key) {
            inner.lru_order.remove(&last);
            self.stats.write().entries = inner.data.len();
        }
    }

    fn len(&self) -> usize {
        self.inner.read().data.len()
    }
}
