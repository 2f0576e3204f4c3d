use super::BackendStorage;
use crate::core::CacheKey;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Unbounded in-memory store
#[derive(Debug)]
pub struct MemoryStorage<K, V> {
    data: RwLock<HashMap<K, V>>,
}

impl<K: CacheKey, V> Default for MemoryStorage<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: CacheKey, V> MemoryStorage<K, V> {
    pub fn new() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
        }
    }

    /// Whether the key is present, without cloning its value
    pub fn contains(&self, key: &K) -> bool {
        self.data.read().contains_key(key)
    }
}

impl<K, V> BackendStorage<K, V> for MemoryStorage<K, V>
where
    K: CacheKey,
    V: Clone + Send + Sync,
{
    fn get(&self, key: &K) -> Option<V> {
        self.data.read().get(key).cloned()
    }

    fn add(&self, key: K, value: V) {
        self.data.write().insert(key, value);
    }

    fn remove(&self, key: &K) {
        self.data.write().remove(key);
    }

    fn len(&self) -> usize {
        self.data.read().len()
    }
}
