//! Backend Storage Module
//!
//! Local associative stores a layer keeps its entries in:
//! - Memory: unbounded map
//! - LRU: bounded, evicts least recently used entries on overflow
//! - Disk: append-only data file with a persisted index
//!
//! `add` never fails. A bounded store makes room by evicting, and the disk
//! store logs I/O failures instead of reporting them.

pub mod disk;
pub mod lru;
pub mod memory;

pub use disk::{DiskStorage, DiskStorageConfig, DiskStorageStats};
pub use lru::{LruStats, LruStorage};
pub use memory::MemoryStorage;

/// Contract of the store behind a layer
pub trait BackendStorage<K, V>: Send + Sync {
    fn get(&self, key: &K) -> Option<V>;

    fn add(&self, key: K, value: V);

    fn remove(&self, key: &K);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
