use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

/// Bound for anything usable as a cache key
pub trait CacheKey: Hash + Eq + Clone + Debug + Send + Sync + 'static {}

impl<T> CacheKey for T where T: Hash + Eq + Clone + Debug + Send + Sync + 'static {}

/// Bound for anything usable as a cached value
pub trait CacheValue: Clone + Send + Sync + 'static {}

impl<T> CacheValue for T where T: Clone + Send + Sync + 'static {}

/// Pending mutation destined for the lower layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation<V> {
    Set(V),
    Remove,
}

/// Queue item handed from callers to the flusher
#[derive(Debug)]
pub struct Pending<K, V> {
    pub key: K,
    pub operation: Operation<V>,
}

/// Configuration for a buffered cache layer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CacheConfig {
    /// Capacity of the pending queue between callers and the flusher
    pub queue_capacity: usize,
    /// Distinct pending keys tolerated before an immediate flush
    pub buffer_limit: usize,
    /// Silence after which buffered operations are flushed anyway
    pub flush_interval_ms: u64,
}

impl CacheConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            buffer_limit: 5,
            flush_interval_ms: 1000,
        }
    }
}

/// Lifecycle of a layer's flusher task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum FlusherState {
    /// Constructed, not started yet
    Idle = 0,
    Running = 1,
    DrainingForSync = 2,
    Stopped = 3,
}

impl FlusherState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Running,
            2 => Self::DrainingForSync,
            3 => Self::Stopped,
            _ => Self::Idle,
        }
    }
}

/// Flusher state shared between a cache and its flusher task
#[derive(Debug, Default)]
pub struct SharedState(AtomicU8);

impl SharedState {
    pub fn load(&self) -> FlusherState {
        FlusherState::from_u8(self.0.load(Ordering::SeqCst))
    }

    pub fn store(&self, state: FlusherState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }
}

/// Per-layer counters, updated lock-free
#[derive(Debug, Default)]
pub struct LayerStats {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    removes: AtomicU64,
    skims: AtomicU64,
    flushes: AtomicU64,
    flushed_operations: AtomicU64,
    flush_failures: AtomicU64,
    syncs: AtomicU64,
}

/// Point-in-time copy of [`LayerStats`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub removes: u64,
    pub skims: u64,
    pub flushes: u64,
    pub flushed_operations: u64,
    pub flush_failures: u64,
    pub syncs: u64,
}

impl LayerStats {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_set(&self) {
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_remove(&self) {
        self.removes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skim(&self) {
        self.skims.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flush(&self, applied: usize, failed: usize) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
        self.flushed_operations
            .fetch_add(applied as u64, Ordering::Relaxed);
        self.flush_failures
            .fetch_add(failed as u64, Ordering::Relaxed);
    }

    pub fn record_sync(&self) {
        self.syncs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> LayerStatsSnapshot {
        LayerStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            removes: self.removes.load(Ordering::Relaxed),
            skims: self.skims.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            flushed_operations: self.flushed_operations.load(Ordering::Relaxed),
            flush_failures: self.flush_failures.load(Ordering::Relaxed),
            syncs: self.syncs.load(Ordering::Relaxed),
        }
    }
}
