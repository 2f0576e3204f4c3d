use super::error::Result;
use super::types::{CacheKey, CacheValue, Operation};
use async_trait::async_trait;
use std::sync::{Arc, Weak};

/// Shared handle to any layer of a chain
pub type LayerRef<K, V> = Arc<dyn Layer<K, V>>;

/// One node of a cache chain.
///
/// Every implementation honors the same external semantics so that a caller
/// can operate on any layer of a chain without knowing what lies beneath it:
/// - `get` serves locally or falls through to the lower neighbor
/// - `set`/`remove` commit locally and propagate downward
/// - `skim` evicts a stale copy here and in every layer above
/// - `sync` returns once everything written before the call reached the
///   terminal layer
///
/// Upper neighbors are held weakly, lower neighbors strongly, so a wired
/// chain is owned from the top down.
#[async_trait]
pub trait Layer<K, V>: Send + Sync
where
    K: CacheKey,
    V: CacheValue,
{
    /// Human-readable layer name used in logs
    fn name(&self) -> &str;

    async fn get(&self, key: &K) -> Result<Option<V>>;

    async fn set(&self, key: K, value: V) -> Result<()>;

    async fn remove(&self, key: &K) -> Result<()>;

    async fn sync(&self) -> Result<()>;

    async fn skim(&self, key: &K) -> Result<()>;

    /// Receive a buffered operation flushed by the upper neighbor.
    ///
    /// The upper chain was skimmed when the write first happened, so layers
    /// override this to commit without skimming again.
    async fn write_back(&self, key: K, operation: Operation<V>) -> Result<()> {
        match operation {
            Operation::Set(value) => self.set(key, value).await,
            Operation::Remove => self.remove(&key).await,
        }
    }

    /// Link the upper neighbor. The link is weak: the caller keeps the
    /// upper layer alive, and skims stop at a neighbor that was dropped.
    fn attach_upper(&self, upper: Weak<dyn Layer<K, V>>);

    fn attach_lower(&self, lower: LayerRef<K, V>);

    /// Whether this layer is already linked to a neighbor
    fn is_attached(&self) -> bool;

    /// Whether this layer may have a lower neighbor at all
    fn accepts_lower(&self) -> bool {
        true
    }

    /// Start background work; called once the chain is wired
    async fn start(&self) -> Result<()> {
        Ok(())
    }

    /// Drain and stop background work
    async fn stop(&self) -> Result<()> {
        Ok(())
    }
}

/// Neighbor links of a layer
pub(crate) struct Links<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    upper: parking_lot::RwLock<Option<Weak<dyn Layer<K, V>>>>,
    lower: parking_lot::RwLock<Option<LayerRef<K, V>>>,
}

impl<K, V> Links<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    pub(crate) fn new() -> Self {
        Self {
            upper: parking_lot::RwLock::new(None),
            lower: parking_lot::RwLock::new(None),
        }
    }

    /// Upper neighbor, if one is attached and still alive
    pub(crate) fn upper(&self) -> Option<LayerRef<K, V>> {
        self.upper.read().as_ref().and_then(Weak::upgrade)
    }

    pub(crate) fn lower(&self) -> Option<LayerRef<K, V>> {
        self.lower.read().clone()
    }

    pub(crate) fn is_terminal(&self) -> bool {
        self.lower.read().is_none()
    }

    pub(crate) fn set_upper(&self, upper: Weak<dyn Layer<K, V>>) {
        *self.upper.write() = Some(upper);
    }

    pub(crate) fn set_lower(&self, lower: LayerRef<K, V>) {
        *self.lower.write() = Some(lower);
    }

    pub(crate) fn is_attached(&self) -> bool {
        self.upper.read().is_some() || self.lower.read().is_some()
    }
}
