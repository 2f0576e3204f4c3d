use super::error::Result;
use super::layer::{Layer, LayerRef, Links};
use super::types::{CacheKey, CacheValue, LayerStats, LayerStatsSnapshot, Operation};
use crate::storage::BackendStorage;
use async_trait::async_trait;
use std::sync::{Arc, Weak};
use tracing::debug;

/// Pass-through layer writing synchronously to its lower neighbor.
///
/// No queue and no background task: a write returns once every layer below
/// has applied it. Reads backfill locally only.
pub struct WriteThrough<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    name: String,
    storage: Arc<dyn BackendStorage<K, V>>,
    links: Links<K, V>,
    stats: LayerStats,
}

impl<K, V> WriteThrough<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    pub fn new(name: impl Into<String>, storage: Arc<dyn BackendStorage<K, V>>) -> Self {
        Self {
            name: name.into(),
            storage,
            links: Links::new(),
            stats: LayerStats::default(),
        }
    }

    pub fn stats(&self) -> LayerStatsSnapshot {
        self.stats.snapshot()
    }

    async fn propagate(&self, key: K, operation: Operation<V>) -> Result<()> {
        match &operation {
            Operation::Set(value) => self.storage.add(key.clone(), value.clone()),
            Operation::Remove => self.storage.remove(&key),
        }

        match self.links.lower() {
            Some(lower) => lower.write_back(key, operation).await,
            None => Ok(()),
        }
    }

    async fn skim_upper(&self, key: &K) -> Result<()> {
        match self.links.upper() {
            Some(upper) => upper.skim(key).await,
            None => Ok(()),
        }
    }
}

#[async_trait]
impl<K, V> Layer<K, V> for WriteThrough<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &K) -> Result<Option<V>> {
        if let Some(value) = self.storage.get(key) {
            self.stats.record_hit();
            return Ok(Some(value));
        }
        self.stats.record_miss();

        let Some(lower) = self.links.lower() else {
            return Ok(None);
        };

        let value = lower.get(key).await?;
        if let Some(value) = &value {
            self.storage.add(key.clone(), value.clone());
        }
        Ok(value)
    }

    async fn set(&self, key: K, value: V) -> Result<()> {
        debug!("SET layer={} key={:?} (write-through)", self.name, key);
        self.stats.record_set();
        self.skim_upper(&key).await?;
        self.propagate(key, Operation::Set(value)).await
    }

    async fn remove(&self, key: &K) -> Result<()> {
        debug!("REMOVE layer={} key={:?} (write-through)", self.name, key);
        self.stats.record_remove();
        self.skim_upper(key).await?;
        self.propagate(key.clone(), Operation::Remove).await
    }

    async fn sync(&self) -> Result<()> {
        self.stats.record_sync();
        match self.links.lower() {
            Some(lower) => lower.sync().await,
            None => Ok(()),
        }
    }

    async fn skim(&self, key: &K) -> Result<()> {
        self.stats.record_skim();
        self.storage.remove(key);
        self.skim_upper(key).await
    }

    async fn write_back(&self, key: K, operation: Operation<V>) -> Result<()> {
        self.propagate(key, operation).await
    }

    fn attach_upper(&self, upper: Weak<dyn Layer<K, V>>) {
        self.links.set_upper(upper);
    }

    fn attach_lower(&self, lower: LayerRef<K, V>) {
        self.links.set_lower(lower);
    }

    fn is_attached(&self) -> bool {
        self.links.is_attached()
    }
}
