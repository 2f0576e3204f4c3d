use super::error::{CacheError, Result};
use super::layer::LayerRef;
use super::types::{CacheKey, CacheValue};
use std::sync::Arc;
use tracing::{info, warn};

/// A wired and started sequence of layers, entry point first.
///
/// The chain holds every layer strongly. Layers only point upward weakly,
/// so skims reach the layers above only while the chain is alive.
pub struct Chain<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    layers: Vec<LayerRef<K, V>>,
}

impl<K, V> Chain<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    /// Wire `layers` top to bottom and start them.
    ///
    /// Rejects empty chains, a layer listed twice, layers already wired
    /// elsewhere, and layers that cannot have a lower neighbor placed above
    /// another layer.
    pub async fn assemble(layers: Vec<LayerRef<K, V>>) -> Result<Self> {
        Self::validate(&layers)?;

        for pair in layers.windows(2) {
            let (upper, lower) = (&pair[0], &pair[1]);
            upper.attach_lower(Arc::clone(lower));
            lower.attach_upper(Arc::downgrade(upper));
        }

        // Bottom-up, so every flusher finds its lower neighbor running
        for (position, layer) in layers.iter().enumerate().rev() {
            if let Err(e) = layer.start().await {
                warn!("Starting layer '{}' failed: {}", layer.name(), e);
                Self::stop_started(&layers[position + 1..]).await;
                return Err(e);
            }
        }

        let chain = Self { layers };
        info!("Assembled chain: {}", chain.names().join(" -> "));
        Ok(chain)
    }

    /// Undo a partial start, top-down like `shutdown`
    async fn stop_started(started: &[LayerRef<K, V>]) {
        for layer in started {
            if let Err(e) = layer.stop().await {
                warn!("Stopping layer '{}' failed: {}", layer.name(), e);
            }
        }
    }

    fn validate(layers: &[LayerRef<K, V>]) -> Result<()> {
        if layers.is_empty() {
            return Err(CacheError::InvalidChain("chain has no layers".to_string()));
        }

        for (position, layer) in layers.iter().enumerate() {
            let duplicate = layers[..position]
                .iter()
                .any(|other| std::ptr::addr_eq(Arc::as_ptr(other), Arc::as_ptr(layer)));
            if duplicate {
                return Err(CacheError::InvalidChain(format!(
                    "layer '{}' appears more than once",
                    layer.name()
                )));
            }

            if layer.is_attached() {
                return Err(CacheError::InvalidChain(format!(
                    "layer '{}' is already part of a chain",
                    layer.name()
                )));
            }

            if position + 1 < layers.len() && !layer.accepts_lower() {
                return Err(CacheError::InvalidChain(format!(
                    "layer '{}' cannot have a lower layer",
                    layer.name()
                )));
            }
        }

        Ok(())
    }

    /// Entry point of the chain
    pub fn top(&self) -> &LayerRef<K, V> {
        &self.layers[0]
    }

    /// Authoritative bottom layer
    pub fn terminal(&self) -> &LayerRef<K, V> {
        &self.layers[self.layers.len() - 1]
    }

    pub fn layers(&self) -> &[LayerRef<K, V>] {
        &self.layers
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.layers.iter().map(|l| l.name().to_string()).collect()
    }

    pub async fn get(&self, key: &K) -> Result<Option<V>> {
        self.top().get(key).await
    }

    pub async fn set(&self, key: K, value: V) -> Result<()> {
        self.top().set(key, value).await
    }

    pub async fn remove(&self, key: &K) -> Result<()> {
        self.top().remove(key).await
    }

    pub async fn sync(&self) -> Result<()> {
        self.top().sync().await
    }

    /// Stop every layer top-down, so each final flush lands in a layer
    /// that is still running. Returns the first failure.
    pub async fn shutdown(&self) -> Result<()> {
        let mut first_error = None;
        for layer in &self.layers {
            if let Err(e) = layer.stop().await {
                warn!("Stopping layer '{}' failed: {}", layer.name(), e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                info!("Chain stopped");
                Ok(())
            }
        }
    }
}
