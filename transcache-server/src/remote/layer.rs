use super::protocol::{Message, decode, encode};
use super::transmitter::Transmitter;
use crate::core::error::Result;
use crate::core::layer::{Layer, LayerRef, Links};
use crate::core::types::{CacheKey, CacheValue, LayerStats, LayerStatsSnapshot, Operation};
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

/// Layer whose storage lives in another process.
///
/// Every operation is forwarded through a `Transmitter`; the remote side owns
/// whatever chain sits beneath it, so this layer never has a lower neighbor.
pub struct RemoteLayer<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    name: String,
    transmitter: Arc<dyn Transmitter>,
    links: Links<K, V>,
    stats: LayerStats,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V> RemoteLayer<K, V>
where
    K: CacheKey + Serialize + DeserializeOwned,
    V: CacheValue + Serialize + DeserializeOwned,
{
    pub fn new(name: impl Into<String>, transmitter: Arc<dyn Transmitter>) -> Self {
        Self {
            name: name.into(),
            transmitter,
            links: Links::new(),
            stats: LayerStats::default(),
            _marker: PhantomData,
        }
    }

    pub fn stats(&self) -> LayerStatsSnapshot {
        self.stats.snapshot()
    }

    async fn send(&self, message: Message) -> Result<Option<Vec<u8>>> {
        self.transmitter.request(message).await?.into_result()
    }

    async fn forward(&self, key: &K, operation: &Operation<V>) -> Result<()> {
        let key = encode(key)?;
        let message = match operation {
            Operation::Set(value) => Message::set(key, encode(value)?),
            Operation::Remove => Message::remove(key),
        };
        self.send(message).await.map(|_| ())
    }

    async fn skim_upper(&self, key: &K) -> Result<()> {
        match self.links.upper() {
            Some(upper) => upper.skim(key).await,
            None => Ok(()),
        }
    }
}

#[async_trait]
impl<K, V> Layer<K, V> for RemoteLayer<K, V>
where
    K: CacheKey + Serialize + DeserializeOwned,
    V: CacheValue + Serialize + DeserializeOwned,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &K) -> Result<Option<V>> {
        let reply = self.send(Message::get(encode(key)?)).await?;
        match reply {
            Some(bytes) => {
                self.stats.record_hit();
                debug!("GET layer={} key={:?} HIT (remote)", self.name, key);
                decode(&bytes).map(Some)
            }
            None => {
                self.stats.record_miss();
                debug!("GET layer={} key={:?} MISS (remote)", self.name, key);
                Ok(None)
            }
        }
    }

    async fn set(&self, key: K, value: V) -> Result<()> {
        self.stats.record_set();
        self.skim_upper(&key).await?;
        self.forward(&key, &Operation::Set(value)).await
    }

    async fn remove(&self, key: &K) -> Result<()> {
        self.stats.record_remove();
        self.skim_upper(key).await?;
        self.forward(key, &Operation::Remove).await
    }

    async fn sync(&self) -> Result<()> {
        self.stats.record_sync();
        self.send(Message::sync()).await.map(|_| ())
    }

    /// Nothing is held here; only the layers above need evicting
    async fn skim(&self, key: &K) -> Result<()> {
        self.stats.record_skim();
        self.skim_upper(key).await
    }

    async fn write_back(&self, key: K, operation: Operation<V>) -> Result<()> {
        self.forward(&key, &operation).await
    }

    fn attach_upper(&self, upper: Weak<dyn Layer<K, V>>) {
        self.links.set_upper(upper);
    }

    fn attach_lower(&self, _lower: LayerRef<K, V>) {
        warn!(
            "Layer '{}' is remote and cannot have a lower layer; ignoring",
            self.name
        );
    }

    fn is_attached(&self) -> bool {
        self.links.is_attached()
    }

    fn accepts_lower(&self) -> bool {
        false
    }

    async fn start(&self) -> Result<()> {
        self.transmitter.start().await
    }

    async fn stop(&self) -> Result<()> {
        self.transmitter.stop().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::CacheError;
    use crate::remote::protocol::{MessageType, Response};
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// In-process transmitter backed by a map
    #[derive(Default)]
    struct MapTransmitter {
        entries: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
        requests: Mutex<Vec<MessageType>>,
        fail: bool,
    }

    #[async_trait]
    impl Transmitter for MapTransmitter {
        async fn request(&self, message: Message) -> Result<Response> {
            self.requests.lock().push(message.message_type);
            if self.fail {
                return Ok(Response::error("backend unavailable"));
            }

            let mut entries = self.entries.lock();
            let response = match message.message_type {
                MessageType::Get => Response::success(entries.get(&message.key).cloned()),
                MessageType::Set => {
                    entries.insert(message.key, message.value);
                    Response::success(None)
                }
                MessageType::Remove => {
                    entries.remove(&message.key);
                    Response::success(None)
                }
                MessageType::Sync => Response::success(None),
            };
            Ok(response)
        }

        async fn start(&self) -> Result<()> {
            Ok(())
        }

        async fn stop(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_remote_layer_round_trip() {
        let transmitter = Arc::new(MapTransmitter::default());
        let layer: RemoteLayer<String, u64> = RemoteLayer::new("remote", transmitter.clone());

        layer.set("a".to_string(), 11).await.unwrap();
        assert_eq!(layer.get(&"a".to_string()).await.unwrap(), Some(11));

        layer.remove(&"a".to_string()).await.unwrap();
        assert_eq!(layer.get(&"a".to_string()).await.unwrap(), None);

        layer.sync().await.unwrap();
        assert_eq!(
            *transmitter.requests.lock(),
            vec![
                MessageType::Set,
                MessageType::Get,
                MessageType::Remove,
                MessageType::Get,
                MessageType::Sync
            ]
        );
        assert_eq!(layer.stats().misses, 1);
    }

    #[tokio::test]
    async fn test_remote_error_surfaces() {
        let transmitter = Arc::new(MapTransmitter {
            fail: true,
            ..Default::default()
        });
        let layer: RemoteLayer<String, u64> = RemoteLayer::new("remote", transmitter);

        let result = layer.get(&"a".to_string()).await;
        assert!(matches!(result, Err(CacheError::Remote(_))));
    }

    #[tokio::test]
    async fn test_remote_skim_sends_nothing() {
        let transmitter = Arc::new(MapTransmitter::default());
        let layer: RemoteLayer<String, u64> = RemoteLayer::new("remote", transmitter.clone());

        layer.skim(&"a".to_string()).await.unwrap();
        assert!(transmitter.requests.lock().is_empty());
        assert!(!layer.accepts_lower());
    }
}
