use super::protocol::{Message, MessageType, Response, decode, encode, read_frame, write_frame};
use crate::core::error::Result;
use crate::core::layer::LayerRef;
use crate::core::types::{CacheKey, CacheValue};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

/// Serves one layer to `RemoteLayer` clients over TCP.
///
/// Each connection gets its own task handling requests in order.
pub struct LayerServer<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    layer: LayerRef<K, V>,
}

impl<K, V> LayerServer<K, V>
where
    K: CacheKey + Serialize + DeserializeOwned,
    V: CacheValue + Serialize + DeserializeOwned,
{
    pub fn new(layer: LayerRef<K, V>) -> Self {
        Self { layer }
    }

    /// Accept connections until the listener fails
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        self.serve_with_shutdown(listener, std::future::pending())
            .await
    }

    /// Accept connections until `shutdown` completes
    pub async fn serve_with_shutdown<F>(
        self: Arc<Self>,
        listener: TcpListener,
        shutdown: F,
    ) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        info!(
            "Serving layer '{}' on {}",
            self.layer.name(),
            listener.local_addr()?
        );
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Layer server shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        debug!("New connection from {}", addr);
                        tokio::spawn(Arc::clone(&self).handle_connection(stream, addr));
                    }
                    Err(e) => {
                        warn!("Failed to accept connection: {}", e);
                    }
                },
            }
        }
    }

    async fn handle_connection(self: Arc<Self>, mut stream: TcpStream, addr: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY for {}: {}", addr, e);
        }

        loop {
            let message: Message = match read_frame(&mut stream).await {
                Ok(Some(message)) => message,
                Ok(None) => {
                    debug!("Connection from {} closed", addr);
                    return;
                }
                Err(e) => {
                    warn!("Dropping connection from {}: {}", addr, e);
                    return;
                }
            };

            let response = self.dispatch(message).await;
            if let Err(e) = write_frame(&mut stream, &response).await {
                warn!("Failed to reply to {}: {}", addr, e);
                return;
            }
        }
    }

    /// Apply one message to the served layer
    pub async fn dispatch(&self, message: Message) -> Response {
        let message_type = message.message_type;
        match self.handle(message).await {
            Ok(value) => Response::success(value),
            Err(e) => {
                warn!("{:?} request failed: {}", message_type, e);
                Response::from_error(&e)
            }
        }
    }

    async fn handle(&self, message: Message) -> Result<Option<Vec<u8>>> {
        match message.message_type {
            MessageType::Get => {
                let key: K = decode(&message.key)?;
                match self.layer.get(&key).await? {
                    Some(value) => encode(&value).map(Some),
                    None => Ok(None),
                }
            }
            MessageType::Set => {
                let key: K = decode(&message.key)?;
                let value: V = decode(&message.value)?;
                self.layer.set(key, value).await?;
                Ok(None)
            }
            MessageType::Remove => {
                let key: K = decode(&message.key)?;
                self.layer.remove(&key).await?;
                Ok(None)
            }
            MessageType::Sync => {
                self.layer.sync().await?;
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Cache;
    use crate::core::error::CacheError;
    use crate::core::types::CacheConfig;
    use crate::storage::{BackendStorage, MemoryStorage};

    fn server() -> (LayerServer<String, Vec<u8>>, Arc<MemoryStorage<String, Vec<u8>>>) {
        let store = Arc::new(MemoryStorage::<String, Vec<u8>>::new());
        let layer: LayerRef<String, Vec<u8>> = Arc::new(Cache::<String, Vec<u8>>::new(
            "served",
            store.clone(),
            CacheConfig::default(),
        ));
        (LayerServer::new(layer), store)
    }

    #[tokio::test]
    async fn test_dispatch_set_get() {
        let (server, store) = server();
        let key = encode(&"k".to_string()).unwrap();
        let value = encode(&b"v".to_vec()).unwrap();

        let response = server.dispatch(Message::set(key.clone(), value)).await;
        assert!(response.is_success());
        assert_eq!(store.get(&"k".to_string()), Some(b"v".to_vec()));

        let response = server.dispatch(Message::get(key)).await;
        let bytes = response.into_result().unwrap().unwrap();
        let decoded: Vec<u8> = decode(&bytes).unwrap();
        assert_eq!(decoded, b"v".to_vec());
    }

    #[tokio::test]
    async fn test_dispatch_undecodable_key() {
        let (server, _) = server();
        let response = server.dispatch(Message::get(vec![0xff, 0xff, 0xff])).await;
        assert!(!response.is_success());
        assert!(!response.retryable, "a bad key fails the same way every time");
        assert!(matches!(
            response.into_result(),
            Err(CacheError::Rejected(_))
        ));
    }
}
