// Remote Layer Integration Tests
// A client chain talking to a served chain over real TCP sockets

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use transcache::{
    BackendStorage, Cache, CacheConfig, CacheError, Chain, Layer, LayerRef, LayerServer,
    MemoryStorage, RemoteLayer, TcpTransmitter,
};

type Store = Arc<MemoryStorage<String, Vec<u8>>>;

struct ServedChain {
    addr: SocketAddr,
    terminal: Store,
    chain: Arc<Chain<String, Vec<u8>>>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl ServedChain {
    /// Two-layer chain served on an ephemeral port
    async fn start() -> Self {
        let (front, terminal): (Store, Store) =
            (Arc::new(MemoryStorage::new()), Arc::new(MemoryStorage::new()));
        let config = CacheConfig {
            flush_interval_ms: 60_000,
            ..CacheConfig::default()
        };

        let layers: Vec<LayerRef<String, Vec<u8>>> = vec![
            Arc::new(Cache::<String, Vec<u8>>::new("front", front, config.clone())),
            Arc::new(Cache::<String, Vec<u8>>::new("disk", terminal.clone(), config)),
        ];
        let chain = Arc::new(Chain::assemble(layers).await.unwrap());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Arc::new(LayerServer::new(Arc::clone(chain.top())));

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        tokio::spawn(async move {
            server
                .serve_with_shutdown(listener, async {
                    let _ = shutdown_rx.await;
                })
                .await
                .unwrap();
        });

        Self {
            addr,
            terminal,
            chain,
            shutdown: Some(shutdown_tx),
        }
    }

    fn remote(&self, name: &str) -> Arc<RemoteLayer<String, Vec<u8>>> {
        let transmitter = Arc::new(TcpTransmitter::new(self.addr.to_string()));
        Arc::new(RemoteLayer::new(name, transmitter))
    }
}

impl Drop for ServedChain {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

fn key(k: &str) -> String {
    k.to_string()
}

#[tokio::test]
async fn test_remote_set_get_remove() {
    let served = ServedChain::start().await;
    let remote = served.remote("remote");
    remote.start().await.unwrap();

    remote.set(key("a"), b"alpha".to_vec()).await.unwrap();
    assert_eq!(
        remote.get(&key("a")).await.unwrap(),
        Some(b"alpha".to_vec())
    );

    remote.remove(&key("a")).await.unwrap();
    assert_eq!(remote.get(&key("a")).await.unwrap(), None);

    remote.stop().await.unwrap();
}

#[tokio::test]
async fn test_remote_sync_reaches_server_terminal() {
    let served = ServedChain::start().await;
    let remote = served.remote("remote");

    remote.set(key("a"), b"1".to_vec()).await.unwrap();
    assert!(served.terminal.get(&key("a")).is_none(), "buffered on server");

    remote.sync().await.unwrap();
    assert_eq!(served.terminal.get(&key("a")), Some(b"1".to_vec()));
}

#[tokio::test]
async fn test_local_chain_over_remote_terminal() {
    let served = ServedChain::start().await;
    let local_store: Store = Arc::new(MemoryStorage::new());
    let local: LayerRef<String, Vec<u8>> = Arc::new(Cache::<String, Vec<u8>>::new(
        "local",
        local_store.clone(),
        CacheConfig::default(),
    ));
    let remote: LayerRef<String, Vec<u8>> = served.remote("remote");

    let chain = Chain::assemble(vec![local, remote]).await.unwrap();

    chain.set(key("k"), b"v".to_vec()).await.unwrap();
    assert_eq!(local_store.get(&key("k")), Some(b"v".to_vec()));
    assert!(served.terminal.get(&key("k")).is_none());

    // Barrier crosses the wire and drains the server chain too
    chain.sync().await.unwrap();
    assert_eq!(served.terminal.get(&key("k")), Some(b"v".to_vec()));

    // Read-through backfills from the server
    served
        .chain
        .terminal()
        .set(key("remote-only"), b"42".to_vec())
        .await
        .unwrap();
    assert_eq!(
        chain.get(&key("remote-only")).await.unwrap(),
        Some(b"42".to_vec())
    );
    assert_eq!(local_store.get(&key("remote-only")), Some(b"42".to_vec()));

    chain.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_remote_connection_refused() {
    // Bind then drop to get a port nothing listens on
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let remote: RemoteLayer<String, Vec<u8>> =
        RemoteLayer::new("remote", Arc::new(TcpTransmitter::new(addr.to_string())));

    let result = remote.get(&key("a")).await;
    assert!(matches!(result, Err(CacheError::ConnectionFailed(_))));
}

#[tokio::test]
async fn test_many_clients_share_server() {
    let served = ServedChain::start().await;

    let mut handles = Vec::new();
    for client in 0..4 {
        let remote = served.remote(&format!("client-{}", client));
        handles.push(tokio::spawn(async move {
            for i in 0..25 {
                remote
                    .set(format!("c{}-{}", client, i), vec![client as u8, i as u8])
                    .await
                    .unwrap();
            }
            remote.sync().await.unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(served.terminal.len(), 100);
    assert_eq!(served.terminal.get(&key("c2-7")), Some(vec![2, 7]));
}

#[tokio::test]
async fn test_server_stops_accepting_after_shutdown() {
    let mut served = ServedChain::start().await;
    let addr = served.addr;

    if let Some(tx) = served.shutdown.take() {
        tx.send(()).unwrap();
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    let remote: RemoteLayer<String, Vec<u8>> =
        RemoteLayer::new("late", Arc::new(TcpTransmitter::new(addr.to_string())));
    assert!(remote.get(&key("a")).await.is_err());
}
