use super::error::{CacheError, Result};
use super::flusher::{Flusher, FlusherParts, QueueSlot, SyncReply};
use super::layer::{Layer, LayerRef, Links};
use super::types::{
    CacheConfig, CacheKey, CacheValue, FlusherState, LayerStats, LayerStatsSnapshot, Operation,
    Pending, SharedState,
};
use crate::storage::BackendStorage;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Buffered write-back layer.
///
/// Writes commit to the local backend immediately and reach the lower
/// neighbor through a background flusher that batches them per key.
/// A layer without a lower neighbor is terminal: its writes apply in place
/// and nothing is queued.
pub struct Cache<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    name: String,
    storage: Arc<dyn BackendStorage<K, V>>,
    config: CacheConfig,
    links: Links<K, V>,

    /// Producer side of the pending queue, swapped by the flusher on sync
    queue: QueueSlot<K, V>,

    /// Consumer side, handed to the flusher on start
    receiver: Mutex<Option<mpsc::Receiver<Pending<K, V>>>>,

    /// Sync requests to the running flusher
    requests: RwLock<Option<mpsc::Sender<SyncReply>>>,

    task: Mutex<Option<JoinHandle<Result<()>>>>,
    state: Arc<SharedState>,
    stats: Arc<LayerStats>,
}

impl<K, V> Cache<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    /// Create a layer over `storage`. The flusher runs once the layer is
    /// started, after wiring.
    pub fn new(
        name: impl Into<String>,
        storage: Arc<dyn BackendStorage<K, V>>,
        config: CacheConfig,
    ) -> Self {
        let name = name.into();
        let capacity = config.queue_capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);

        debug!(
            "Creating cache layer '{}' (queue={}, limit={})",
            name, capacity, config.buffer_limit
        );

        Self {
            name,
            storage,
            config,
            links: Links::new(),
            queue: Arc::new(RwLock::new(Some(sender))),
            receiver: Mutex::new(Some(receiver)),
            requests: RwLock::new(None),
            task: Mutex::new(None),
            state: Arc::new(SharedState::default()),
            stats: Arc::new(LayerStats::default()),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<dyn BackendStorage<K, V>> {
        &self.storage
    }

    pub fn is_terminal(&self) -> bool {
        self.links.is_terminal()
    }

    pub fn flusher_state(&self) -> FlusherState {
        self.state.load()
    }

    pub fn stats(&self) -> LayerStatsSnapshot {
        self.stats.snapshot()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state.load() == FlusherState::Stopped {
            return Err(CacheError::Stopped(self.name.clone()));
        }
        Ok(())
    }

    /// Apply locally, then queue for the lower neighbor unless terminal
    async fn commit(&self, key: K, operation: Operation<V>) -> Result<()> {
        match &operation {
            Operation::Set(value) => self.storage.add(key.clone(), value.clone()),
            Operation::Remove => self.storage.remove(&key),
        }

        if self.links.is_terminal() {
            return Ok(());
        }
        self.enqueue(key, operation).await
    }

    /// Hand an operation to the flusher; waits while the queue is full
    async fn enqueue(&self, key: K, operation: Operation<V>) -> Result<()> {
        let sender = {
            let slot = self.queue.read();
            slot.clone()
        };
        let Some(sender) = sender else {
            return Err(CacheError::Stopped(self.name.clone()));
        };

        sender
            .send(Pending { key, operation })
            .await
            .map_err(|_| CacheError::Stopped(self.name.clone()))
    }

    /// Hand operations queued before the flusher ever ran to the lower
    /// neighbor. The queue must already be closed.
    async fn drain_unstarted(&self, mut receiver: mpsc::Receiver<Pending<K, V>>) -> Result<()> {
        let Some(lower) = self.links.lower() else {
            return Ok(());
        };

        let mut drained = 0usize;
        let mut first_error = None;
        while let Some(pending) = receiver.recv().await {
            drained += 1;
            if let Err(e) = lower.write_back(pending.key, pending.operation).await {
                first_error.get_or_insert(e);
            }
        }
        debug!(
            "Layer '{}' drained {} operations queued before start",
            self.name, drained
        );

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Invalidate the copies held above before changing a key here
    async fn skim_upper(&self, key: &K) -> Result<()> {
        match self.links.upper() {
            Some(upper) => upper.skim(key).await,
            None => Ok(()),
        }
    }
}

#[async_trait]
impl<K, V> Layer<K, V> for Cache<K, V>
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
            debug!("GET layer={} key={:?} HIT", self.name, key);
            return Ok(Some(value));
        }

        self.stats.record_miss();
        debug!("GET layer={} key={:?} MISS", self.name, key);

        let Some(lower) = self.links.lower() else {
            return Ok(None);
        };

        let value = lower.get(key).await?;
        if let Some(value) = &value {
            // Backfill; the value came from below, so nothing above is stale
            self.commit(key.clone(), Operation::Set(value.clone()))
                .await?;
        }
        Ok(value)
    }

    async fn set(&self, key: K, value: V) -> Result<()> {
        self.ensure_open()?;
        debug!("SET layer={} key={:?}", self.name, key);
        self.stats.record_set();

        self.skim_upper(&key).await?;
        self.commit(key, Operation::Set(value)).await
    }

    async fn remove(&self, key: &K) -> Result<()> {
        self.ensure_open()?;
        debug!("REMOVE layer={} key={:?}", self.name, key);
        self.stats.record_remove();

        self.skim_upper(key).await?;
        self.commit(key.clone(), Operation::Remove).await
    }

    async fn sync(&self) -> Result<()> {
        if self.links.is_terminal() {
            return Ok(());
        }

        let requests = {
            let requests = self.requests.read();
            requests.clone()
        };
        let Some(requests) = requests else {
            return Err(match self.state.load() {
                FlusherState::Idle => CacheError::NotStarted(self.name.clone()),
                _ => CacheError::Stopped(self.name.clone()),
            });
        };

        debug!("SYNC layer={}", self.name);
        let (reply_tx, reply_rx) = oneshot::channel();
        requests
            .send(reply_tx)
            .await
            .map_err(|_| CacheError::Stopped(self.name.clone()))?;

        reply_rx
            .await
            .map_err(|_| CacheError::Stopped(self.name.clone()))?
    }

    async fn skim(&self, key: &K) -> Result<()> {
        debug!("SKIM layer={} key={:?}", self.name, key);
        self.stats.record_skim();
        self.storage.remove(key);
        self.skim_upper(key).await
    }

    async fn write_back(&self, key: K, operation: Operation<V>) -> Result<()> {
        self.ensure_open()?;
        self.commit(key, operation).await
    }

    fn attach_upper(&self, upper: Weak<dyn Layer<K, V>>) {
        self.links.set_upper(upper);
    }

    fn attach_lower(&self, lower: LayerRef<K, V>) {
        if self.state.load() != FlusherState::Idle {
            warn!(
                "Layer '{}' got a lower neighbor after start; its flusher keeps the old one",
                self.name
            );
        }
        self.links.set_lower(lower);
    }

    fn is_attached(&self) -> bool {
        self.links.is_attached()
    }

    async fn start(&self) -> Result<()> {
        match self.state.load() {
            FlusherState::Idle => {}
            FlusherState::Stopped => return Err(CacheError::Stopped(self.name.clone())),
            _ => return Err(CacheError::AlreadyStarted(self.name.clone())),
        }

        let receiver = self.receiver.lock().take();
        let Some(receiver) = receiver else {
            return Err(CacheError::AlreadyStarted(self.name.clone()));
        };

        let Some(lower) = self.links.lower() else {
            // Terminal layers never queue anything
            self.state.store(FlusherState::Running);
            info!("Layer '{}' started as terminal layer", self.name);
            return Ok(());
        };

        let (requests_tx, requests_rx) = mpsc::channel(16);
        *self.requests.write() = Some(requests_tx);

        let flusher = Flusher::new(
            FlusherParts {
                name: self.name.clone(),
                lower,
                buffer_limit: self.config.buffer_limit,
                capacity: self.config.queue_capacity.max(1),
                flush_interval: self.config.flush_interval(),
                state: Arc::clone(&self.state),
                stats: Arc::clone(&self.stats),
            },
            Arc::clone(&self.queue),
            receiver,
            requests_rx,
        );

        // Visible as running before the task gets scheduled
        self.state.store(FlusherState::Running);
        *self.task.lock() = Some(tokio::spawn(flusher.run()));
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if self.state.load() == FlusherState::Stopped {
            return Err(CacheError::Stopped(self.name.clone()));
        }

        // Closing the queue makes the flusher drain, flush and exit
        self.queue.write().take();
        self.requests.write().take();

        let receiver = self.receiver.lock().take();
        let task = self.task.lock().take();
        let result = match (receiver, task) {
            // Never started: nothing else will ever read the queue
            (Some(receiver), _) => self.drain_unstarted(receiver).await,
            (None, Some(task)) => task.await.unwrap_or_else(|e| {
                Err(CacheError::Stopped(format!(
                    "{}: flusher task failed: {}",
                    self.name, e
                )))
            }),
            (None, None) => Ok(()),
        };

        self.state.store(FlusherState::Stopped);
        match &result {
            Ok(()) => info!("Layer '{}' stopped", self.name),
            Err(e) => warn!("Layer '{}' stopped with unflushed operations: {}", self.name, e),
        }
        result
    }
}

impl<K, V> Drop for Cache<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    fn drop(&mut self) {
        // Let a still-running flusher finish its final flush and exit
        self.queue.write().take();
    }
}
