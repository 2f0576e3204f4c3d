use super::buffer::Buffer;
use super::error::{CacheError, Result};
use super::layer::LayerRef;
use super::types::{CacheKey, CacheValue, FlusherState, LayerStats, Pending, SharedState};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Reply channel of a sync request
pub(crate) type SyncReply = oneshot::Sender<Result<()>>;

/// Producer side of the live pending queue, `None` once the queue is closed.
/// Producers clone the sender under the read lock and send outside of it;
/// the flusher swaps it under the write lock.
pub(crate) type QueueSlot<K, V> = Arc<RwLock<Option<mpsc::Sender<Pending<K, V>>>>>;

/// Background task draining one layer's pending queue into its lower neighbor
pub(crate) struct Flusher<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    name: String,
    slot: QueueSlot<K, V>,
    receiver: mpsc::Receiver<Pending<K, V>>,
    requests: mpsc::Receiver<SyncReply>,
    buffer: Buffer<K, V>,
    lower: LayerRef<K, V>,
    capacity: usize,
    flush_interval: Duration,
    state: Arc<SharedState>,
    stats: Arc<LayerStats>,

    /// First operation dropped by a background flush, reported by the next sync
    deferred_error: Option<CacheError>,
}

/// Everything a flusher needs besides its queues
pub(crate) struct FlusherParts<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    pub name: String,
    pub lower: LayerRef<K, V>,
    pub buffer_limit: usize,
    pub capacity: usize,
    pub flush_interval: Duration,
    pub state: Arc<SharedState>,
    pub stats: Arc<LayerStats>,
}

impl<K, V> Flusher<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    pub(crate) fn new(
        parts: FlusherParts<K, V>,
        slot: QueueSlot<K, V>,
        receiver: mpsc::Receiver<Pending<K, V>>,
        requests: mpsc::Receiver<SyncReply>,
    ) -> Self {
        Self {
            name: parts.name,
            slot,
            receiver,
            requests,
            buffer: Buffer::new(parts.buffer_limit),
            lower: parts.lower,
            capacity: parts.capacity,
            flush_interval: parts.flush_interval,
            state: parts.state,
            stats: parts.stats,
            deferred_error: None,
        }
    }

    /// Main loop: batch queue items, flush on limit, on silence, on sync,
    /// and once more when the queue closes. Returns the failure of the final
    /// flush or an operation dropped since the last sync.
    pub(crate) async fn run(mut self) -> Result<()> {
        info!(
            "Flusher for layer '{}' started (limit={}, interval={:?})",
            self.name,
            self.buffer.limit(),
            self.flush_interval
        );
        self.state.store(FlusherState::Running);

        loop {
            tokio::select! {
                item = self.receiver.recv() => match item {
                    Some(pending) => {
                        if let Err(e) = self.accept(pending).await {
                            warn!("Layer '{}' limit flush failed: {}", self.name, e);
                            self.defer(e);
                        }
                    }
                    // Every sender is gone: the layer is stopping
                    None => break,
                },

                Some(reply) = self.requests.recv() => {
                    self.state.store(FlusherState::DrainingForSync);
                    let result = self.barrier().await;
                    self.state.store(FlusherState::Running);
                    let _ = reply.send(result);
                }

                _ = tokio::time::sleep(self.flush_interval), if !self.buffer.is_empty() => {
                    debug!("Layer '{}' idle, flushing {} operations", self.name, self.buffer.len());
                    if let Err(e) = self.flush().await {
                        warn!("Layer '{}' idle flush failed: {}", self.name, e);
                        self.defer(e);
                    }
                }
            }
        }

        let result = match self.flush().await {
            Err(e) => {
                warn!("Layer '{}' final flush failed: {}", self.name, e);
                Err(e)
            }
            Ok(()) => self.deferred_error.take().map_or(Ok(()), Err),
        };
        self.state.store(FlusherState::Stopped);
        info!("Flusher for layer '{}' terminated", self.name);
        result
    }

    /// Keep a background failure for the next sync. Transient failures are
    /// still buffered and get retried, so only dropped operations count.
    fn defer(&mut self, error: CacheError) {
        if !error.is_transient() {
            self.deferred_error.get_or_insert(error);
        }
    }

    /// Buffer one item, flushing if the buffer grew past its limit
    async fn accept(&mut self, pending: Pending<K, V>) -> Result<()> {
        self.buffer.add(pending.key, pending.operation);
        if self.buffer.over_limit() {
            debug!(
                "Layer '{}' buffer over limit ({} > {})",
                self.name,
                self.buffer.len(),
                self.buffer.limit()
            );
            return self.flush().await;
        }
        Ok(())
    }

    /// Apply every buffered operation to the lower layer.
    /// Transient failures go back into the buffer for the next flush.
    /// A dropped operation takes precedence in the returned error.
    async fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let batch = self.buffer.take();
        let total = batch.len();
        let mut failed = 0;
        let mut dropped = None;
        let mut retried = None;

        for (key, operation) in batch {
            if let Err(e) = self
                .lower
                .write_back(key.clone(), operation.clone())
                .await
            {
                failed += 1;
                if e.is_transient() {
                    self.buffer.restore(key, operation);
                    retried.get_or_insert(e);
                } else {
                    warn!(
                        "Layer '{}' dropping operation for key {:?}: {}",
                        self.name, key, e
                    );
                    dropped.get_or_insert(e);
                }
            }
        }

        self.stats.record_flush(total - failed, failed);
        debug!(
            "Layer '{}' flushed {} operations to '{}' ({} failed)",
            self.name,
            total - failed,
            self.lower.name(),
            failed
        );

        match dropped.or(retried) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Sync barrier: flush, retire the live queue, drain it, recurse downward
    async fn barrier(&mut self) -> Result<()> {
        self.stats.record_sync();
        let mut first_error = self.deferred_error.take();
        if let Err(e) = self.flush().await {
            first_error.get_or_insert(e);
        }

        // From here on producers enqueue into the fresh queue
        let (sender, receiver) = mpsc::channel(self.capacity);
        {
            let mut slot = self.slot.write();
            match slot.as_mut() {
                Some(live) => *live = sender,
                // Closed by stop(): leave the new queue closed as well
                None => drop(sender),
            }
        }
        let mut retired = std::mem::replace(&mut self.receiver, receiver);

        // Ends once every in-flight clone of the old sender is dropped
        let mut drained = 0usize;
        while let Some(pending) = retired.recv().await {
            drained += 1;
            if let Err(e) = self.accept(pending).await {
                first_error.get_or_insert(e);
            }
        }
        if let Err(e) = self.flush().await {
            first_error.get_or_insert(e);
        }
        debug!(
            "Layer '{}' drained {} operations from retired queue",
            self.name, drained
        );

        if let Err(e) = self.lower.sync().await {
            first_error.get_or_insert(e);
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
