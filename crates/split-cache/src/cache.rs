//! Partitioned message cache.
//!
//! Routes enqueued messages into one [`SplitBuffer`] per split key and
//! hands drained buffers to a [`FlushCallback`].
//!
//! # Locking
//!
//! - The key -> buffer map sits behind an `RwLock`. Enqueues only take the
//!   write lock the first time a key is seen.
//! - Each buffer has its own item lock, so producers on different keys do
//!   not contend with each other.
//! - Each buffer has a flush lock held across drain, delivery and requeue.
//!   `flush_all` skips a partition whose flush lock is taken, `flush(key)`
//!   waits for it. Either way a partition is never drained twice at once.
//!
//! A callback that panics is treated like one that returned an error: the
//! undelivered part of the batch goes through the failure policy.
//!
//! Empty buffers stay in the map once created.

use futures::stream::{self, StreamExt};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{MutexGuard, Notify, RwLock};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::buffer::SplitBuffer;
use crate::callback::FlushCallback;
use crate::config::{FailurePolicy, FlushConfig};
use crate::error::{panic_message, FlushError, InvalidKeyError};
use crate::key::{PartitionKey, SplitKeyExtractor};

/// Outcome of one `flush_all` call.
#[derive(Debug)]
pub struct FlushReport<K> {
    /// Partitions that had messages and were handed to the callback
    pub partitions_flushed: usize,
    /// Messages the callback accepted
    pub delivered: usize,
    /// Messages pushed back into their buffer after a failure
    pub requeued: usize,
    /// Messages discarded after a failure
    pub dropped: usize,
    /// Partitions another flush was already draining
    pub skipped: Vec<K>,
    /// One entry per partition whose callback failed
    pub errors: Vec<FlushError<K>>,
}

impl<K> Default for FlushReport<K> {
    fn default() -> Self {
        Self {
            partitions_flushed: 0,
            delivered: 0,
            requeued: 0,
            dropped: 0,
            skipped: Vec::new(),
            errors: Vec::new(),
        }
    }
}

impl<K> FlushReport<K> {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Cumulative counters of a cache.
#[derive(Debug, Default)]
struct Counters {
    enqueued: AtomicU64,
    rejected: AtomicU64,
    delivered: AtomicU64,
    requeued: AtomicU64,
    dropped: AtomicU64,
    failed_flushes: AtomicU64,
}

/// Snapshot of a cache's cumulative counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub enqueued: u64,
    pub rejected: u64,
    pub delivered: u64,
    pub requeued: u64,
    pub dropped: u64,
    pub failed_flushes: u64,
}

enum PartitionOutcome<K> {
    Empty,
    Skipped(K),
    Delivered(usize),
    Failed {
        delivered: usize,
        error: FlushError<K>,
    },
}

/// Thread-safe, split-partitioned message buffer with batch flushing.
pub struct PartitionedMessageCache<M, K> {
    extractor: Box<dyn SplitKeyExtractor<M, K>>,
    callback: Box<dyn FlushCallback<M, K>>,
    config: FlushConfig,
    buffers: RwLock<HashMap<K, Arc<SplitBuffer<K, M>>>>,
    pending: AtomicUsize,
    size_signal: Notify,
    created_at: Instant,
    last_flush_ms: AtomicU64,
    counters: Counters,
}

impl<M, K> PartitionedMessageCache<M, K>
where
    M: Send + Sync + 'static,
    K: PartitionKey,
{
    /// Build a cache. Fails if `config` does not pass
    /// [`FlushConfig::validate`].
    pub fn new<E, C>(extractor: E, callback: C, config: FlushConfig) -> anyhow::Result<Self>
    where
        E: SplitKeyExtractor<M, K> + 'static,
        C: FlushCallback<M, K> + 'static,
    {
        config.validate()?;
        Ok(Self {
            extractor: Box::new(extractor),
            callback: Box::new(callback),
            config,
            buffers: RwLock::new(HashMap::new()),
            pending: AtomicUsize::new(0),
            size_signal: Notify::new(),
            created_at: Instant::now(),
            last_flush_ms: AtomicU64::new(0),
            counters: Counters::default(),
        })
    }

    pub fn config(&self) -> &FlushConfig {
        &self.config
    }

    /// Route a message to the buffer of its split key.
    ///
    /// Returns the aggregate pending count after the append. A message
    /// whose key cannot be derived is rejected and not buffered.
    pub async fn enqueue(&self, message: M) -> Result<usize, InvalidKeyError> {
        let key = match self.extractor.split_key(&message) {
            Ok(key) => key,
            Err(e) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                trace!("Rejected message: {e}");
                return Err(e);
            }
        };

        let buffer = self.buffer_for(key).await;
        let pending = buffer.push(message, &self.pending).await;
        self.counters.enqueued.fetch_add(1, Ordering::Relaxed);

        if pending >= self.config.size_threshold {
            self.size_signal.notify_one();
        }
        Ok(pending)
    }

    async fn buffer_for(&self, key: K) -> Arc<SplitBuffer<K, M>> {
        if let Some(buffer) = self.buffers.read().await.get(&key) {
            return Arc::clone(buffer);
        }
        let mut buffers = self.buffers.write().await;
        Arc::clone(
            buffers
                .entry(key.clone())
                .or_insert_with(|| Arc::new(SplitBuffer::new(key))),
        )
    }

    /// Aggregate number of buffered messages across all partitions.
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Number of partitions that have ever received a message.
    pub async fn partition_count(&self) -> usize {
        self.buffers.read().await.len()
    }

    pub async fn keys(&self) -> Vec<K> {
        self.buffers.read().await.keys().cloned().collect()
    }

    /// Read-only view of one partition's buffer.
    pub async fn buffer(&self, key: &K) -> Option<Arc<SplitBuffer<K, M>>> {
        self.buffers.read().await.get(key).cloned()
    }

    /// Pending messages for one key (0 for an unknown key).
    pub async fn partition_len(&self, key: &K) -> usize {
        match self.buffer(key).await {
            Some(buffer) => buffer.len().await,
            None => 0,
        }
    }

    /// When the last `flush_all` finished (cache creation if none has).
    pub fn last_flush_at(&self) -> Instant {
        self.created_at
            + std::time::Duration::from_millis(self.last_flush_ms.load(Ordering::SeqCst))
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            enqueued: self.counters.enqueued.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            requeued: self.counters.requeued.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            failed_flushes: self.counters.failed_flushes.load(Ordering::Relaxed),
        }
    }

    /// Signalled by `enqueue` whenever the pending count reaches the size
    /// threshold.
    pub(crate) fn size_signal(&self) -> &Notify {
        &self.size_signal
    }

    /// Drain every non-empty partition and hand each batch to the callback.
    ///
    /// Partitions already being flushed by another caller are skipped and
    /// listed in [`FlushReport::skipped`]. Callback failures never
    /// propagate; they are reported and handled per the failure policy.
    pub async fn flush_all(&self) -> FlushReport<K> {
        let buffers: Vec<Arc<SplitBuffer<K, M>>> =
            self.buffers.read().await.values().cloned().collect();

        let outcomes: Vec<PartitionOutcome<K>> = stream::iter(buffers)
            .map(|buffer| async move {
                match buffer.try_lock_flush() {
                    Some(guard) => self.flush_locked(&buffer, guard).await,
                    None => PartitionOutcome::Skipped(buffer.key().clone()),
                }
            })
            .buffer_unordered(self.config.max_concurrent_flushes.max(1))
            .collect()
            .await;

        let mut report = FlushReport::default();
        for outcome in outcomes {
            match outcome {
                PartitionOutcome::Empty => {}
                PartitionOutcome::Skipped(key) => report.skipped.push(key),
                PartitionOutcome::Delivered(n) => {
                    report.partitions_flushed += 1;
                    report.delivered += n;
                }
                PartitionOutcome::Failed { delivered, error } => {
                    report.partitions_flushed += 1;
                    report.delivered += delivered;
                    match self.config.failure_policy {
                        FailurePolicy::Requeue => report.requeued += error.undelivered,
                        FailurePolicy::Drop => report.dropped += error.undelivered,
                    }
                    report.errors.push(error);
                }
            }
        }

        let since_creation = self.created_at.elapsed().as_millis() as u64;
        self.last_flush_ms.store(since_creation, Ordering::SeqCst);

        if report.partitions_flushed > 0 {
            debug!(
                partitions = report.partitions_flushed,
                delivered = report.delivered,
                requeued = report.requeued,
                dropped = report.dropped,
                skipped = report.skipped.len(),
                "Flushed partitions"
            );
        }
        report
    }

    /// Flush a single partition, waiting for any flush of it in progress.
    ///
    /// Returns the number of delivered messages; 0 for an unknown or empty
    /// key.
    pub async fn flush(&self, key: &K) -> Result<usize, FlushError<K>> {
        let Some(buffer) = self.buffer(key).await else {
            return Ok(0);
        };
        let guard = buffer.lock_flush().await;
        match self.flush_locked(&buffer, guard).await {
            PartitionOutcome::Empty | PartitionOutcome::Skipped(_) => Ok(0),
            PartitionOutcome::Delivered(n) => Ok(n),
            PartitionOutcome::Failed { error, .. } => Err(error),
        }
    }

    async fn flush_locked(
        &self,
        buffer: &SplitBuffer<K, M>,
        _guard: MutexGuard<'_, ()>,
    ) -> PartitionOutcome<K> {
        let mut batch = buffer.drain(&self.pending).await;
        if batch.is_empty() {
            return PartitionOutcome::Empty;
        }

        let key = buffer.key();
        let total = batch.len();
        let chunk_size = self.config.partition_batch_size.unwrap_or(total).max(1);
        let mut delivered = 0;

        while delivered < total {
            let end = (delivered + chunk_size).min(total);
            trace!("Flushing {} messages of partition {key}", end - delivered);

            let attempt = AssertUnwindSafe(self.callback.flush(key, &batch[delivered..end]))
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| {
                    Err(anyhow::anyhow!(
                        "flush callback panicked: {}",
                        panic_message(payload.as_ref())
                    ))
                });

            match attempt {
                Ok(()) => {
                    self.counters
                        .delivered
                        .fetch_add((end - delivered) as u64, Ordering::Relaxed);
                    delivered = end;
                }
                Err(source) => {
                    let undelivered = batch.split_off(delivered);
                    let error = FlushError {
                        key: key.clone(),
                        undelivered: undelivered.len(),
                        source,
                    };
                    self.handle_failure(buffer, undelivered, &error).await;
                    return PartitionOutcome::Failed { delivered, error };
                }
            }
        }

        PartitionOutcome::Delivered(delivered)
    }

    async fn handle_failure(
        &self,
        buffer: &SplitBuffer<K, M>,
        undelivered: Vec<M>,
        error: &FlushError<K>,
    ) {
        self.counters.failed_flushes.fetch_add(1, Ordering::Relaxed);
        let count = undelivered.len() as u64;
        match self.config.failure_policy {
            FailurePolicy::Requeue => {
                buffer.requeue_front(undelivered, &self.pending).await;
                self.counters.requeued.fetch_add(count, Ordering::Relaxed);
                warn!("{error}; requeued for the next flush");
            }
            FailurePolicy::Drop => {
                self.counters.dropped.fetch_add(count, Ordering::Relaxed);
                warn!("{error}; dropped");
            }
        }
    }
}

impl<M, K> std::fmt::Debug for PartitionedMessageCache<M, K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionedMessageCache")
            .field("pending", &self.pending.load(Ordering::SeqCst))
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
