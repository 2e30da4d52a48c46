//! Per-partition message buffer.

use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::Instant;

struct BufferState<M> {
    items: Vec<M>,
    last_flushed_at: Instant,
}

/// Ordered, append-only buffer of pending messages for one split key.
///
/// Only [`PartitionedMessageCache`](crate::PartitionedMessageCache) mutates
/// a buffer. Every mutation adjusts the cache-wide pending counter while
/// the item lock is held, so the counter never disagrees with the buffers
/// outside a single critical section.
pub struct SplitBuffer<K, M> {
    key: K,
    state: Mutex<BufferState<M>>,
    /// Held for the whole drain-deliver-requeue sequence. At most one flush
    /// of this partition runs at a time.
    flush_lock: Mutex<()>,
}

impl<K, M> SplitBuffer<K, M> {
    pub(crate) fn new(key: K) -> Self {
        Self {
            key,
            state: Mutex::new(BufferState {
                items: Vec::new(),
                last_flushed_at: Instant::now(),
            }),
            flush_lock: Mutex::new(()),
        }
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    /// Number of messages currently waiting in this buffer.
    pub async fn len(&self) -> usize {
        self.state.lock().await.items.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// When this buffer was created or last drained.
    pub async fn last_flushed_at(&self) -> Instant {
        self.state.lock().await.last_flushed_at
    }

    /// Append a message; returns the pending count after the append.
    pub(crate) async fn push(&self, message: M, pending: &AtomicUsize) -> usize {
        let mut state = self.state.lock().await;
        state.items.push(message);
        pending.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Swap the item list for an empty one and return what was pending.
    pub(crate) async fn drain(&self, pending: &AtomicUsize) -> Vec<M> {
        let mut state = self.state.lock().await;
        let drained = std::mem::take(&mut state.items);
        state.last_flushed_at = Instant::now();
        pending.fetch_sub(drained.len(), Ordering::SeqCst);
        drained
    }

    /// Put undelivered messages back in front of anything enqueued since
    /// they were drained.
    pub(crate) async fn requeue_front(&self, mut undelivered: Vec<M>, pending: &AtomicUsize) {
        if undelivered.is_empty() {
            return;
        }
        let mut state = self.state.lock().await;
        let count = undelivered.len();
        undelivered.append(&mut state.items);
        state.items = undelivered;
        pending.fetch_add(count, Ordering::SeqCst);
    }

    pub(crate) async fn lock_flush(&self) -> MutexGuard<'_, ()> {
        self.flush_lock.lock().await
    }

    pub(crate) fn try_lock_flush(&self) -> Option<MutexGuard<'_, ()>> {
        self.flush_lock.try_lock().ok()
    }
}

impl<K: std::fmt::Debug, M> std::fmt::Debug for SplitBuffer<K, M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SplitBuffer")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}
