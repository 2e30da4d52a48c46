//! In-memory sink.

use anyhow::Result;
use async_trait::async_trait;
use split_cache::FlushCallback;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;

/// Keeps every delivered batch in memory.
///
/// `fail_next(n)` makes the next `n` calls fail without recording
/// anything, which is how demos and tests exercise the failure policy.
#[derive(Debug)]
pub struct CollectingSink<K, M> {
    batches: Mutex<Vec<(K, Vec<M>)>>,
    failures_left: AtomicUsize,
    attempts: AtomicUsize,
}

impl<K, M> Default for CollectingSink<K, M> {
    fn default() -> Self {
        Self {
            batches: Mutex::new(Vec::new()),
            failures_left: AtomicUsize::new(0),
            attempts: AtomicUsize::new(0),
        }
    }
}

impl<K: Clone, M: Clone> CollectingSink<K, M> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    /// Calls made so far, failed ones included.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub async fn batches(&self) -> Vec<(K, Vec<M>)> {
        self.batches.lock().await.clone()
    }

    /// Total messages across all recorded batches.
    pub async fn delivered(&self) -> usize {
        self.batches.lock().await.iter().map(|(_, b)| b.len()).sum()
    }
}

#[async_trait]
impl<K, M> FlushCallback<M, K> for CollectingSink<K, M>
where
    K: Clone + Send + Sync + 'static,
    M: Clone + Send + Sync + 'static,
{
    async fn flush(&self, key: &K, batch: &[M]) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let injected = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            anyhow::bail!("injected failure for batch of {} messages", batch.len());
        }
        self.batches
            .lock()
            .await
            .push((key.clone(), batch.to_vec()));
        Ok(())
    }
}
