//! Sink that only logs.

use anyhow::Result;
use async_trait::async_trait;
use split_cache::FlushCallback;
use std::fmt::{Debug, Display};
use std::sync::atomic::{AtomicU64, Ordering};

/// Logs every batch at `info` (messages themselves at `trace`) and counts
/// what it saw. Never fails.
#[derive(Debug, Default)]
pub struct TracingSink {
    batches: AtomicU64,
    messages: AtomicU64,
}

impl TracingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batches(&self) -> u64 {
        self.batches.load(Ordering::Relaxed)
    }

    pub fn messages(&self) -> u64 {
        self.messages.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl<M, K> FlushCallback<M, K> for TracingSink
where
    M: Debug + Send + Sync + 'static,
    K: Display + Send + Sync + 'static,
{
    async fn flush(&self, key: &K, batch: &[M]) -> Result<()> {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.messages
            .fetch_add(batch.len() as u64, Ordering::Relaxed);
        tracing::info!("Flushed {} messages for partition {key}", batch.len());
        for message in batch {
            tracing::trace!("{key}: {message:?}");
        }
        Ok(())
    }
}
