//! Retry wrapper for flush callbacks.

use anyhow::Result;
use async_trait::async_trait;
use split_cache::FlushCallback;
use std::fmt::Display;
use std::marker::PhantomData;
use std::time::Duration;
use tokio::time::sleep;

/// Maximum number of retries after the first attempt
pub const DEFAULT_MAX_RETRIES: u32 = 5;
/// Base delay between retries (doubled per attempt, capped at 16x)
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 100;

/// Retries a failing callback before reporting the failure to the cache.
///
/// Only the final error reaches the cache's failure policy. Retries happen
/// while the partition's flush lock is held, so they delay the next flush
/// of that partition but never reorder it.
pub struct RetryingCallback<C, M, K> {
    inner: C,
    max_retries: u32,
    base_delay: Duration,
    _marker: PhantomData<fn(&M, &K)>,
}

impl<C, M, K> RetryingCallback<C, M, K>
where
    C: FlushCallback<M, K>,
{
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_millis(DEFAULT_RETRY_BASE_DELAY_MS),
            _marker: PhantomData,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        // Exponential backoff, max 16x base
        self.base_delay * (1 << (attempt - 1).min(4))
    }
}

#[async_trait]
impl<C, M, K> FlushCallback<M, K> for RetryingCallback<C, M, K>
where
    C: FlushCallback<M, K>,
    M: Send + Sync + 'static,
    K: Display + Send + Sync + 'static,
{
    async fn flush(&self, key: &K, batch: &[M]) -> Result<()> {
        let mut attempt = 0;
        loop {
            match self.inner.flush(key, batch).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.max_retries => {
                    attempt += 1;
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        "Retrying flush of partition {key} (attempt {attempt}/{}), waiting {delay:?}: {e:#}",
                        self.max_retries
                    );
                    sleep(delay).await;
                }
                Err(e) => {
                    return Err(e.context(format!(
                        "flush of partition {key} failed after {} retries",
                        self.max_retries
                    )))
                }
            }
        }
    }
}
