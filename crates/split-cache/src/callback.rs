//! FlushCallback trait definition.
//!
//! The callback is the boundary between the cache and the sink. The cache
//! calls it once per drained partition (or per chunk, when a partition
//! batch size is configured) with the messages in enqueue order.

use anyhow::Result;
use std::sync::Arc;

/// Delivers a drained batch to a sink.
///
/// Returning `Ok(())` means every message in `batch` was delivered; the
/// cache then drops them. Returning an error marks the whole batch as
/// undelivered and hands it to the configured
/// [`FailurePolicy`](crate::FailurePolicy). Retries beyond that policy are
/// the sink's business.
///
/// Calls for the same key never overlap. Calls for different keys may run
/// concurrently when `max_concurrent_flushes > 1`.
#[async_trait::async_trait]
pub trait FlushCallback<M, K>: Send + Sync {
    async fn flush(&self, key: &K, batch: &[M]) -> Result<()>;
}

#[async_trait::async_trait]
impl<M, K, C> FlushCallback<M, K> for Arc<C>
where
    C: FlushCallback<M, K> + ?Sized,
    M: Send + Sync + 'static,
    K: Send + Sync + 'static,
{
    async fn flush(&self, key: &K, batch: &[M]) -> Result<()> {
        (**self).flush(key, batch).await
    }
}
