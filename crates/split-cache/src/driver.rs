//! Background auto-flush driver.
//!
//! One tokio task per driver. Each iteration it checks the cache and calls
//! [`PartitionedMessageCache::flush_all`] once either threshold is crossed:
//!
//! - the aggregate pending count reached `size_threshold`, or
//! - `time_threshold` elapsed since the driver's last flush.
//!
//! Between checks it waits on whichever comes first: the cache's
//! size-crossing signal, the time-threshold deadline (capped at
//! `poll_interval`), or cancellation.
//!
//! The driver never exits because of a flush. Callback failures, panics
//! included, come back in the [`FlushReport`](crate::FlushReport); any other
//! panic in the flush cycle is caught, logged as a [`DriverLoopError`], and
//! the loop goes on.
//! After a cycle with failures, or one that found every due partition busy
//! with another flush, the driver waits one `poll_interval` before its next
//! check. Failed partitions are retried on the next due cycle and a partition
//! held by a slow manual flush is not polled in a tight loop.

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cache::PartitionedMessageCache;
use crate::error::DriverLoopError;
use crate::key::PartitionKey;

#[derive(Debug, Default)]
struct DriverCounters {
    cycles: AtomicU64,
    failed_cycles: AtomicU64,
    loop_errors: AtomicU64,
}

/// Snapshot of a driver's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriverStats {
    /// Flush cycles started
    pub cycles: u64,
    /// Cycles whose report contained at least one FlushError
    pub failed_cycles: u64,
    /// Cycles that panicked
    pub loop_errors: u64,
}

/// Handle to a running (or stopped) auto-flush task.
///
/// Stopping is cooperative: a flush already in progress completes, and no
/// new one starts. A stopped driver cannot be restarted; create a new one.
/// Dropping the driver stops it.
pub struct AutoFlushDriver {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
    counters: Arc<DriverCounters>,
}

impl AutoFlushDriver {
    /// Create a driver for `cache`.
    ///
    /// With `enabled` the background task is spawned immediately (this
    /// needs a tokio runtime). Otherwise the driver starts out stopped.
    pub fn new<M, K>(cache: Arc<PartitionedMessageCache<M, K>>, enabled: bool) -> Self
    where
        M: Send + Sync + 'static,
        K: PartitionKey,
    {
        let token = CancellationToken::new();
        let counters = Arc::new(DriverCounters::default());

        let handle = if enabled {
            Some(tokio::spawn(run_loop(
                cache,
                token.clone(),
                Arc::clone(&counters),
            )))
        } else {
            token.cancel();
            None
        };

        Self {
            token,
            handle,
            counters,
        }
    }

    /// Spawn a running driver.
    pub fn start<M, K>(cache: Arc<PartitionedMessageCache<M, K>>) -> Self
    where
        M: Send + Sync + 'static,
        K: PartitionKey,
    {
        Self::new(cache, true)
    }

    /// Ask the driver to stop. Observed at its next wait point.
    pub fn stop(&self) {
        if !self.token.is_cancelled() {
            info!("Stopping auto-flush driver");
            self.token.cancel();
        }
    }

    pub fn is_running(&self) -> bool {
        !self.token.is_cancelled()
            && self
                .handle
                .as_ref()
                .map(|h| !h.is_finished())
                .unwrap_or(false)
    }

    /// Stop the driver and wait for the task, including any in-flight
    /// flush, to finish.
    pub async fn shutdown(mut self) {
        self.stop();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                error!("Auto-flush task ended abnormally: {e}");
            }
        }
    }

    pub fn stats(&self) -> DriverStats {
        DriverStats {
            cycles: self.counters.cycles.load(Ordering::Relaxed),
            failed_cycles: self.counters.failed_cycles.load(Ordering::Relaxed),
            loop_errors: self.counters.loop_errors.load(Ordering::Relaxed),
        }
    }
}

impl Drop for AutoFlushDriver {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

impl std::fmt::Debug for AutoFlushDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoFlushDriver")
            .field("running", &self.is_running())
            .field("stats", &self.stats())
            .finish()
    }
}

async fn run_loop<M, K>(
    cache: Arc<PartitionedMessageCache<M, K>>,
    token: CancellationToken,
    counters: Arc<DriverCounters>,
) where
    M: Send + Sync + 'static,
    K: PartitionKey,
{
    let config = cache.config().clone();
    let time_threshold = config.time_threshold();
    let poll_interval = config.poll_interval();
    info!(
        "Auto-flush driver started (size_threshold={}, time_threshold={:?}, poll_interval={:?})",
        config.size_threshold, time_threshold, poll_interval
    );

    let mut last_flush = Instant::now();

    while !token.is_cancelled() {
        let pending = cache.pending_count();
        let elapsed = last_flush.elapsed();

        if pending < config.size_threshold && elapsed < time_threshold {
            let wait = (time_threshold - elapsed).min(poll_interval);
            if !wait_for_work(&cache, &token, wait).await {
                break;
            }
            continue;
        }

        if pending == 0 {
            last_flush = Instant::now();
            if !wait_for_work(&cache, &token, time_threshold.min(poll_interval)).await {
                break;
            }
            continue;
        }

        counters.cycles.fetch_add(1, Ordering::Relaxed);
        let outcome = AssertUnwindSafe(cache.flush_all()).catch_unwind().await;
        last_flush = Instant::now();

        let backoff = match outcome {
            Ok(report) if !report.is_success() => {
                counters.failed_cycles.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Auto-flush cycle had {} failed partitions ({} requeued, {} dropped)",
                    report.errors.len(),
                    report.requeued,
                    report.dropped
                );
                true
            }
            Ok(report) if report.partitions_flushed == 0 || !report.skipped.is_empty() => {
                debug!(
                    "Auto-flush cycle skipped {} partitions busy with another flush",
                    report.skipped.len()
                );
                true
            }
            Ok(report) => {
                debug!(
                    "Auto-flush delivered {} messages from {} partitions",
                    report.delivered, report.partitions_flushed
                );
                false
            }
            Err(payload) => {
                counters.loop_errors.fetch_add(1, Ordering::Relaxed);
                let err = DriverLoopError::from_panic(payload);
                error!("Auto-flush cycle failed, continuing: {err}");
                true
            }
        };

        if backoff {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = sleep(poll_interval) => {}
            }
        }
    }

    info!("Auto-flush driver stopped");
}

/// Sleep up to `wait`, waking early on the size signal. Returns false once
/// the driver is cancelled.
async fn wait_for_work<M, K>(
    cache: &PartitionedMessageCache<M, K>,
    token: &CancellationToken,
    wait: Duration,
) -> bool
where
    M: Send + Sync + 'static,
    K: PartitionKey,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => false,
        _ = cache.size_signal().notified() => true,
        _ = sleep(wait) => true,
    }
}
