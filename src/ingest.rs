//! JSONL ingestion into a partitioned cache.

use anyhow::Context;
use serde::Serialize;
use split_cache::{
    AutoFlushDriver, CacheStats, DriverStats, FlushCallback, FlushConfig, FlushReport, Message,
    PartitionedMessageCache, QueueIdExtractor,
};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info, warn};

/// Line counts from one ingestion pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    pub lines: u64,
    pub accepted: u64,
    /// Lines that were not a valid message
    pub malformed: u64,
    /// Messages without a usable split key
    pub rejected: u64,
}

/// Everything `run_pipeline` observed.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineSummary {
    pub ingest: IngestSummary,
    pub partitions: usize,
    pub delivered: u64,
    pub requeued: u64,
    pub dropped: u64,
    pub failed_flushes: u64,
    pub driver_cycles: u64,
    /// Messages still buffered after the final flush
    pub undelivered: usize,
}

impl PipelineSummary {
    fn new(
        ingest: IngestSummary,
        partitions: usize,
        stats: CacheStats,
        driver: DriverStats,
        undelivered: usize,
    ) -> Self {
        Self {
            ingest,
            partitions,
            delivered: stats.delivered,
            requeued: stats.requeued,
            dropped: stats.dropped,
            failed_flushes: stats.failed_flushes,
            driver_cycles: driver.cycles,
            undelivered,
        }
    }
}

/// Read one `Message` per line and enqueue it.
///
/// Blank lines are skipped. Malformed lines and messages without a queue
/// id are logged and counted, never fatal.
pub async fn ingest_jsonl<R>(
    reader: R,
    cache: &PartitionedMessageCache<Message, String>,
) -> anyhow::Result<IngestSummary>
where
    R: AsyncBufRead + Unpin,
{
    let mut summary = IngestSummary::default();
    let mut lines = reader.lines();

    while let Some(line) = lines.next_line().await.context("Failed to read input")? {
        summary.lines += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let message: Message = match serde_json::from_str(line) {
            Ok(m) => m,
            Err(e) => {
                warn!("Skipping malformed line {}: {e}", summary.lines);
                summary.malformed += 1;
                continue;
            }
        };

        match cache.enqueue(message).await {
            Ok(len) => {
                summary.accepted += 1;
                debug!("Line {} buffered, {len} messages pending", summary.lines);
            }
            Err(e) => {
                warn!("Rejected line {}: {e}", summary.lines);
                summary.rejected += 1;
            }
        }
    }

    Ok(summary)
}

/// Ingest `reader` through a cache with an auto-flush driver, then stop the
/// driver and flush whatever is left.
pub async fn run_pipeline<R>(
    reader: R,
    sink: Arc<dyn FlushCallback<Message, String>>,
    config: FlushConfig,
) -> anyhow::Result<PipelineSummary>
where
    R: AsyncBufRead + Unpin,
{
    let cache = Arc::new(PartitionedMessageCache::new(QueueIdExtractor, sink, config)?);
    let driver = AutoFlushDriver::start(Arc::clone(&cache));

    let ingest = ingest_jsonl(reader, &cache).await;
    let driver_stats = driver.stats();
    driver.shutdown().await;
    let ingest = ingest?;

    let report: FlushReport<String> = cache.flush_all().await;
    for err in &report.errors {
        warn!("Final flush: {err}");
    }

    let summary = PipelineSummary::new(
        ingest,
        cache.partition_count().await,
        cache.stats(),
        driver_stats,
        cache.pending_count(),
    );
    info!(
        "Ingested {} messages, delivered {} across {} partitions ({} undelivered)",
        summary.ingest.accepted, summary.delivered, summary.partitions, summary.undelivered
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use split_sink::CollectingSink;

    #[tokio::test]
    async fn test_ingest_counts_lines() {
        let sink: Arc<CollectingSink<String, Message>> = Arc::new(CollectingSink::new());
        let cache = PartitionedMessageCache::new(
            QueueIdExtractor,
            Arc::clone(&sink),
            FlushConfig::default(),
        )
        .unwrap();
        let input = concat!(
            r#"{"header":{"queue_id":"a"},"payload":1}"#,
            "\n\n",
            "not json\n",
            r#"{"header":{},"payload":2}"#,
            "\n",
            r#"{"header":{"queue_id":"b"},"payload":3}"#,
            "\n",
        );

        let summary = ingest_jsonl(input.as_bytes(), &cache).await.unwrap();
        assert_eq!(
            summary,
            IngestSummary {
                lines: 5,
                accepted: 2,
                malformed: 1,
                rejected: 1,
            }
        );
        assert_eq!(cache.pending_count(), 2);
    }
}
