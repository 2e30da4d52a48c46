//! JSONL directory sink.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use split_cache::FlushCallback;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// One line of a partition file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonlRecord<M> {
    pub partition: String,
    pub flushed_at: DateTime<Utc>,
    pub message: M,
}

/// Appends every flushed batch to `<dir>/<partition>.jsonl`.
///
/// The whole batch is encoded first and written with a single append.
/// See [`JsonlDirSink::partition_path`] for how keys become file names.
#[derive(Debug, Clone)]
pub struct JsonlDirSink {
    dir: PathBuf,
}

impl JsonlDirSink {
    /// Create the sink, creating `dir` if it does not exist.
    pub async fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create output directory {dir:?}"))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file a partition is written to.
    ///
    /// Bytes outside `[A-Za-z0-9._-]` are written as `%XX`, so distinct
    /// keys always map to distinct files.
    pub fn partition_path(&self, partition: &str) -> PathBuf {
        let mut file_stem = String::with_capacity(partition.len());
        for byte in partition.bytes() {
            if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.') {
                file_stem.push(byte as char);
            } else {
                file_stem.push_str(&format!("%{byte:02X}"));
            }
        }
        self.dir.join(format!("{file_stem}.jsonl"))
    }
}

#[async_trait]
impl<M, K> FlushCallback<M, K> for JsonlDirSink
where
    M: Serialize + Send + Sync + 'static,
    K: Display + Send + Sync + 'static,
{
    async fn flush(&self, key: &K, batch: &[M]) -> Result<()> {
        let partition = key.to_string();
        let flushed_at = Utc::now();

        let mut buf = Vec::new();
        for message in batch {
            let record = JsonlRecord {
                partition: partition.clone(),
                flushed_at,
                message,
            };
            serde_json::to_writer(&mut buf, &record)
                .with_context(|| format!("Failed to encode message for partition {partition}"))?;
            buf.push(b'\n');
        }

        let path = self.partition_path(&partition);
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("Failed to open {path:?}"))?;
        file.write_all(&buf)
            .await
            .with_context(|| format!("Failed to append to {path:?}"))?;
        file.flush().await?;

        tracing::debug!(
            "Appended {} messages of partition {partition} to {path:?}",
            batch.len()
        );
        Ok(())
    }
}
