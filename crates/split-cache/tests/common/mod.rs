//! Shared helpers for split-cache integration tests.

#![allow(dead_code)]

use split_cache::{FlushCallback, Message};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Route engine logs to the test harness. Filter with `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// How the recording sink answers a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Accept,
    Fail,
    Panic,
}

/// Records every delivered batch as (key, offsets).
///
/// Each call consults `script` in order; once it runs out, `fallback`
/// applies. An optional delay simulates a slow sink.
pub struct RecordingSink {
    batches: Mutex<Vec<(String, Vec<i64>)>>,
    attempts: AtomicUsize,
    script: Mutex<Vec<Behavior>>,
    fallback: Behavior,
    delay: Option<Duration>,
}

impl RecordingSink {
    pub fn accepting() -> Self {
        Self::scripted(Vec::new(), Behavior::Accept)
    }

    pub fn always_failing() -> Self {
        Self::scripted(Vec::new(), Behavior::Fail)
    }

    pub fn scripted(script: Vec<Behavior>, fallback: Behavior) -> Self {
        Self {
            batches: Mutex::new(Vec::new()),
            attempts: AtomicUsize::new(0),
            script: Mutex::new(script.into_iter().rev().collect()),
            fallback,
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn batches(&self) -> Vec<(String, Vec<i64>)> {
        self.batches.lock().unwrap().clone()
    }

    pub fn delivered(&self) -> usize {
        self.batches().iter().map(|(_, b)| b.len()).sum()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Offsets delivered for one key, in delivery order.
    pub fn offsets_for(&self, key: &str) -> Vec<i64> {
        self.batches()
            .into_iter()
            .filter(|(k, _)| k == key)
            .flat_map(|(_, offsets)| offsets)
            .collect()
    }
}

#[async_trait::async_trait]
impl FlushCallback<Message, String> for RecordingSink {
    async fn flush(&self, key: &String, batch: &[Message]) -> anyhow::Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let behavior = self.script.lock().unwrap().pop().unwrap_or(self.fallback);
        match behavior {
            Behavior::Accept => {
                let offsets = batch.iter().map(|m| m.header.offset.unwrap_or(-1)).collect();
                self.batches.lock().unwrap().push((key.clone(), offsets));
                Ok(())
            }
            Behavior::Fail => anyhow::bail!("sink rejected {} messages", batch.len()),
            Behavior::Panic => panic!("sink panicked on partition {key}"),
        }
    }
}

pub fn msg(queue: &str, offset: i64) -> Message {
    Message::new(queue, serde_json::json!({ "offset": offset })).with_offset(offset)
}
