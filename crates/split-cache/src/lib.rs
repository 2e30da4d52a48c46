//! Split-partitioned message cache with size/time triggered flushing.
//!
//! Producers enqueue messages; each message is routed to the buffer of its
//! split key. Buffered messages are handed to a sink in per-partition
//! batches, either on demand (`flush_all`, `flush`) or by a background
//! [`AutoFlushDriver`] once the aggregate pending count or the time since
//! the last flush crosses its threshold.
//!
//! # Architecture
//!
//! ```text
//!  producers ──enqueue──▶ SplitKeyExtractor ──key──▶ PartitionedMessageCache
//!                                                     │  key -> SplitBuffer
//!                                                     │
//!  AutoFlushDriver ──(size signal | timer)──flush_all─┤
//!  manual caller ─────────────────────────flush_all──┤
//!                                                     ▼
//!                                          FlushCallback(key, batch) ──▶ sink
//! ```
//!
//! # Guarantees
//!
//! - Messages of one partition are delivered in enqueue order.
//! - A partition is never drained by two flushes at once.
//! - Messages enqueued while a partition is being flushed land in a fresh
//!   list and go out with the next flush.
//! - Failed batches are requeued ahead of newer messages
//!   ([`FailurePolicy::Requeue`], the default) or dropped
//!   ([`FailurePolicy::Drop`]).
//!
//! Nothing is persisted: buffered messages are lost if the process dies.
//!
//! # Example
//!
//! ```ignore
//! use split_cache::{AutoFlushDriver, FlushConfig, PartitionedMessageCache, QueueIdExtractor};
//! use std::sync::Arc;
//!
//! let cache = Arc::new(PartitionedMessageCache::new(
//!     QueueIdExtractor,
//!     my_sink,
//!     FlushConfig::default(),
//! )?);
//! let driver = AutoFlushDriver::start(Arc::clone(&cache));
//!
//! cache.enqueue(message).await?;
//!
//! driver.shutdown().await;
//! cache.flush_all().await;
//! ```

mod buffer;
mod cache;
mod callback;
mod config;
mod driver;
mod error;
mod key;
mod message;

pub use buffer::SplitBuffer;
pub use cache::{CacheStats, FlushReport, PartitionedMessageCache};
pub use callback::FlushCallback;
pub use config::{
    FailurePolicy, FlushConfig, DEFAULT_POLL_INTERVAL_MS, DEFAULT_SIZE_THRESHOLD,
    DEFAULT_TIME_THRESHOLD_MS,
};
pub use driver::{AutoFlushDriver, DriverStats};
pub use error::{DriverLoopError, FlushError, InvalidKeyError};
pub use key::{PartitionKey, QueueIdExtractor, SplitKeyExtractor};
pub use message::{Message, MessageHeader};
